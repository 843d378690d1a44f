/// Document chunking.
pub mod chunk;

use futures::{stream, StreamExt, TryStreamExt};
use lexguard_oracle::{OracleClient, PromptContext, ResponseSchema};
use lexguard_telemetry::{LogLevel, Telemetry};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    config::ExtractionSettings,
    error::ExtractionError,
    model::{Clause, ClauseId, Document, Severity, SourceSpan},
};
use chunk::Chunk;

const TASK: &str = "extract.clauses";

/// Monotonic clause id source, owned by a single extraction call.
#[derive(Debug, Default)]
pub struct ClauseIdAllocator {
    issued: u32,
}

impl ClauseIdAllocator {
    /// Next unused id.
    pub fn next_id(&mut self) -> ClauseId {
        self.issued += 1;
        ClauseId::sequential(self.issued)
    }

    /// Number of ids issued so far.
    #[must_use]
    pub const fn issued(&self) -> u32 {
        self.issued
    }
}

/// Clauses found in one part of the document.
#[derive(Debug, Deserialize, JsonSchema)]
struct ExtractionResponse {
    /// Every distinct clause, in document order.
    clauses: Vec<RawClause>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RawClause {
    /// Category such as Data Retention, Liability or Consent.
    clause_type: String,
    /// Clause text, quoted exactly.
    text: String,
    /// Primary obligation the clause imposes.
    obligation: String,
    #[serde(default)]
    key_obligations: Vec<String>,
    /// Parties bound or benefited.
    #[serde(default)]
    parties: Vec<String>,
    /// Requirements the clause implies without stating.
    #[serde(default)]
    implicit_assumptions: Vec<String>,
    /// Section number or heading.
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    risk_potential: Option<Severity>,
}

impl RawClause {
    fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.obligation.trim().is_empty()
    }

    fn into_clause(self, id: ClauseId, source_span: Option<SourceSpan>) -> Clause {
        Clause {
            id,
            source_span,
            location: self.location.filter(|loc| !loc.trim().is_empty()),
            clause_type: self.clause_type.trim().to_owned(),
            text: self.text.trim().to_owned(),
            obligation_text: self.obligation.trim().to_owned(),
            obligations: self.key_obligations,
            parties: self.parties,
            assumptions: self.implicit_assumptions,
            risk_potential: self.risk_potential,
        }
    }
}

/// Response contract for clause decomposition.
#[must_use]
pub fn clause_schema() -> ResponseSchema {
    ResponseSchema::of::<ExtractionResponse>("clause_extraction")
}

/// Turns raw document text into an ordered clause sequence.
#[derive(Debug, Clone)]
pub struct ClauseExtractor {
    client: OracleClient,
    max_chunk_chars: usize,
    max_concurrency: usize,
    telemetry: Option<Telemetry>,
}

impl ClauseExtractor {
    /// Creates an extractor.
    #[must_use]
    pub fn new(
        client: OracleClient,
        settings: &ExtractionSettings,
        max_concurrency: usize,
    ) -> Self {
        Self {
            client,
            max_chunk_chars: settings.max_chunk_chars,
            max_concurrency: max_concurrency.max(1),
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: &Telemetry) -> Self {
        self.telemetry = Some(telemetry.scoped("extract"));
        self
    }

    /// Extracts clauses; ids are sequential in document order.
    ///
    /// Blank documents yield no clauses without consulting the oracle. Any chunk
    /// failure, or zero clauses from non-blank text, is an [`ExtractionError`].
    pub async fn extract(&self, document: &Document) -> Result<Vec<Clause>, ExtractionError> {
        if document.is_blank() {
            self.log(
                LogLevel::Info,
                "extract.skipped_blank",
                json!({ "document": document.id }),
            );
            return Ok(Vec::new());
        }
        let chunks = chunk::split(&document.text, self.max_chunk_chars);
        let total = chunks.len();
        self.log(
            LogLevel::Info,
            "extract.started",
            json!({ "document": document.id, "chunks": total, "bytes": document.text.len() }),
        );
        let schema = clause_schema();
        let responses: Vec<ExtractionResponse> = stream::iter(chunks.iter().enumerate())
            .map(|(idx, chunk)| {
                let context =
                    PromptContext::new(TASK, instructions(document, idx, total), chunk.text);
                let schema = &schema;
                async move {
                    self.client
                        .invoke::<ExtractionResponse>(&context, schema)
                        .await
                        .map_err(|source| ExtractionError::Oracle { chunk: idx, source })
                }
            })
            .buffered(self.max_concurrency)
            .try_collect::<Vec<_>>()
            .await
            .inspect_err(|err| {
                self.log(
                    LogLevel::Error,
                    "extract.failed",
                    json!({ "error": err.to_string() }),
                );
            })?;

        let mut allocator = ClauseIdAllocator::default();
        let mut clauses = Vec::new();
        for (chunk, response) in chunks.iter().zip(responses) {
            for raw in response.clauses {
                if raw.is_empty() {
                    continue;
                }
                let span = locate(chunk, &raw.text);
                clauses.push(raw.into_clause(allocator.next_id(), span));
            }
        }
        if clauses.is_empty() {
            self.event(
                "extract.empty_result",
                json!({ "document": document.id, "chunks": total }),
            );
            return Err(ExtractionError::EmptyResult { chunks: total });
        }
        self.event(
            "extract.completed",
            json!({ "document": document.id, "clauses": clauses.len(), "chunks": total }),
        );
        Ok(clauses)
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(tel) = &self.telemetry {
            let _ = tel.log(level, message, metadata);
        }
    }

    fn event(&self, event_type: &str, payload: Value) {
        if let Some(tel) = &self.telemetry {
            let _ = tel.event(event_type, payload);
        }
    }
}

fn instructions(document: &Document, chunk: usize, total: usize) -> String {
    let part = if total > 1 {
        format!(
            "This is part {} of {total} of the document; extract only clauses in this part.\n",
            chunk + 1
        )
    } else {
        String::new()
    };
    format!(
        "You are a senior legal analyst with expertise in contract law and regulatory compliance.\n\
         Document type: {doc_type}.\n{part}\
         Decompose the text below into every distinct clause. For each clause report its type \
         (e.g. Data Retention, Liability, Termination, Data Handling, Consent, Jurisdiction, Payment, \
         Indemnification, Confidentiality), its exact text, the primary obligation it imposes, its key \
         obligations, the parties it binds, its implicit assumptions, its location (section number) and \
         its risk potential.",
        doc_type = document.doc_type,
    )
}

fn locate(chunk: &Chunk<'_>, clause_text: &str) -> Option<SourceSpan> {
    let needle = clause_text.trim();
    if needle.is_empty() {
        return None;
    }
    chunk.text.find(needle).map(|pos| SourceSpan {
        start: chunk.offset + pos,
        end: chunk.offset + pos + needle.len(),
    })
}
