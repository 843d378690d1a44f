use std::{fmt, future::Future, sync::Arc};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use lexguard_oracle::{OracleClient, OracleTransport};
use lexguard_telemetry::{LogLevel, Telemetry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    aggregate::{RiskAggregate, RiskAggregator, RiskModel},
    config::PipelineConfig,
    error::{ExplanationUnavailable, PipelineError},
    explain::{Audience, ExplainTarget, ExplanationAdapter},
    extract::ClauseExtractor,
    ingest::DocumentIngestor,
    matcher::{DataQualityDefect, RegulationMatcher, RegulationStatus},
    model::{Clause, Document, Finding},
    plan::{RemediationPlanner, Roadmap},
    regulation::{dedup_preserving_order, Regulation},
};

/// Complete, best-effort result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Run identifier stamped on every log record and event of the run.
    pub run_id: Uuid,
    /// Analysed document.
    pub document_id: String,
    /// Document type.
    pub doc_type: String,
    /// Source file name, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Completion time.
    pub generated_at: DateTime<Utc>,
    /// Regulations scheduled, in evaluation order.
    pub regulations: Vec<Regulation>,
    /// Extracted clauses.
    pub clauses: Vec<Clause>,
    /// Reconciled findings and heatmap data.
    pub risk: RiskModel,
    /// Remediation plan.
    pub roadmap: Roadmap,
    /// Outcome per scheduled regulation.
    pub regulation_status: IndexMap<Regulation, RegulationStatus>,
    /// Regulations whose findings are missing because evaluation failed.
    pub regulation_unavailable: Vec<Regulation>,
    /// Oracle findings dropped for unknown clauses or missing conflict
    /// counterparts.
    #[serde(default)]
    pub data_quality: Vec<DataQualityDefect>,
}

impl AnalysisReport {
    /// Reconciled findings.
    #[must_use]
    pub fn findings(&self) -> &[Finding] {
        &self.risk.findings
    }

    /// Heatmap counts.
    #[must_use]
    pub const fn risk_aggregate(&self) -> &RiskAggregate {
        &self.risk.aggregate
    }

    /// Executive summaries reported by evaluated regulations, in evaluation order.
    pub fn regulation_summaries(&self) -> impl Iterator<Item = (Regulation, &str)> + '_ {
        self.regulation_status
            .iter()
            .filter_map(|(regulation, status)| status.summary().map(|text| (*regulation, text)))
    }

    /// Clause lookup.
    #[must_use]
    pub fn clause(&self, id: &str) -> Option<&Clause> {
        self.clauses.iter().find(|clause| clause.id.as_str() == id)
    }

    /// Resolves a finding or remediation item id into an explanation target.
    #[must_use]
    pub fn explain_target(&self, entity_id: &str) -> Option<ExplainTarget<'_>> {
        if let Some(finding) = self.risk.finding(entity_id) {
            return Some(ExplainTarget::Finding {
                finding,
                clause: self.clause(finding.clause_id.as_str()),
            });
        }
        self.roadmap.item(entity_id).map(|item| ExplainTarget::Remediation {
            item,
            findings: item
                .finding_ids
                .iter()
                .filter_map(|id| self.risk.finding(id.as_str()))
                .collect(),
        })
    }
}

/// Pipeline entry point: extraction, matching, aggregation and planning.
#[derive(Clone)]
pub struct ComplianceRuntime {
    transport: Arc<dyn OracleTransport>,
    config: PipelineConfig,
    telemetry: Option<Telemetry>,
}

impl fmt::Debug for ComplianceRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComplianceRuntime")
            .field("config", &self.config)
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

impl ComplianceRuntime {
    /// Creates a runtime over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn OracleTransport>, config: PipelineConfig) -> Self {
        Self {
            transport,
            config,
            telemetry: None,
        }
    }

    /// Attaches telemetry; each run derives a run-scoped handle from it.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the whole pipeline over `document`.
    ///
    /// An empty selection falls back to the configured defaults. Only ingestion
    /// and extraction failures are fatal; everything else is recorded in the
    /// report. Dropping the returned future aborts every in-flight oracle call.
    pub async fn run_analysis(
        &self,
        document: &Document,
        regulations: &[Regulation],
    ) -> Result<AnalysisReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let telemetry = self.telemetry.as_ref().map(|tel| tel.for_run(run_id));
        let selected = if regulations.is_empty() {
            dedup_preserving_order(&self.config.default_regulations)
        } else {
            dedup_preserving_order(regulations)
        };
        let stage = Stages::build(self, telemetry.as_ref());
        stage.log(
            LogLevel::Info,
            "pipeline.started",
            json!({
                "document": document.id,
                "doc_type": document.doc_type,
                "regulations": selected,
            }),
        );

        let clauses = match stage.extractor.extract(document).await {
            Ok(clauses) => clauses,
            Err(err) => {
                stage.event(
                    "pipeline.failed",
                    json!({ "document": document.id, "error": err.to_string() }),
                );
                return Err(err.into());
            }
        };

        let matched = stage.matcher.evaluate(&clauses, &selected).await;
        let regulation_unavailable = matched.unavailable();
        let mut risk = RiskAggregator.aggregate(&clauses, matched.findings);
        let mut data_quality = matched.defects;
        for defect in &risk.defects {
            stage.log(
                LogLevel::Warn,
                "aggregate.finding.dropped",
                json!({
                    "regulation": defect.regulation.code(),
                    "finding_id": defect.reference,
                    "clause_id": defect.clause_id,
                    "reason": defect.reason,
                }),
            );
        }
        data_quality.append(&mut risk.defects);
        stage.event(
            "aggregate.completed",
            json!({
                "findings": risk.total_findings,
                "clauses_at_risk": risk.clause_risks.len(),
                "compliance_score": risk.compliance_score,
            }),
        );
        let roadmap = stage.planner.plan(&clauses, &risk).await;

        stage.event(
            "pipeline.completed",
            json!({
                "document": document.id,
                "clauses": clauses.len(),
                "findings": risk.total_findings,
                "roadmap_items": roadmap.items.len(),
                "regulation_unavailable": regulation_unavailable,
            }),
        );
        Ok(AnalysisReport {
            run_id,
            document_id: document.id.clone(),
            doc_type: document.doc_type.clone(),
            filename: document.filename.clone(),
            generated_at: Utc::now(),
            regulations: selected,
            clauses,
            risk,
            roadmap,
            regulation_status: matched.status,
            regulation_unavailable,
            data_quality,
        })
    }

    /// Like [`Self::run_analysis`], but gives up as soon as `cancel` resolves.
    /// In-flight oracle calls are abandoned and no partial report is returned.
    pub async fn run_analysis_cancellable<F>(
        &self,
        document: &Document,
        regulations: &[Regulation],
        cancel: F,
    ) -> Result<AnalysisReport, PipelineError>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::select! {
            biased;
            () = cancel => {
                if let Some(tel) = &self.telemetry {
                    let _ = tel.scoped("pipeline").event(
                        "pipeline.cancelled",
                        json!({ "document": document.id }),
                    );
                }
                Err(PipelineError::Cancelled)
            }
            result = self.run_analysis(document, regulations) => result,
        }
    }

    /// Turns raw bytes into a document of the configured type.
    pub fn ingest(
        &self,
        ingestor: &dyn DocumentIngestor,
        filename: &str,
        bytes: &[u8],
    ) -> Result<Document, PipelineError> {
        let text = ingestor.extract_text(filename, bytes)?;
        Ok(Document::new(Uuid::new_v4().to_string(), text)
            .with_doc_type(self.config.document_type.clone())
            .with_filename(filename))
    }

    /// Ingests raw bytes with `ingestor`, then runs the pipeline.
    pub async fn analyze_bytes(
        &self,
        ingestor: &dyn DocumentIngestor,
        filename: &str,
        bytes: &[u8],
        regulations: &[Regulation],
    ) -> Result<AnalysisReport, PipelineError> {
        let document = self.ingest(ingestor, filename, bytes)?;
        self.run_analysis(&document, regulations).await
    }

    /// Explains a finding or remediation item of `report` as Markdown.
    pub async fn explain(
        &self,
        report: &AnalysisReport,
        entity_id: &str,
        audience: Audience,
    ) -> Result<String, ExplanationUnavailable> {
        let target = report
            .explain_target(entity_id)
            .ok_or_else(|| ExplanationUnavailable {
                entity_id: entity_id.to_owned(),
                reason: "no finding or remediation item with this id".into(),
            })?;
        let telemetry = self.telemetry.as_ref().map(|tel| tel.for_run(report.run_id));
        let mut adapter = ExplanationAdapter::new(oracle_client(self, telemetry.as_ref()));
        if let Some(tel) = &telemetry {
            adapter = adapter.with_telemetry(tel);
        }
        adapter
            .explain(&target, audience)
            .await
            .map(|explanation| explanation.to_string())
    }
}

fn oracle_client(runtime: &ComplianceRuntime, telemetry: Option<&Telemetry>) -> OracleClient {
    let client = OracleClient::new(Arc::clone(&runtime.transport), runtime.config.retry_policy());
    match telemetry {
        Some(tel) => client.with_telemetry(tel),
        None => client,
    }
}

/// Per-run stage instances sharing one client and telemetry scope.
struct Stages {
    extractor: ClauseExtractor,
    matcher: RegulationMatcher,
    planner: RemediationPlanner,
    telemetry: Option<Telemetry>,
}

impl Stages {
    fn build(runtime: &ComplianceRuntime, telemetry: Option<&Telemetry>) -> Self {
        let config = &runtime.config;
        let client = oracle_client(runtime, telemetry);
        let mut extractor =
            ClauseExtractor::new(client.clone(), &config.extraction, config.max_concurrency);
        let mut matcher = RegulationMatcher::new(client.clone(), config.max_concurrency);
        let mut planner = RemediationPlanner::new(client, config.max_concurrency);
        if let Some(tel) = telemetry {
            extractor = extractor.with_telemetry(tel);
            matcher = matcher.with_telemetry(tel);
            planner = planner.with_telemetry(tel);
        }
        Self {
            extractor,
            matcher,
            planner,
            telemetry: telemetry.map(|tel| tel.scoped("pipeline")),
        }
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
