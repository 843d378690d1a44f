use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use indexmap::IndexMap;
use lexguard_oracle::{OracleClient, OracleError, OracleErrorKind, PromptContext, ResponseSchema};
use lexguard_telemetry::{LogLevel, Telemetry};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    model::{Clause, ClauseId, Finding, FindingId, FindingKind, Severity},
    regulation::Regulation,
};

/// Outcome of one regulation's evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegulationStatus {
    /// The oracle answered; `dropped` findings failed integrity checks.
    Evaluated {
        /// Findings kept.
        findings: usize,
        /// Findings discarded as data-quality defects.
        dropped: usize,
        /// Executive summary of the regulation's exposure, when given.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    /// The evaluation failed; no findings exist for the regulation.
    Unavailable {
        /// Failure class.
        kind: OracleErrorKind,
        /// Human-readable cause.
        reason: String,
    },
}

impl RegulationStatus {
    /// Whether the regulation's findings are missing from the report.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Summary reported with an evaluated regulation.
    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        match self {
            Self::Evaluated { summary, .. } => summary.as_deref(),
            Self::Unavailable { .. } => None,
        }
    }
}

/// Oracle finding rejected by an integrity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataQualityDefect {
    /// Regulation whose answer carried the finding.
    pub regulation: Regulation,
    /// Response-local reference of the finding.
    pub reference: String,
    /// Clause id as reported.
    pub clause_id: String,
    /// Why it was dropped.
    pub reason: String,
}

/// Fan-in result of every scheduled regulation evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Surviving findings, grouped by regulation in selection order.
    pub findings: Vec<Finding>,
    /// Per-regulation status, in selection order.
    pub status: IndexMap<Regulation, RegulationStatus>,
    /// Findings dropped for unknown clause ids.
    pub defects: Vec<DataQualityDefect>,
}

impl MatchOutcome {
    /// Regulations whose evaluation failed.
    #[must_use]
    pub fn unavailable(&self) -> Vec<Regulation> {
        self.status
            .iter()
            .filter(|(_, status)| status.is_unavailable())
            .map(|(regulation, _)| *regulation)
            .collect()
    }
}

/// Findings raised by one regulation.
#[derive(Debug, Deserialize, JsonSchema)]
struct MatchResponse {
    /// One entry per issue; an empty list means the clauses comply.
    findings: Vec<RawFinding>,
    /// Executive summary of the document's exposure under this regulation.
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
struct RawFinding {
    /// Label unique within this answer, e.g. `F1`.
    #[serde(rename = "ref")]
    reference: String,
    /// Id of the clause the finding is about.
    clause_id: String,
    kind: FindingKind,
    severity: Severity,
    /// Legal reasoning behind the finding.
    rationale: String,
    /// Cited article or section.
    #[serde(default)]
    article: Option<String>,
    /// Fines or sanctions the issue exposes the parties to.
    #[serde(default)]
    penalty_exposure: Option<String>,
    /// Suggested fix.
    #[serde(default)]
    remediation: Option<String>,
    /// `ref`s of the findings a conflict contradicts.
    #[serde(default)]
    conflicts_with: Vec<String>,
}

/// Response contract for one regulation's evaluation.
#[must_use]
pub fn findings_schema() -> ResponseSchema {
    ResponseSchema::of::<MatchResponse>("regulation_findings")
        .with_alias("partial", "partial_compliance")
}

/// Evaluates clauses against each selected regulation in parallel.
#[derive(Debug, Clone)]
pub struct RegulationMatcher {
    client: OracleClient,
    semaphore: Arc<Semaphore>,
    telemetry: Option<Telemetry>,
}

impl RegulationMatcher {
    /// Creates a matcher running at most `max_concurrency` evaluations at once.
    #[must_use]
    pub fn new(client: OracleClient, max_concurrency: usize) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: &Telemetry) -> Self {
        self.telemetry = Some(telemetry.scoped("match"));
        self
    }

    /// Runs every evaluation to completion. A failed regulation is recorded as
    /// unavailable and never affects the others.
    pub async fn evaluate(&self, clauses: &[Clause], regulations: &[Regulation]) -> MatchOutcome {
        let mut outcome = MatchOutcome::default();
        if clauses.is_empty() {
            for regulation in regulations {
                outcome.status.insert(
                    *regulation,
                    RegulationStatus::Evaluated {
                        findings: 0,
                        dropped: 0,
                        summary: None,
                    },
                );
            }
            return outcome;
        }

        let excerpt: Arc<str> = Arc::from(clause_excerpt(clauses));
        let schema = Arc::new(findings_schema());
        let mut set = JoinSet::new();
        for (slot, regulation) in regulations.iter().copied().enumerate() {
            let client = self.client.clone();
            let semaphore = Arc::clone(&self.semaphore);
            let excerpt = Arc::clone(&excerpt);
            let schema = Arc::clone(&schema);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let context = PromptContext::new(
                    format!("match.{}", regulation.code()),
                    regulation.reasoning_template(),
                    excerpt.as_ref(),
                );
                let result = client.invoke::<MatchResponse>(&context, &schema).await;
                (slot, result)
            });
        }

        let mut slots: Vec<Option<Result<MatchResponse, OracleError>>> =
            regulations.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, result)) => slots[slot] = Some(result),
                Err(err) => self.log(
                    LogLevel::Error,
                    "match.task.failed",
                    json!({ "error": err.to_string() }),
                ),
            }
        }

        let known: HashSet<ClauseId> = clauses.iter().map(|clause| clause.id.clone()).collect();
        for (regulation, slot) in regulations.iter().copied().zip(slots) {
            let status = match slot {
                Some(Ok(response)) => {
                    let (findings, defects) = reconcile(regulation, response.findings, &known);
                    for defect in &defects {
                        self.log(
                            LogLevel::Warn,
                            "match.finding.dropped",
                            json!({
                                "regulation": regulation.code(),
                                "ref": defect.reference,
                                "clause_id": defect.clause_id,
                                "reason": defect.reason,
                            }),
                        );
                    }
                    let status = RegulationStatus::Evaluated {
                        findings: findings.len(),
                        dropped: defects.len(),
                        summary: non_blank(response.summary),
                    };
                    outcome.findings.extend(findings);
                    outcome.defects.extend(defects);
                    status
                }
                Some(Err(err)) => RegulationStatus::Unavailable {
                    kind: err.kind(),
                    reason: err.to_string(),
                },
                None => RegulationStatus::Unavailable {
                    kind: OracleErrorKind::Unavailable,
                    reason: "evaluation task did not complete".into(),
                },
            };
            if let RegulationStatus::Unavailable { kind, reason } = &status {
                self.event(
                    "match.regulation.unavailable",
                    json!({ "regulation": regulation.code(), "kind": kind, "reason": reason }),
                );
            }
            outcome.status.insert(regulation, status);
        }
        self.log(
            LogLevel::Info,
            "match.completed",
            json!({
                "findings": outcome.findings.len(),
                "defects": outcome.defects.len(),
                "unavailable": outcome.unavailable(),
            }),
        );
        outcome
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

fn clause_excerpt(clauses: &[Clause]) -> String {
    let listed: Vec<Value> = clauses
        .iter()
        .map(|clause| {
            json!({
                "clause_id": clause.id,
                "clause_type": clause.clause_type,
                "location": clause.location,
                "text": clause.text,
                "obligation": clause.obligation_text,
                "parties": clause.parties,
                "implicit_assumptions": clause.assumptions,
            })
        })
        .collect();
    format!("Clauses:\n{:#}", Value::Array(listed))
}

/// Drops findings on unknown clauses, assigns namespaced ids to the rest and
/// resolves `conflicts_with` refs within the answer.
///
/// Conflicts whose counterpart lies outside this answer are kept unlinked;
/// the aggregator links them across regulations.
fn reconcile(
    regulation: Regulation,
    raw: Vec<RawFinding>,
    known: &HashSet<ClauseId>,
) -> (Vec<Finding>, Vec<DataQualityDefect>) {
    let mut defects = Vec::new();
    let mut candidates = Vec::with_capacity(raw.len());
    for finding in raw {
        if known.contains(&ClauseId::from_reported(&finding.clause_id)) {
            candidates.push(finding);
        } else {
            defects.push(DataQualityDefect {
                regulation,
                reference: finding.reference,
                clause_id: finding.clause_id,
                reason: "unknown clause id".into(),
            });
        }
    }

    let mut by_ref: HashMap<&str, usize> = HashMap::new();
    for (idx, finding) in candidates.iter().enumerate() {
        let key = finding.reference.trim();
        if !key.is_empty() {
            by_ref.entry(key).or_insert(idx);
        }
    }
    let links: Vec<Vec<usize>> = candidates
        .iter()
        .enumerate()
        .map(|(idx, finding)| {
            let mut out: Vec<usize> = Vec::new();
            for target in &finding.conflicts_with {
                if let Some(&other) = by_ref.get(target.trim()) {
                    if other != idx && !out.contains(&other) {
                        out.push(other);
                    }
                }
            }
            out
        })
        .collect();

    let ids: Vec<FindingId> = (1..=candidates.len())
        .map(|n| FindingId::namespaced(regulation, n))
        .collect();
    let findings = candidates
        .into_iter()
        .zip(links)
        .enumerate()
        .map(|(idx, (raw, linked))| Finding {
            id: ids[idx].clone(),
            clause_id: ClauseId::from_reported(&raw.clause_id),
            regulation,
            kind: raw.kind,
            severity: raw.severity,
            rationale: raw.rationale,
            article: non_blank(raw.article),
            penalty_exposure: non_blank(raw.penalty_exposure),
            suggested_remediation: non_blank(raw.remediation),
            related_finding_ids: linked.into_iter().map(|other| ids[other].clone()).collect(),
        })
        .collect();
    (findings, defects)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}
