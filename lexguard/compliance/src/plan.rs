mod group;
/// Delivery phases.
pub mod phase;

use std::{
    cmp::Reverse,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use lexguard_oracle::{OracleClient, OracleError, PromptContext, ResponseSchema};
use lexguard_telemetry::{LogLevel, Telemetry};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    aggregate::RiskModel,
    model::{Clause, Finding, FindingId, Severity},
};
use group::Candidate;
pub use phase::Phase;

/// Actionable step resolving one or more findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationItem {
    /// `R1`, `R2`, ... in roadmap order.
    pub id: String,
    /// Findings this item resolves; each finding appears in exactly one item.
    pub finding_ids: Vec<FindingId>,
    /// What to do.
    pub action: String,
    /// Ordering severity: the highest clause severity among the findings.
    pub priority: Severity,
    /// Delivery window.
    pub phase: Phase,
    /// Effort estimate, e.g. "3 days".
    pub estimated_effort: Option<String>,
    /// Accountable role.
    pub owner: Option<String>,
    /// Measurable completion criteria.
    #[serde(default)]
    pub success_criteria: Vec<String>,
    /// Items that must land first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Synthesis failed; the item only records coverage.
    pub needs_manual_review: bool,
}

/// Ordered remediation plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roadmap {
    /// Items, most urgent first.
    pub items: Vec<RemediationItem>,
    /// Items per phase.
    pub phase_counts: BTreeMap<Phase, usize>,
    /// Longest phase window among the items, in days.
    pub estimated_timeline_days: u32,
}

impl Roadmap {
    fn from_items(items: Vec<RemediationItem>) -> Self {
        let mut phase_counts = BTreeMap::new();
        for item in &items {
            *phase_counts.entry(item.phase).or_insert(0) += 1;
        }
        let estimated_timeline_days = phase_counts
            .keys()
            .map(|phase: &Phase| phase.timeline_days())
            .max()
            .unwrap_or(0);
        Self {
            items,
            phase_counts,
            estimated_timeline_days,
        }
    }

    /// Item lookup by id.
    #[must_use]
    pub fn item(&self, id: &str) -> Option<&RemediationItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Item covering `finding`.
    #[must_use]
    pub fn item_for(&self, finding: &FindingId) -> Option<&RemediationItem> {
        self.items
            .iter()
            .find(|item| item.finding_ids.contains(finding))
    }

    /// Items flagged for manual review.
    pub fn needing_review(&self) -> impl Iterator<Item = &RemediationItem> {
        self.items.iter().filter(|item| item.needs_manual_review)
    }
}

/// Remediation steps for one severity batch.
#[derive(Debug, Deserialize, JsonSchema)]
struct PlanResponse {
    /// One entry per candidate listed in the prompt.
    items: Vec<RawItem>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RawItem {
    /// Candidate key the step resolves, e.g. `K1`.
    candidate: String,
    /// Concrete action to take.
    action: String,
    /// Effort estimate such as "3 days".
    estimated_effort: String,
    /// Accountable role.
    owner: String,
    /// Measurable completion criteria.
    success_criteria: Vec<String>,
    /// Candidate keys that must be resolved first.
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Response contract for one severity batch.
#[must_use]
pub fn plan_schema() -> ResponseSchema {
    ResponseSchema::of::<PlanResponse>("remediation_plan")
}

/// Synthesises the roadmap, one oracle call per severity batch.
#[derive(Debug, Clone)]
pub struct RemediationPlanner {
    client: OracleClient,
    semaphore: Arc<Semaphore>,
    telemetry: Option<Telemetry>,
}

impl RemediationPlanner {
    /// Creates a planner running at most `max_concurrency` batches at once.
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
        self.telemetry = Some(telemetry.scoped("plan"));
        self
    }

    /// Builds the roadmap for `risk`. Covers every finding exactly once; a
    /// failed batch yields stub items flagged for manual review.
    pub async fn plan(&self, clauses: &[Clause], risk: &RiskModel) -> Roadmap {
        let candidates = group::candidates(risk);
        if candidates.is_empty() {
            return Roadmap::default();
        }

        let mut batches: BTreeMap<Reverse<Severity>, Vec<usize>> = BTreeMap::new();
        for (idx, candidate) in candidates.iter().enumerate() {
            batches
                .entry(Reverse(candidate.severity))
                .or_default()
                .push(idx);
        }

        let schema = Arc::new(plan_schema());
        let mut set = JoinSet::new();
        for (Reverse(severity), members) in &batches {
            let severity = *severity;
            let excerpt = batch_excerpt(clauses, risk, &candidates, members);
            let batch: Vec<String> = members
                .iter()
                .map(|&idx| candidates[idx].reference.clone())
                .collect();
            let client = self.client.clone();
            let semaphore = Arc::clone(&self.semaphore);
            let schema = Arc::clone(&schema);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let context = PromptContext::new(
                    format!("plan.{severity}"),
                    instructions(severity),
                    excerpt,
                );
                let result = client
                    .invoke::<PlanResponse>(&context, &schema)
                    .await
                    .map(|response| {
                        response
                            .items
                            .into_iter()
                            .filter(|item| batch.iter().any(|r| r == item.candidate.trim()))
                            .collect::<Vec<_>>()
                    });
                (severity, result)
            });
        }

        let mut synthesised: HashMap<String, RawItem> = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(items))) => {
                    for item in items {
                        let key = item.candidate.trim().to_owned();
                        synthesised.entry(key).or_insert(item);
                    }
                }
                Ok((severity, Err(err))) => self.batch_failed(severity, &err),
                Err(err) => self.log(
                    LogLevel::Error,
                    "plan.task.failed",
                    json!({ "error": err.to_string() }),
                ),
            }
        }

        let roadmap = assemble(risk, candidates, synthesised);
        self.event(
            "plan.completed",
            json!({
                "items": roadmap.items.len(),
                "manual_review": roadmap.needing_review().count(),
                "timeline_days": roadmap.estimated_timeline_days,
            }),
        );
        roadmap
    }

    fn batch_failed(&self, severity: Severity, err: &OracleError) {
        self.event(
            "plan.batch.failed",
            json!({ "severity": severity, "kind": err.kind(), "error": err.to_string() }),
        );
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

/// Orders candidates, assigns `R` ids and resolves dependencies.
fn assemble(
    risk: &RiskModel,
    mut candidates: Vec<Candidate>,
    mut synthesised: HashMap<String, RawItem>,
) -> Roadmap {
    candidates.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.findings.len().cmp(&a.findings.len()))
            .then_with(|| a.order_key().cmp(&b.order_key()))
    });
    let item_ids: HashMap<&str, String> = candidates
        .iter()
        .enumerate()
        .map(|(n, candidate)| (candidate.reference.as_str(), format!("R{}", n + 1)))
        .collect();

    let items = candidates
        .iter()
        .map(|candidate| {
            let findings: Vec<&Finding> = candidate
                .findings
                .iter()
                .map(|&idx| &risk.findings[idx])
                .collect();
            let id = item_ids[candidate.reference.as_str()].clone();
            let base = RemediationItem {
                id,
                finding_ids: findings.iter().map(|finding| finding.id.clone()).collect(),
                action: stub_action(&findings),
                priority: candidate.severity,
                phase: Phase::for_severity(candidate.severity),
                estimated_effort: None,
                owner: None,
                success_criteria: Vec::new(),
                dependencies: Vec::new(),
                needs_manual_review: true,
            };
            match synthesised.remove(&candidate.reference) {
                Some(raw) => RemediationItem {
                    action: raw.action.trim().to_owned(),
                    estimated_effort: Some(raw.estimated_effort.trim().to_owned()),
                    owner: Some(raw.owner.trim().to_owned()),
                    success_criteria: raw.success_criteria,
                    dependencies: raw
                        .dependencies
                        .iter()
                        .filter_map(|reference| item_ids.get(reference.trim()))
                        .filter(|dep| **dep != base.id)
                        .cloned()
                        .collect(),
                    needs_manual_review: false,
                    ..base
                },
                None => base,
            }
        })
        .collect();
    Roadmap::from_items(items)
}

fn stub_action(findings: &[&Finding]) -> String {
    findings
        .iter()
        .find_map(|finding| finding.suggested_remediation.clone())
        .unwrap_or_else(|| {
            let ids: Vec<&str> = findings.iter().map(|finding| finding.id.as_str()).collect();
            format!("Review and remediate findings {}", ids.join(", "))
        })
}

fn instructions(severity: Severity) -> String {
    let phase = Phase::for_severity(severity);
    format!(
        "You are a compliance remediation planner. Every candidate below groups findings of \
         {severity} severity that one action can resolve; they belong to the {phase} phase.\n\
         For each candidate return exactly one item with its \"candidate\" ref, a concrete action, \
         an estimated effort (e.g. \"3 days\"), an owner role (Legal, Engineering, Security, \
         Privacy Officer, ...), measurable success criteria, and the candidate refs that must be \
         completed first as \"dependencies\"."
    )
}

fn batch_excerpt(
    clauses: &[Clause],
    risk: &RiskModel,
    candidates: &[Candidate],
    members: &[usize],
) -> String {
    let listed: Vec<Value> = members
        .iter()
        .map(|&idx| {
            let candidate = &candidates[idx];
            let findings: Vec<Value> = candidate
                .findings
                .iter()
                .map(|&f| {
                    let finding = &risk.findings[f];
                    let clause = clauses.iter().find(|clause| clause.id == finding.clause_id);
                    json!({
                        "id": finding.id,
                        "regulation": finding.regulation,
                        "kind": finding.kind,
                        "severity": finding.severity,
                        "clause_id": finding.clause_id,
                        "clause_text": clause.map(|clause| clause.text.as_str()),
                        "rationale": finding.rationale,
                        "article": finding.article,
                        "suggested_remediation": finding.suggested_remediation,
                    })
                })
                .collect();
            json!({ "candidate": candidate.reference, "findings": findings })
        })
        .collect();
    let others: Vec<&str> = candidates
        .iter()
        .map(|candidate| candidate.reference.as_str())
        .collect();
    format!(
        "Candidates:\n{:#}\n\nAll candidate refs in this plan: {}",
        Value::Array(listed),
        others.join(", ")
    )
}
