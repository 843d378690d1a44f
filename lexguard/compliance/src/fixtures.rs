//! Shared builders for unit tests.

use std::sync::Arc;

use lexguard_oracle::{OracleClient, ScriptedReply, ScriptedTransport};
use serde_json::{json, Value};

use crate::{
    config::{OracleSettings, PipelineConfig},
    model::{Clause, ClauseId, Finding, FindingId, FindingKind, Severity},
    regulation::Regulation,
};

pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        oracle: OracleSettings {
            schema_retries: 2,
            transport_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            request_timeout_ms: 250,
        },
        ..PipelineConfig::default()
    }
}

pub fn scripted_client(transport: &Arc<ScriptedTransport>) -> OracleClient {
    OracleClient::new(transport.clone(), fast_config().retry_policy())
}

pub fn sample_clauses() -> Vec<Clause> {
    [
        ("Data Retention", "Provider retains customer data indefinitely."),
        ("Consent", "Customer consents to all processing by signing."),
        ("Liability", "Provider liability is capped at fees paid."),
    ]
    .into_iter()
    .enumerate()
    .map(|(idx, (clause_type, text))| Clause {
        id: ClauseId::sequential(u32::try_from(idx + 1).unwrap()),
        source_span: None,
        location: Some(format!("Section {}", idx + 1)),
        clause_type: clause_type.into(),
        text: text.into(),
        obligation_text: text.into(),
        obligations: Vec::new(),
        parties: vec!["Provider".into(), "Customer".into()],
        assumptions: Vec::new(),
        risk_potential: None,
    })
    .collect()
}

pub fn clause_reply(texts: &[&str]) -> ScriptedReply {
    let clauses: Vec<Value> = texts
        .iter()
        .map(|text| {
            json!({
                "clause_type": "General",
                "text": text,
                "obligation": text,
                "parties": ["Provider"],
                "risk_potential": "Medium",
            })
        })
        .collect();
    ScriptedReply::Json(json!({ "clauses": clauses }))
}

/// Sample text whose three paragraphs match [`clause_reply`] entries.
pub const SAMPLE_TEXT: &str = "1. Provider retains customer data indefinitely.\n\n\
2. Customer consents to all processing by signing.\n\n\
3. Provider liability is capped at fees paid.";

pub fn sample_clause_reply() -> ScriptedReply {
    clause_reply(&[
        "Provider retains customer data indefinitely.",
        "Customer consents to all processing by signing.",
        "Provider liability is capped at fees paid.",
    ])
}

pub fn finding(reference: &str, clause: &str, kind: &str, severity: &str) -> Value {
    json!({
        "ref": reference,
        "clause_id": clause,
        "kind": kind,
        "severity": severity,
        "rationale": format!("{reference} breaches the regulation"),
        "article": "Article 5",
    })
}

pub fn findings_reply(findings: &[Value]) -> ScriptedReply {
    ScriptedReply::Json(json!({ "findings": findings }))
}

pub fn model_finding(
    regulation: Regulation,
    n: usize,
    clause: &str,
    kind: FindingKind,
    severity: Severity,
) -> Finding {
    Finding {
        id: FindingId::namespaced(regulation, n),
        clause_id: ClauseId::from_reported(clause),
        regulation,
        kind,
        severity,
        rationale: format!("{} issue on {clause}", regulation.code()),
        article: None,
        penalty_exposure: None,
        suggested_remediation: None,
        related_finding_ids: Vec::new(),
    }
}

pub fn plan_item(candidate: &str, action: &str, dependencies: &[&str]) -> Value {
    json!({
        "candidate": candidate,
        "action": action,
        "estimated_effort": "3 days",
        "owner": "Legal",
        "success_criteria": ["Clause amended and signed"],
        "dependencies": dependencies,
    })
}

pub fn plan_reply(items: &[Value]) -> ScriptedReply {
    ScriptedReply::Json(json!({ "items": items }))
}

pub fn explanation_reply() -> ScriptedReply {
    ScriptedReply::Json(json!({
        "problem": "Data is kept forever.",
        "why_it_matters": "Regulators fine indefinite retention.",
        "if_not_fixed": "Fines of up to 4% of turnover.",
        "how_to_fix": ["Shorten retention to 30 days", "Document deletion"],
    }))
}
