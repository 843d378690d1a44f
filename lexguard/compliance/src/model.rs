use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::regulation::Regulation;

/// Immutable plain-text document handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Caller-supplied identifier.
    pub id: String,
    /// Plain text content.
    pub text: String,
    /// Kind of legal document (contract, policy, DPA, ...).
    pub doc_type: String,
    /// Original file name, when ingested from a file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl Document {
    /// Creates a contract document.
    #[must_use]
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            doc_type: "contract".into(),
            filename: None,
        }
    }

    /// Overrides the document type.
    #[must_use]
    pub fn with_doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = doc_type.into();
        self
    }

    /// Records the source file name.
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Whether the text carries anything to analyse.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Stable clause identifier (`C1`, `C2`, ...), allocated once per run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClauseId(String);

impl ClauseId {
    /// Identifier for the `n`-th clause (1-based).
    #[must_use]
    pub fn sequential(n: u32) -> Self {
        Self(format!("C{n}"))
    }

    /// Wraps an identifier reported by the oracle.
    #[must_use]
    pub fn from_reported(raw: &str) -> Self {
        Self(raw.trim().to_owned())
    }

    /// String form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClauseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Byte range of a clause inside [`Document::text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    /// Inclusive start offset.
    pub start: usize,
    /// Exclusive end offset.
    pub end: usize,
}

/// Discrete obligation or provision extracted from the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clause {
    /// Stable identifier referenced by findings.
    pub id: ClauseId,
    /// Where the clause text sits in the document, when it could be located verbatim.
    pub source_span: Option<SourceSpan>,
    /// Human reference such as "Section 4.2".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Category, e.g. "Data Retention" or "Liability".
    pub clause_type: String,
    /// Clause text as extracted.
    pub text: String,
    /// Primary obligation the clause imposes.
    pub obligation_text: String,
    /// Further obligations listed by the oracle.
    #[serde(default)]
    pub obligations: Vec<String>,
    /// Parties bound or benefited.
    #[serde(default)]
    pub parties: Vec<String>,
    /// Unstated but implied requirements.
    #[serde(default)]
    pub assumptions: Vec<String>,
    /// Severity hint given at extraction time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_potential: Option<Severity>,
}

/// Finding severity. Ordering is `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Minor issue.
    Low,
    /// Moderate issue.
    Medium,
    /// Serious issue.
    High,
    /// Severe exposure requiring immediate action.
    Critical,
}

impl Severity {
    /// Most severe first.
    pub const DESCENDING: [Self; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    /// Lower-case label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Points deducted from the compliance score per finding.
    #[must_use]
    pub const fn score_weight(self) -> u32 {
        match self {
            Self::Low => 1,
            Self::Medium => 4,
            Self::High => 10,
            Self::Critical => 25,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Nature of a compliance finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Clause explicitly contravenes the regulation.
    Violation,
    /// Required provision is missing.
    Gap,
    /// Clause contradicts another obligation.
    Conflict,
    /// Requirement met only in part.
    PartialCompliance,
}

impl FindingKind {
    /// Snake-case label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Violation => "violation",
            Self::Gap => "gap",
            Self::Conflict => "conflict",
            Self::PartialCompliance => "partial_compliance",
        }
    }
}

/// Globally unique finding identifier, namespaced by regulation (`GDPR-F3`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FindingId(String);

impl FindingId {
    /// Identifier for the `n`-th finding (1-based) of `regulation`.
    #[must_use]
    pub fn namespaced(regulation: Regulation, n: usize) -> Self {
        Self(format!("{}-F{n}", regulation.code()))
    }

    /// String form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compliance issue tying a clause to a regulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Identifier.
    pub id: FindingId,
    /// Clause the finding is about; always resolves within the run.
    pub clause_id: ClauseId,
    /// Regulation that raised it.
    pub regulation: Regulation,
    /// Nature of the issue.
    pub kind: FindingKind,
    /// Severity as assessed by the regulation's evaluation.
    pub severity: Severity,
    /// Legal reasoning.
    pub rationale: String,
    /// Cited article, e.g. "GDPR Article 17".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article: Option<String>,
    /// Potential penalties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub penalty_exposure: Option<String>,
    /// Fix proposed alongside the finding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_remediation: Option<String>,
    /// Linked findings (conflict counterparts, oracle-linked rationale).
    #[serde(default)]
    pub related_finding_ids: Vec<FindingId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_by_gravity() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(
            Severity::DESCENDING.iter().copied().max(),
            Some(Severity::Critical)
        );
    }

    #[test]
    fn ids_are_namespaced() {
        assert_eq!(ClauseId::sequential(4).as_str(), "C4");
        assert_eq!(FindingId::namespaced(Regulation::PciDss, 2).as_str(), "PCI-DSS-F2");
        assert_eq!(ClauseId::from_reported(" C7 "), ClauseId::sequential(7));
    }

    #[test]
    fn finding_kind_serialises_snake_case() {
        assert_eq!(
            serde_json::to_string(&FindingKind::PartialCompliance).unwrap(),
            "\"partial_compliance\""
        );
    }

    #[test]
    fn blank_documents_are_detected() {
        assert!(Document::new("d", " \n\t").is_blank());
        assert!(!Document::new("d", "Clause 1.").is_blank());
    }
}
