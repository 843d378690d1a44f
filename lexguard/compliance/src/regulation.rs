use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Regulatory regime a document can be assessed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Regulation {
    /// EU General Data Protection Regulation.
    #[serde(rename = "GDPR")]
    Gdpr,
    /// US Health Insurance Portability and Accountability Act.
    #[serde(rename = "HIPAA")]
    Hipaa,
    /// California Consumer Privacy Act.
    #[serde(rename = "CCPA")]
    Ccpa,
    /// System and Organization Controls 2.
    #[serde(rename = "SOC2")]
    Soc2,
    /// Payment Card Industry Data Security Standard.
    #[serde(rename = "PCI-DSS")]
    PciDss,
}

impl Regulation {
    /// Every supported regulation, in catalogue order.
    pub const ALL: [Self; 5] = [Self::Gdpr, Self::Hipaa, Self::Ccpa, Self::Soc2, Self::PciDss];

    /// Canonical code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Gdpr => "GDPR",
            Self::Hipaa => "HIPAA",
            Self::Ccpa => "CCPA",
            Self::Soc2 => "SOC2",
            Self::PciDss => "PCI-DSS",
        }
    }

    /// Scope of the regulation as presented to the oracle.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Gdpr => "EU General Data Protection Regulation: data subject rights, consent, data minimization, retention limits, right to erasure, breach notification",
            Self::Hipaa => "Health Insurance Portability and Accountability Act: privacy of protected health information, administrative/physical/technical safeguards, breach notification",
            Self::Ccpa => "California Consumer Privacy Act: consumer rights to know, delete, and opt out of the sale of personal information",
            Self::Soc2 => "System and Organization Controls 2: security, availability, processing integrity, confidentiality, privacy",
            Self::PciDss => "Payment Card Industry Data Security Standard: protection of cardholder data, secure networks, access control, monitoring",
        }
    }

    /// Reasoning template for the per-regulation evaluation.
    #[must_use]
    pub fn reasoning_template(self) -> String {
        format!(
            "You are an expert compliance analyst assessing contract clauses against {code}.\n\
             Scope: {scope}.\n\
             Review every clause below and report each issue as a finding:\n\
             - \"violation\": the clause explicitly contravenes {code};\n\
             - \"gap\": {code} requires something the clause omits;\n\
             - \"conflict\": the clause's obligation contradicts another obligation in the document;\n\
             - \"partial_compliance\": the clause meets {code} only in part.\n\
             Give every finding a short unique \"ref\" (F1, F2, ...). A conflict must list the refs of \
             the contradicting findings in \"conflicts_with\"; report both sides of a conflict.\n\
             Use only clause ids that appear below. Cite the article where possible and ground the \
             rationale in the clause text. Report no findings when the clauses comply.",
            code = self.code(),
            scope = self.description(),
        )
    }
}

impl fmt::Display for Regulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Unknown regulation code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown regulation `{0}` (expected one of GDPR, HIPAA, CCPA, SOC2, PCI-DSS)")]
pub struct UnknownRegulation(pub String);

impl FromStr for Regulation {
    type Err = UnknownRegulation;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let folded: String = raw
            .trim()
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match folded.as_str() {
            "GDPR" => Ok(Self::Gdpr),
            "HIPAA" => Ok(Self::Hipaa),
            "CCPA" => Ok(Self::Ccpa),
            "SOC2" => Ok(Self::Soc2),
            "PCIDSS" => Ok(Self::PciDss),
            _ => Err(UnknownRegulation(raw.to_owned())),
        }
    }
}

/// Removes duplicates while keeping first occurrences in place.
#[must_use]
pub fn dedup_preserving_order(regulations: &[Regulation]) -> Vec<Regulation> {
    let mut seen = Vec::with_capacity(regulations.len());
    for regulation in regulations {
        if !seen.contains(regulation) {
            seen.push(*regulation);
        }
    }
    seen
}
