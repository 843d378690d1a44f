use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::Severity;

/// Days charged to the open-ended long-term phase when estimating a timeline.
const LONG_TERM_DAYS: u32 = 180;

/// Delivery window of a remediation item, derived from its severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Critical items, within a week.
    Immediate,
    /// High items, within a month.
    ShortTerm,
    /// Medium items, within a quarter.
    MediumTerm,
    /// Low items, continuous improvement.
    LongTerm,
}

impl Phase {
    /// Phase for an item of the given severity.
    #[must_use]
    pub const fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Critical => Self::Immediate,
            Severity::High => Self::ShortTerm,
            Severity::Medium => Self::MediumTerm,
            Severity::Low => Self::LongTerm,
        }
    }

    /// Deadline in days; `None` for continuous work.
    #[must_use]
    pub const fn window_days(self) -> Option<u32> {
        match self {
            Self::Immediate => Some(7),
            Self::ShortTerm => Some(30),
            Self::MediumTerm => Some(90),
            Self::LongTerm => None,
        }
    }

    /// Days this phase contributes to a roadmap timeline estimate.
    #[must_use]
    pub const fn timeline_days(self) -> u32 {
        match self.window_days() {
            Some(days) => days,
            None => LONG_TERM_DAYS,
        }
    }

    /// Human label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Immediate => "Immediate (0-7 days)",
            Self::ShortTerm => "Short-term (7-30 days)",
            Self::MediumTerm => "Medium-term (30-90 days)",
            Self::LongTerm => "Long-term (continuous)",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
