use std::{fmt, str::FromStr};

use lexguard_oracle::{OracleClient, PromptContext, ResponseSchema};
use lexguard_telemetry::{LogLevel, Telemetry};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::{
    error::ExplanationUnavailable,
    model::{Clause, Finding},
    plan::RemediationItem,
};

/// Reader an explanation is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    /// Business impact, no legal jargon.
    Executive,
    /// Implementation requirements and system changes.
    Engineer,
    /// Full legal analysis.
    Legal,
}

impl Audience {
    /// Lower-case label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Executive => "executive",
            Self::Engineer => "engineer",
            Self::Legal => "legal",
        }
    }

    /// Register instructions handed to the oracle.
    #[must_use]
    pub const fn instructions(self) -> &'static str {
        match self {
            Self::Executive => "Explain in business terms focusing on financial and reputational impact. Avoid legal jargon. Use clear, actionable language.",
            Self::Engineer => "Explain in technical terms focusing on implementation requirements and system changes needed. Be specific about what needs to be built or modified.",
            Self::Legal => "Provide comprehensive legal analysis with regulatory interpretations and detailed compliance requirements.",
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Unknown audience name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown audience `{0}` (expected executive, engineer or legal)")]
pub struct UnknownAudience(pub String);

impl FromStr for Audience {
    type Err = UnknownAudience;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "executive" | "exec" => Ok(Self::Executive),
            "engineer" | "engineering" => Ok(Self::Engineer),
            "legal" | "counsel" => Ok(Self::Legal),
            _ => Err(UnknownAudience(raw.to_owned())),
        }
    }
}

/// Entity being explained, with the context it needs.
#[derive(Debug, Clone)]
pub enum ExplainTarget<'a> {
    /// A finding and the clause it concerns.
    Finding {
        /// The finding.
        finding: &'a Finding,
        /// Its clause, when still available.
        clause: Option<&'a Clause>,
    },
    /// A roadmap item and the findings it resolves.
    Remediation {
        /// The item.
        item: &'a RemediationItem,
        /// Findings listed in the item.
        findings: Vec<&'a Finding>,
    },
}

impl ExplainTarget<'_> {
    /// Id of the explained entity.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Finding { finding, .. } => finding.id.as_str(),
            Self::Remediation { item, .. } => &item.id,
        }
    }

    fn excerpt(&self) -> String {
        let value = match self {
            Self::Finding { finding, clause } => json!({
                "finding": finding,
                "clause": clause,
            }),
            Self::Remediation { item, findings } => json!({
                "remediation_item": item,
                "findings": findings,
            }),
        };
        format!("Details:\n{value:#}")
    }
}

/// Four-part explanation returned by the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    /// Explained entity.
    pub entity_id: String,
    /// Target reader.
    pub audience: Audience,
    /// What the problem is, in plain language.
    pub problem: String,
    /// Real-world implications.
    pub why_it_matters: String,
    /// Consequences of leaving it unfixed.
    pub if_not_fixed: String,
    /// Actionable steps.
    pub how_to_fix: Vec<String>,
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "## {} ({} briefing)", self.entity_id, self.audience)?;
        writeln!(f)?;
        writeln!(f, "**What's the problem?**")?;
        writeln!(f, "{}", self.problem.trim())?;
        writeln!(f)?;
        writeln!(f, "**Why does it matter?**")?;
        writeln!(f, "{}", self.why_it_matters.trim())?;
        writeln!(f)?;
        writeln!(f, "**What happens if not fixed?**")?;
        writeln!(f, "{}", self.if_not_fixed.trim())?;
        writeln!(f)?;
        writeln!(f, "**How to fix it**")?;
        for step in &self.how_to_fix {
            writeln!(f, "- {}", step.trim())?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExplanationResponse {
    /// What is wrong, in plain words.
    problem: String,
    /// Why the reader should care.
    why_it_matters: String,
    /// Consequences of leaving it as is.
    if_not_fixed: String,
    /// Ordered steps.
    how_to_fix: Vec<String>,
}

/// Response contract for explanations.
#[must_use]
pub fn explanation_schema() -> ResponseSchema {
    ResponseSchema::of::<ExplanationResponse>("explanation")
}

/// Stateless on-demand explainer.
#[derive(Debug, Clone)]
pub struct ExplanationAdapter {
    client: OracleClient,
    telemetry: Option<Telemetry>,
}

impl ExplanationAdapter {
    /// Creates an adapter.
    #[must_use]
    pub const fn new(client: OracleClient) -> Self {
        Self {
            client,
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: &Telemetry) -> Self {
        self.telemetry = Some(telemetry.scoped("explain"));
        self
    }

    /// Explains `target` for `audience` with a single oracle call.
    pub async fn explain(
        &self,
        target: &ExplainTarget<'_>,
        audience: Audience,
    ) -> Result<Explanation, ExplanationUnavailable> {
        let entity_id = target.entity_id().to_owned();
        let instructions = format!(
            "You are translating a legal compliance issue for a {audience} audience.\n{}\n\
             Cover what the problem is in plain language, why it matters, what happens if it is \
             not fixed, and actionable steps to fix it. Sound like a trusted advisor.",
            audience.instructions()
        );
        let context =
            PromptContext::new(format!("explain.{audience}"), instructions, target.excerpt());
        match self
            .client
            .invoke::<ExplanationResponse>(&context, &explanation_schema())
            .await
        {
            Ok(response) => Ok(Explanation {
                entity_id,
                audience,
                problem: response.problem,
                why_it_matters: response.why_it_matters,
                if_not_fixed: response.if_not_fixed,
                how_to_fix: response.how_to_fix,
            }),
            Err(err) => {
                self.log(
                    LogLevel::Warn,
                    "explain.unavailable",
                    json!({ "entity": entity_id, "audience": audience, "error": err.to_string() }),
                );
                Err(ExplanationUnavailable {
                    entity_id,
                    reason: err.to_string(),
                })
            }
        }
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(tel) = &self.telemetry {
            let _ = tel.log(level, message, metadata);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fixtures::{explanation_reply, model_finding, sample_clauses, scripted_client},
        model::{FindingKind, Severity},
        regulation::Regulation,
    };
    use lexguard_oracle::{ScriptedReply, ScriptedTransport};
    use std::sync::Arc;

    #[test]
    fn audience_parses_case_insensitively() {
        assert_eq!("Engineer".parse::<Audience>().unwrap(), Audience::Engineer);
        assert_eq!(" LEGAL ".parse::<Audience>().unwrap(), Audience::Legal);
        assert!("board".parse::<Audience>().is_err());
    }

    #[tokio::test]
    async fn renders_markdown_for_finding() {
        let transport =
            Arc::new(ScriptedTransport::new().reply("explain.executive", explanation_reply()));
        let clauses = sample_clauses();
        let finding =
            model_finding(Regulation::Gdpr, 1, "C1", FindingKind::Violation, Severity::High);
        let target = ExplainTarget::Finding {
            finding: &finding,
            clause: clauses.first(),
        };
        let explanation = ExplanationAdapter::new(scripted_client(&transport))
            .explain(&target, Audience::Executive)
            .await
            .unwrap();
        let text = explanation.to_string();
        assert!(text.starts_with("## GDPR-F1 (executive briefing)"));
        assert!(text.contains("- Shorten retention"));
        let prompt = &transport.requests()[0].context_text;
        assert!(prompt.contains("financial and reputational impact"));
        assert!(prompt.contains("\"clause_type\""));
    }

    #[tokio::test]
    async fn failure_is_explanation_unavailable() {
        let transport = Arc::new(
            ScriptedTransport::new().always("explain.legal", ScriptedReply::Fail("down".into())),
        );
        let finding = model_finding(Regulation::Ccpa, 2, "C2", FindingKind::Gap, Severity::Low);
        let target = ExplainTarget::Finding {
            finding: &finding,
            clause: None,
        };
        let err = ExplanationAdapter::new(scripted_client(&transport))
            .explain(&target, Audience::Legal)
            .await
            .unwrap_err();
        assert_eq!(err.entity_id, "CCPA-F2");
    }
}
