use std::{fmt, sync::Arc, time::Duration};

use lexguard_telemetry::{LogLevel, Telemetry};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::{
    json,
    prompt::PromptContext,
    schema::ResponseSchema,
    transport::{OracleRequest, OracleTransport, TransportError},
};

/// Retry bounds for one typed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Repair attempts after the first schema-invalid answer.
    pub schema_retries: u32,
    /// Transport attempts per schema attempt (including the first).
    pub transport_attempts: u32,
    /// Delay before the first transport retry; doubled for each further retry.
    pub base_delay: Duration,
    /// Upper bound on a single backoff delay.
    pub max_delay: Duration,
    /// Deadline for a single transport call.
    pub request_timeout: Duration,
}

impl RetryPolicy {
    /// Backoff before transport attempt `attempt + 1`, where `attempt >= 1`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            schema_retries: 2,
            transport_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Coarse failure class, used for partial-result flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleErrorKind {
    /// Transport attempts exhausted.
    Unavailable,
    /// Answers never satisfied the schema.
    SchemaViolation,
}

/// Failure of a typed oracle call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    /// Transport attempts exhausted, or the oracle refused the request.
    #[error("oracle unavailable after {attempts} attempts: {reason}")]
    Unavailable {
        /// Transport attempts made in the final round.
        attempts: u32,
        /// Last transport error.
        reason: String,
    },
    /// Every answer violated the response schema.
    #[error("`{schema}` response invalid after {attempts} attempts: {}", .violations.join("; "))]
    SchemaViolation {
        /// Contract name.
        schema: String,
        /// Answers received.
        attempts: u32,
        /// Problems with the last answer.
        violations: Vec<String>,
    },
}

impl OracleError {
    /// Failure class.
    #[must_use]
    pub const fn kind(&self) -> OracleErrorKind {
        match self {
            Self::Unavailable { .. } => OracleErrorKind::Unavailable,
            Self::SchemaViolation { .. } => OracleErrorKind::SchemaViolation,
        }
    }
}

/// Generic typed call abstraction over an [`OracleTransport`].
///
/// Knows nothing about clauses or findings; stages pass a prompt context and a
/// contract and get back either a validated `T` or an [`OracleError`].
#[derive(Clone)]
pub struct OracleClient {
    transport: Arc<dyn OracleTransport>,
    policy: RetryPolicy,
    telemetry: Option<Telemetry>,
}

impl fmt::Debug for OracleClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleClient")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl OracleClient {
    /// Creates a client.
    #[must_use]
    pub fn new(transport: Arc<dyn OracleTransport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            telemetry: None,
        }
    }

    /// Attaches telemetry; records are stamped with the `oracle` stage.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: &Telemetry) -> Self {
        self.telemetry = Some(telemetry.scoped("oracle"));
        self
    }

    /// Active retry policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Performs a validated call and deserialises the answer into `T`.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        context: &PromptContext,
        schema: &ResponseSchema,
    ) -> Result<T, OracleError> {
        if let Err(reason) = schema.ready() {
            return Err(OracleError::SchemaViolation {
                schema: schema.name().to_owned(),
                attempts: 0,
                violations: vec![format!("contract does not compile: {reason}")],
            });
        }
        let mut context = context.clone();
        let mut last_problems = Vec::new();
        let answers = self.policy.schema_retries + 1;
        for answer in 1..=answers {
            let request = context.to_request(schema);
            let raw = self.send_with_backoff(&request).await?;
            match accept::<T>(&raw, schema) {
                Ok(parsed) => {
                    self.log(
                        LogLevel::Debug,
                        "oracle.call.accepted",
                        json!({ "task": request.task_kind, "answer": answer }),
                    );
                    return Ok(parsed);
                }
                Err(problems) => {
                    self.log(
                        LogLevel::Warn,
                        "oracle.call.schema_rejected",
                        json!({
                            "task": request.task_kind,
                            "schema": schema.name(),
                            "answer": answer,
                            "problems": problems,
                        }),
                    );
                    context.push_repair(&problems);
                    last_problems = problems;
                }
            }
        }
        self.event(
            "oracle.call.schema_violation",
            json!({ "task": context.task, "schema": schema.name() }),
        );
        Err(OracleError::SchemaViolation {
            schema: schema.name().to_owned(),
            attempts: answers,
            violations: last_problems,
        })
    }

    async fn send_with_backoff(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let attempts = self.policy.transport_attempts.max(1);
        let mut last_error = TransportError::Transport("no attempt made".into());
        let mut made = 0;
        for attempt in 1..=attempts {
            made = attempt;
            let outcome =
                tokio::time::timeout(self.policy.request_timeout, self.transport.complete(request))
                    .await
                    .unwrap_or(Err(TransportError::Timeout));
            match outcome {
                Ok(raw) => return Ok(raw),
                Err(err) if !err.is_transient() => {
                    self.log(
                        LogLevel::Error,
                        "oracle.call.refused",
                        json!({ "task": request.task_kind, "error": err.to_string() }),
                    );
                    last_error = err;
                    break;
                }
                Err(err) => {
                    self.log(
                        LogLevel::Warn,
                        "oracle.call.retry",
                        json!({
                            "task": request.task_kind,
                            "attempt": attempt,
                            "error": err.to_string(),
                        }),
                    );
                    last_error = err;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.backoff_delay(attempt)).await;
            }
        }
        self.event(
            "oracle.call.unavailable",
            json!({ "task": request.task_kind, "attempts": made }),
        );
        Err(OracleError::Unavailable {
            attempts: made,
            reason: last_error.to_string(),
        })
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

fn accept<T: DeserializeOwned>(raw: &str, schema: &ResponseSchema) -> Result<T, Vec<String>> {
    let mut value =
        json::decode(raw).map_err(|err| vec![format!("response is not valid JSON: {err}")])?;
    schema
        .validate(&mut value)
        .map_err(|violations| violations.iter().map(ToString::to_string).collect::<Vec<_>>())?;
    serde_json::from_value(value)
        .map_err(|err| vec![format!("response does not fit `{}`: {err}", schema.name())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ScriptedReply, ScriptedTransport};
    use lexguard_telemetry::MemoryEventBus;
    use schemars::JsonSchema;
    use serde_json::json;

    #[derive(Debug, PartialEq, Eq, Deserialize, JsonSchema)]
    #[serde(rename_all = "lowercase")]
    enum Label {
        Ok,
        Bad,
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Verdict {
        label: Label,
    }

    fn schema() -> ResponseSchema {
        ResponseSchema::of::<Verdict>("verdict")
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            request_timeout: Duration::from_millis(200),
            ..RetryPolicy::default()
        }
    }

    fn client(transport: &Arc<ScriptedTransport>) -> OracleClient {
        OracleClient::new(transport.clone(), fast_policy())
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn accepts_fenced_answer() {
        let transport = Arc::new(ScriptedTransport::new().reply(
            "judge",
            ScriptedReply::Text("```json\n{\"label\": \"OK\"}\n```".into()),
        ));
        let verdict: Verdict = client(&transport)
            .invoke(&PromptContext::new("judge", "Judge.", "text"), &schema())
            .await
            .unwrap();
        assert_eq!(verdict.label, Label::Ok);
    }

    #[tokio::test]
    async fn repairs_invalid_answer() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply("judge", ScriptedReply::Json(json!({ "label": "maybe" })))
                .reply("judge", ScriptedReply::Json(json!({ "label": "bad" }))),
        );
        let verdict: Verdict = client(&transport)
            .invoke(&PromptContext::new("judge", "Judge.", "text"), &schema())
            .await
            .unwrap();
        assert_eq!(verdict.label, Label::Bad);
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].context_text.contains("rejected"));
        assert!(requests[1].context_text.contains("$/label"));
        assert!(requests[1].context_text.contains("\"maybe\""));
        assert!(requests[0].schema.contains("\"label\""));
    }

    #[tokio::test]
    async fn schema_violation_after_bounded_repairs() {
        let transport = Arc::new(
            ScriptedTransport::new().always("judge", ScriptedReply::Text("not json".into())),
        );
        let err = client(&transport)
            .invoke::<Verdict>(&PromptContext::new("judge", "Judge.", "text"), &schema())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), OracleErrorKind::SchemaViolation);
        assert_eq!(transport.calls_for("judge"), 3);
    }

    #[tokio::test]
    async fn transport_failures_retry_then_recover() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply("judge", ScriptedReply::Fail("reset".into()))
                .reply("judge", ScriptedReply::Fail("reset".into()))
                .reply("judge", ScriptedReply::Json(json!({ "label": "ok" }))),
        );
        let verdict: Verdict = client(&transport)
            .invoke(&PromptContext::new("judge", "Judge.", "text"), &schema())
            .await
            .unwrap();
        assert_eq!(verdict.label, Label::Ok);
        assert_eq!(transport.calls_for("judge"), 3);
    }

    #[tokio::test]
    async fn refused_request_is_not_retried() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply("judge", ScriptedReply::Status(401))
                .always("judge", ScriptedReply::Json(json!({ "label": "ok" }))),
        );
        let err = client(&transport)
            .invoke::<Verdict>(&PromptContext::new("judge", "Judge.", "text"), &schema())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OracleError::Unavailable { attempts: 1, ref reason } if reason.contains("401")
        ));
        assert_eq!(transport.calls_for("judge"), 1);
    }

    #[tokio::test]
    async fn throttled_request_is_retried() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply("judge", ScriptedReply::Status(429))
                .reply("judge", ScriptedReply::Status(503))
                .reply("judge", ScriptedReply::Json(json!({ "label": "bad" }))),
        );
        let verdict: Verdict = client(&transport)
            .invoke(&PromptContext::new("judge", "Judge.", "text"), &schema())
            .await
            .unwrap();
        assert_eq!(verdict.label, Label::Bad);
        assert_eq!(transport.calls_for("judge"), 3);
    }

    #[tokio::test]
    async fn unavailable_after_transport_attempts() {
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = Telemetry::builder("oracle-tests")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let transport = Arc::new(
            ScriptedTransport::new().always("judge", ScriptedReply::Fail("down".into())),
        );
        let err = client(&transport)
            .with_telemetry(&telemetry)
            .invoke::<Verdict>(&PromptContext::new("judge", "Judge.", "text"), &schema())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            OracleError::Unavailable {
                attempts: 3,
                reason: "transport failure: down".into()
            }
        );
        assert_eq!(bus.event_types(), vec!["oracle.call.unavailable".to_string()]);
    }

    #[tokio::test]
    async fn hanging_call_times_out() {
        let transport = Arc::new(ScriptedTransport::new().always("judge", ScriptedReply::Hang));
        let policy = RetryPolicy {
            transport_attempts: 2,
            request_timeout: Duration::from_millis(10),
            ..fast_policy()
        };
        let err = OracleClient::new(transport, policy)
            .invoke::<Verdict>(&PromptContext::new("judge", "Judge.", "text"), &schema())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OracleError::Unavailable { attempts: 2, ref reason } if reason.contains("timed out")
        ));
    }
}
