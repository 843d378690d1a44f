use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Wire-level request handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    /// Task identifier.
    pub task_kind: String,
    /// JSON Schema the answer must satisfy.
    pub schema: String,
    /// Instructions, excerpt and repair notes.
    pub context_text: String,
}

impl OracleRequest {
    /// Single prompt string for text-completion backends.
    #[must_use]
    pub fn prompt(&self) -> String {
        format!(
            "{}\n\nRespond with valid JSON only, using exactly this structure:\n{}",
            self.context_text, self.schema
        )
    }
}

/// Transport-level failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The call did not finish within the request timeout.
    #[error("oracle request timed out")]
    Timeout,
    /// Connection or protocol failure.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Non-success HTTP status.
    #[error("oracle returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated by the transport).
        body: String,
    },
}

impl TransportError {
    /// Whether another attempt may succeed. Timeouts, connection failures,
    /// 408, 429 and 5xx are transient; other statuses are not.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Status { status, .. } => matches!(*status, 408 | 429 | 500..=599),
        }
    }
}

/// Side-effect-free channel to the reasoning oracle; safe to retry.
#[async_trait]
pub trait OracleTransport: Send + Sync {
    /// Sends the request and returns the raw response text.
    async fn complete(&self, request: &OracleRequest) -> Result<String, TransportError>;
}

/// Reply replayed by [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    /// Raw text, passed through unchanged.
    Text(String),
    /// JSON value, serialised.
    Json(Value),
    /// Transport failure.
    Fail(String),
    /// Non-success HTTP status with an empty body.
    Status(u16),
    /// Never completes.
    Hang,
}

#[derive(Debug, Default)]
struct Script {
    queue: VecDeque<ScriptedReply>,
    fallback: Option<ScriptedReply>,
}

/// Deterministic oracle stand-in keyed by task kind.
///
/// Queued replies are consumed in order; once a task's queue is empty its
/// `always` reply (if any) is repeated. Unscripted tasks fail at transport level.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Script>>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedTransport {
    /// Empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a one-shot reply for `task`.
    #[must_use]
    pub fn reply(self, task: &str, reply: ScriptedReply) -> Self {
        self.push(task, reply);
        self
    }

    /// Sets the reply repeated for `task` once its queue drains.
    #[must_use]
    pub fn always(self, task: &str, reply: ScriptedReply) -> Self {
        self.scripts.lock().entry(task.to_owned()).or_default().fallback = Some(reply);
        self
    }

    /// Queues a one-shot reply on a shared transport.
    pub fn push(&self, task: &str, reply: ScriptedReply) {
        self.scripts
            .lock()
            .entry(task.to_owned())
            .or_default()
            .queue
            .push_back(reply);
    }

    /// Every request received so far, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received for `task`.
    #[must_use]
    pub fn calls_for(&self, task: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.task_kind == task)
            .count()
    }

    fn next_reply(&self, task: &str) -> Option<ScriptedReply> {
        let mut scripts = self.scripts.lock();
        let script = scripts.get_mut(task)?;
        script.queue.pop_front().or_else(|| script.fallback.clone())
    }
}

#[async_trait]
impl OracleTransport for ScriptedTransport {
    async fn complete(&self, request: &OracleRequest) -> Result<String, TransportError> {
        self.requests.lock().push(request.clone());
        match self.next_reply(&request.task_kind) {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Json(value)) => Ok(value.to_string()),
            Some(ScriptedReply::Fail(reason)) => Err(TransportError::Transport(reason)),
            Some(ScriptedReply::Status(status)) => Err(TransportError::Status {
                status,
                body: String::new(),
            }),
            Some(ScriptedReply::Hang) => std::future::pending().await,
            None => Err(TransportError::Transport(format!(
                "no scripted reply for task `{}`",
                request.task_kind
            ))),
        }
    }
}
