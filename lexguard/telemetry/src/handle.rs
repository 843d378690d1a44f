use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use tokio::runtime::Handle;
use uuid::Uuid;

use crate::{
    events::{EventPublisher, EventRecord},
    logging::{JsonLogger, LogLevel, LogRecord},
};

/// Collects sink settings for a [`Telemetry`] handle.
pub struct TelemetryBuilder {
    module: String,
    log_file: Option<PathBuf>,
    threshold: LogLevel,
    events: Option<Arc<dyn EventPublisher>>,
}

impl TelemetryBuilder {
    /// Builder for records attributed to `module`.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_file: None,
            threshold: LogLevel::Debug,
            events: None,
        }
    }

    /// Writes log records as JSON lines to `path`.
    #[must_use]
    pub fn log_path(self, path: impl Into<PathBuf>) -> Self {
        Self {
            log_file: Some(path.into()),
            ..self
        }
    }

    /// Drops log records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.threshold = level;
        self
    }

    /// Routes events to `publisher`.
    #[must_use]
    pub fn event_publisher(self, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            events: Some(publisher),
            ..self
        }
    }

    /// Opens the log file, if any, and returns the root handle.
    pub fn build(self) -> Result<Telemetry> {
        let logger = self
            .log_file
            .map(|path| JsonLogger::with_min_level(path, self.threshold))
            .transpose()?;
        let sinks = Sinks {
            module: self.module,
            logger,
            events: self.events,
        };
        Ok(Telemetry {
            sinks: Arc::new(sinks),
            stage: None,
            run_id: None,
        })
    }
}

struct Sinks {
    module: String,
    logger: Option<JsonLogger>,
    events: Option<Arc<dyn EventPublisher>>,
}

/// Shared handle every pipeline stage logs and publishes through.
///
/// Cloning is cheap. [`Telemetry::scoped`] and [`Telemetry::for_run`] derive
/// handles that stamp every record with a stage label or run id. Failures
/// to log or publish are reported to the caller, which normally ignores them.
#[derive(Clone)]
pub struct Telemetry {
    sinks: Arc<Sinks>,
    stage: Option<Arc<str>>,
    run_id: Option<Uuid>,
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("module", &self.sinks.module)
            .field("stage", &self.stage)
            .field("run_id", &self.run_id)
            .field("logs", &self.sinks.logger.as_ref().map(JsonLogger::path))
            .finish_non_exhaustive()
    }
}

impl Telemetry {
    /// Starts a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> TelemetryBuilder {
        TelemetryBuilder::new(module)
    }

    /// Same sinks, records stamped with `stage`.
    #[must_use]
    pub fn scoped(&self, stage: &str) -> Self {
        Self {
            stage: Some(Arc::from(stage)),
            ..self.clone()
        }
    }

    /// Same sinks, records stamped with `run_id`.
    #[must_use]
    pub fn for_run(&self, run_id: Uuid) -> Self {
        Self {
            run_id: Some(run_id),
            ..self.clone()
        }
    }

    /// Run id carried by this handle.
    #[must_use]
    pub const fn run_id(&self) -> Option<Uuid> {
        self.run_id
    }

    /// Writes a log record; `metadata` objects become the record's fields.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        let Some(logger) = &self.sinks.logger else {
            return Ok(());
        };
        let mut record = LogRecord::new(&self.sinks.module, level, message)
            .with_stage(self.stage.as_deref())
            .with_run(self.run_id);
        if let Value::Object(fields) = metadata {
            record.metadata = fields;
        }
        logger.log(&record)
    }

    /// Publishes an event.
    ///
    /// Sinks that accept events synchronously are used inline. Otherwise the
    /// publish is spawned on the ambient tokio runtime, or driven to completion
    /// on the calling thread when there is none.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        let Some(publisher) = &self.sinks.events else {
            return Ok(());
        };
        let record = EventRecord {
            id: format!("evt-{}", Uuid::new_v4()),
            source: self.source(),
            event_type: event_type.to_owned(),
            timestamp: Utc::now().to_rfc3339(),
            run_id: self.run_id,
            payload,
        };
        let record = match publisher.publish_now(record) {
            Ok(()) => return Ok(()),
            Err(pending) => pending,
        };
        match Handle::try_current() {
            Ok(runtime) => {
                let publisher = Arc::clone(publisher);
                runtime.spawn(async move {
                    if let Err(err) = publisher.publish(record).await {
                        eprintln!("lexguard: dropped event: {err:#}");
                    }
                });
                Ok(())
            }
            Err(_) => futures::executor::block_on(publisher.publish(record)),
        }
    }

    fn source(&self) -> String {
        self.stage.as_deref().map_or_else(
            || self.sinks.module.clone(),
            |stage| format!("{}.{stage}", self.sinks.module),
        )
    }
}
