use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Severity, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Per-call detail.
    Debug,
    /// Stage progress.
    Info,
    /// Data-quality or degraded-path warnings.
    Warn,
    /// A stage or run failed.
    Error,
}

/// One line of a run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Emission time, UTC.
    pub timestamp: DateTime<Utc>,
    /// Emitting crate or binary.
    pub module: String,
    /// Pipeline stage (`extract`, `match`, `aggregate`, ...), if scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Analysis run the record belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    /// Severity.
    pub level: LogLevel,
    /// Dotted message key, e.g. `match.finding.dropped`.
    pub message: String,
    /// Structured fields, flattened from the caller's JSON object.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl LogRecord {
    /// Record stamped with the current time and no fields.
    #[must_use]
    pub fn new(module: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            module: module.into(),
            stage: None,
            run_id: None,
            level,
            message: message.into(),
            metadata: Map::new(),
        }
    }

    /// Attaches a stage label.
    #[must_use]
    pub fn with_stage(mut self, stage: Option<&str>) -> Self {
        self.stage = stage.map(str::to_owned);
        self
    }

    /// Attaches a run id.
    #[must_use]
    pub const fn with_run(mut self, run_id: Option<Uuid>) -> Self {
        self.run_id = run_id;
        self
    }
}

/// Appends [`LogRecord`]s to a file as JSON lines; safe to share across tasks.
#[derive(Debug)]
pub struct JsonLogger {
    path: PathBuf,
    min_level: LogLevel,
    writer: Mutex<File>,
}

impl JsonLogger {
    /// Logger at `path` keeping every level.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_min_level(path, LogLevel::Debug)
    }

    /// Logger at `path` that skips records below `min_level`. Parent
    /// directories are created.
    pub fn with_min_level(path: impl AsRef<Path>, min_level: LogLevel) -> Result<Self> {
        let path = path.as_ref();
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir)?,
            _ => {}
        }
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            min_level,
            writer: Mutex::new(file),
        })
    }

    /// Appends `record` unless it is below the logger's threshold.
    pub fn log(&self, record: &LogRecord) -> Result<()> {
        if record.level < self.min_level {
            return Ok(());
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.writer.lock();
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    /// Log file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_scoped_json_lines() {
        let scratch = tempdir().unwrap();
        let logger = JsonLogger::new(scratch.path().join("logs/pipeline.log")).unwrap();
        let run_id = Uuid::new_v4();
        logger
            .log(
                &LogRecord::new("compliance", LogLevel::Warn, "match.finding.dropped")
                    .with_stage(Some("match"))
                    .with_run(Some(run_id)),
            )
            .unwrap();
        let line = fs::read_to_string(logger.path()).unwrap();
        let parsed: LogRecord = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(parsed.stage.as_deref(), Some("match"));
        assert_eq!(parsed.run_id, Some(run_id));
        assert!(line.contains("\"level\":\"WARN\""));
    }

    #[test]
    fn filters_below_min_level() {
        let scratch = tempdir().unwrap();
        let logger =
            JsonLogger::with_min_level(scratch.path().join("quiet.log"), LogLevel::Info).unwrap();
        logger
            .log(&LogRecord::new("oracle", LogLevel::Debug, "oracle.call.sent"))
            .unwrap();
        logger
            .log(&LogRecord::new("oracle", LogLevel::Info, "oracle.call.accepted"))
            .unwrap();
        let written = fs::read_to_string(logger.path()).unwrap();
        assert_eq!(written.lines().count(), 1);
        assert!(written.contains("oracle.call.accepted"));
    }
}
