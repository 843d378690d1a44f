use std::{
    collections::VecDeque,
    io::Write as _,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncWriteExt, sync::broadcast};
use uuid::Uuid;

/// Pipeline milestone, one JSON object per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// `evt-<uuid>`.
    pub id: String,
    /// Emitting module and stage, e.g. `lexguard.match`.
    pub source: String,
    /// Dotted type such as `match.regulation.unavailable`.
    pub event_type: String,
    /// RFC 3339 emission time.
    pub timestamp: String,
    /// Analysis run the event belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    /// Event-specific details.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Sink for pipeline events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Delivers `event`, performing I/O if the sink needs it.
    async fn publish(&self, event: EventRecord) -> Result<()>;

    /// Delivers `event` without awaiting.
    ///
    /// Sinks that cannot do so return the event so the caller can fall back to
    /// [`EventPublisher::publish`].
    fn publish_now(&self, event: EventRecord) -> Result<(), EventRecord> {
        Err(event)
    }
}

/// Live event feed.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Receiver observing every event delivered after the call.
    async fn subscribe(&self) -> Result<broadcast::Receiver<EventRecord>>;
}

/// In-process bus: broadcasts live and keeps the most recent events.
#[derive(Debug, Clone)]
pub struct MemoryEventBus {
    live: broadcast::Sender<EventRecord>,
    retained: Arc<Mutex<VecDeque<EventRecord>>>,
    limit: usize,
}

impl MemoryEventBus {
    /// Bus retaining at most `limit` events (at least one).
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            live: broadcast::channel(limit).0,
            retained: Arc::new(Mutex::new(VecDeque::with_capacity(limit))),
            limit,
        }
    }

    /// Retained events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.retained.lock().iter().cloned().collect()
    }

    /// Retained event types, oldest first.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.retained
            .lock()
            .iter()
            .map(|event| event.event_type.clone())
            .collect()
    }

    /// Retained events stamped with `run_id`.
    #[must_use]
    pub fn for_run(&self, run_id: Uuid) -> Vec<EventRecord> {
        self.retained
            .lock()
            .iter()
            .filter(|event| event.run_id == Some(run_id))
            .cloned()
            .collect()
    }

    fn retain(&self, event: EventRecord) {
        let mut retained = self.retained.lock();
        while retained.len() >= self.limit {
            retained.pop_front();
        }
        retained.push_back(event.clone());
        drop(retained);
        // no subscribers is fine
        let _ = self.live.send(event);
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, event: EventRecord) -> Result<()> {
        self.retain(event);
        Ok(())
    }

    fn publish_now(&self, event: EventRecord) -> Result<(), EventRecord> {
        self.retain(event);
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for MemoryEventBus {
    async fn subscribe(&self) -> Result<broadcast::Receiver<EventRecord>> {
        Ok(self.live.subscribe())
    }
}

/// Durable run log: appends each event as a JSON line.
#[derive(Debug, Clone)]
pub struct FileEventPublisher {
    path: PathBuf,
}

impl FileEventPublisher {
    /// Publisher writing to `path`; parent directories are created eagerly.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)?,
            _ => {}
        }
        Ok(Self { path })
    }

    /// Destination file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn encode(event: &EventRecord) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        Ok(line)
    }

    fn append_blocking(&self, event: &EventRecord) -> Result<()> {
        let line = Self::encode(event)?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(&line)?;
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for FileEventPublisher {
    async fn publish(&self, event: EventRecord) -> Result<()> {
        let line = Self::encode(&event)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    // One short append; a run's last events survive the executor shutting
    // down before spawned publishes finish.
    fn publish_now(&self, event: EventRecord) -> Result<(), EventRecord> {
        self.append_blocking(&event).map_err(|_| event)
    }
}
