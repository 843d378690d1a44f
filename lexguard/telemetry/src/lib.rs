#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Structured JSON-lines logging, pipeline events and the shared telemetry handle
//! used by every lexguard stage.

/// Event bus abstractions (in-memory broadcast and file-backed sinks).
pub mod events;
/// Telemetry handle combining the logger and an event publisher.
pub mod handle;
/// JSON-lines log records and the append-only file logger.
pub mod logging;

pub use events::{EventPublisher, EventRecord, EventSubscriber, FileEventPublisher, MemoryEventBus};
pub use handle::{Telemetry, TelemetryBuilder};
pub use logging::{JsonLogger, LogLevel, LogRecord};
