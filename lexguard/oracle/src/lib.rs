#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Reasoning oracle client: every pipeline stage talks to the external model
//! through [`OracleClient::invoke`], which validates the untrusted response
//! against a [`ResponseSchema`] generated from the expected Rust type, asks for
//! repairs, and retries transient transport failures with exponential backoff.

/// Retrying, validating client.
pub mod client;
/// Gemini-compatible HTTP transport.
pub mod http;
/// Raw response decoding helpers.
pub mod json;
/// Prompt context passed to the oracle.
pub mod prompt;
/// Response contracts generated with `schemars` and enforced with `jsonschema`.
pub mod schema;
/// Transport abstraction and the scripted test double.
pub mod transport;

pub use client::{OracleClient, OracleError, OracleErrorKind, RetryPolicy};
pub use http::{HttpOracleConfig, HttpTransport};
pub use prompt::PromptContext;
pub use schema::{ResponseSchema, SchemaViolation};
pub use transport::{
    OracleRequest, OracleTransport, ScriptedReply, ScriptedTransport, TransportError,
};
