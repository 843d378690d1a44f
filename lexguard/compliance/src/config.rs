use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use lexguard_oracle::RetryPolicy;
use serde::{Deserialize, Serialize};

use crate::regulation::Regulation;

/// Pipeline tuning loaded from TOML. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent oracle calls per fan-out stage.
    pub max_concurrency: usize,
    /// Regulations evaluated when the caller selects none.
    pub default_regulations: Vec<Regulation>,
    /// Document type assumed for ingested files.
    pub document_type: String,
    /// Oracle retry bounds.
    pub oracle: OracleSettings,
    /// Clause extraction settings.
    pub extraction: ExtractionSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            default_regulations: vec![Regulation::Gdpr, Regulation::Hipaa, Regulation::Ccpa],
            document_type: "contract".into(),
            oracle: OracleSettings::default(),
            extraction: ExtractionSettings::default(),
        }
    }
}

/// Retry and timeout settings, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSettings {
    /// Repair attempts after the first schema-invalid answer.
    pub schema_retries: u32,
    /// Transport attempts per answer.
    pub transport_attempts: u32,
    /// Backoff base.
    pub base_delay_ms: u64,
    /// Backoff cap.
    pub max_delay_ms: u64,
    /// Per-call deadline.
    pub request_timeout_ms: u64,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            schema_retries: 2,
            transport_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 4_000,
            request_timeout_ms: 60_000,
        }
    }
}

/// Clause extraction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Upper bound on the bytes of document text sent per extraction call.
    pub max_chunk_chars: usize,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            max_chunk_chars: 15_000,
        }
    }
}

const MIN_CHUNK_CHARS: usize = 256;

impl PipelineConfig {
    /// Loads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field bounds.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            bail!("max_concurrency must be at least 1");
        }
        if self.oracle.transport_attempts == 0 {
            bail!("oracle.transport_attempts must be at least 1");
        }
        if self.oracle.base_delay_ms > self.oracle.max_delay_ms {
            bail!(
                "oracle.base_delay_ms ({}) exceeds oracle.max_delay_ms ({})",
                self.oracle.base_delay_ms,
                self.oracle.max_delay_ms
            );
        }
        if self.extraction.max_chunk_chars < MIN_CHUNK_CHARS {
            bail!("extraction.max_chunk_chars must be at least {MIN_CHUNK_CHARS}");
        }
        Ok(())
    }

    /// Retry policy handed to the oracle client.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            schema_retries: self.oracle.schema_retries,
            transport_attempts: self.oracle.transport_attempts,
            base_delay: Duration::from_millis(self.oracle.base_delay_ms),
            max_delay: Duration::from_millis(self.oracle.max_delay_ms),
            request_timeout: Duration::from_millis(self.oracle.request_timeout_ms),
        }
    }
}
