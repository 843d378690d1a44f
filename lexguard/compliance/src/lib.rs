#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Multi-stage compliance reasoning pipeline.
//!
//! A [`ComplianceRuntime`] turns a plain-text legal document into clauses,
//! evaluates them against each selected [`Regulation`] in parallel, reconciles
//! the findings into a deterministic [`RiskModel`], and plans a prioritised
//! [`Roadmap`]. Every stage reaches the reasoning oracle through
//! [`lexguard_oracle::OracleClient`].

/// Risk aggregation and heatmap data.
pub mod aggregate;
/// Pipeline configuration.
pub mod config;
/// Error taxonomy.
pub mod error;
/// On-demand explanations.
pub mod explain;
/// Clause extraction.
pub mod extract;
/// Document ingestion.
pub mod ingest;
/// Per-regulation evaluation.
pub mod matcher;
/// Core data model.
pub mod model;
/// Remediation planning.
pub mod plan;
/// Regulation catalogue.
pub mod regulation;
/// Pipeline orchestration.
pub mod runtime;

#[cfg(test)]
mod fixtures;

pub use aggregate::{ClauseRisk, ClauseRiskEntry, RiskAggregate, RiskAggregator, RiskModel};
pub use config::{ExtractionSettings, OracleSettings, PipelineConfig};
pub use error::{ExplanationUnavailable, ExtractionError, IngestError, PipelineError};
pub use explain::{Audience, ExplainTarget, Explanation, ExplanationAdapter, UnknownAudience};
pub use extract::{ClauseExtractor, ClauseIdAllocator};
pub use ingest::{DocumentIngestor, PlainTextIngestor};
pub use matcher::{DataQualityDefect, MatchOutcome, RegulationMatcher, RegulationStatus};
pub use model::{
    Clause, ClauseId, Document, Finding, FindingId, FindingKind, Severity, SourceSpan,
};
pub use plan::{Phase, RemediationItem, RemediationPlanner, Roadmap};
pub use regulation::{Regulation, UnknownRegulation};
pub use runtime::{AnalysisReport, ComplianceRuntime};
