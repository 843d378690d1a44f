use std::{
    env, fs, future,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use lexguard_compliance::{
    AnalysisReport, Audience, ComplianceRuntime, PipelineConfig, PlainTextIngestor, Regulation,
};
use lexguard_oracle::{HttpOracleConfig, HttpTransport, OracleTransport};
use lexguard_telemetry::{FileEventPublisher, LogLevel, Telemetry};
use serde::Deserialize;
use serde_json::json;
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "lexguard", version, about = "Compliance risk analysis for legal documents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyses a document and writes the full report as JSON.
    Analyze(AnalyzeArgs),
    /// Explains a finding or roadmap item from a saved report.
    Explain {
        /// Report written by `analyze`.
        #[arg(long)]
        report: PathBuf,
        /// Finding id (`GDPR-F1`) or roadmap item id (`R1`).
        #[arg(long)]
        entity: String,
        /// executive, engineer or legal.
        #[arg(long, default_value = "executive")]
        audience: Audience,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Lists supported regulations.
    Regulations,
}

#[derive(Parser, Debug)]
struct AnalyzeArgs {
    /// Plain-text document (.txt or .md).
    file: PathBuf,
    /// Regulation to evaluate; repeatable. Defaults come from the config.
    #[arg(short = 'r', long = "regulation")]
    regulations: Vec<Regulation>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the configured document type.
    #[arg(long)]
    doc_type: Option<String>,
    #[arg(long, default_value = "lexguard/logs")]
    log_dir: PathBuf,
    #[arg(long)]
    event_log: Option<PathBuf>,
    /// Report destination; stdout when omitted.
    #[arg(long)]
    output: Option<PathBuf>,
}

/// `[http]` section of the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct HttpSettings {
    endpoint: String,
    model: String,
    api_key_env: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".into(),
            model: "gemini-2.5-flash".into(),
            api_key_env: "API_KEY".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct HttpSection {
    #[serde(default)]
    http: HttpSettings,
}

struct Settings {
    pipeline: PipelineConfig,
    http: HttpSettings,
}

impl Settings {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self {
                pipeline: PipelineConfig::default(),
                http: HttpSettings::default(),
            });
        };
        let pipeline = PipelineConfig::load(path)?;
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let section: HttpSection =
            toml::from_str(&raw).with_context(|| format!("parsing [http] in {}", path.display()))?;
        Ok(Self {
            pipeline,
            http: section.http,
        })
    }

    fn transport(&self) -> Result<Arc<dyn OracleTransport>> {
        let api_key = env::var(&self.http.api_key_env).with_context(|| {
            format!(
                "environment variable {} must hold the oracle API key",
                self.http.api_key_env
            )
        })?;
        let config = HttpOracleConfig {
            endpoint: self.http.endpoint.clone(),
            model: self.http.model.clone(),
            api_key,
        };
        let timeout = Duration::from_millis(self.pipeline.oracle.request_timeout_ms);
        let transport = HttpTransport::new(config, timeout)?;
        Ok(Arc::new(transport))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Analyze(args) => handle_analyze(args),
        Commands::Explain {
            report,
            entity,
            audience,
            config,
        } => handle_explain(&report, &entity, audience, config.as_deref()),
        Commands::Regulations => {
            let mut stdout = io::stdout().lock();
            for regulation in Regulation::ALL {
                writeln!(stdout, "{:<8} {}", regulation.code(), regulation.description())?;
            }
            Ok(())
        }
    }
}

fn handle_analyze(args: AnalyzeArgs) -> Result<()> {
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(doc_type) = args.doc_type {
        settings.pipeline.document_type = doc_type;
    }
    let bytes = fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let filename = args
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("document.txt")
        .to_owned();

    let telemetry = build_telemetry(&args.log_dir, args.event_log.as_deref())?;
    let runtime = ComplianceRuntime::new(settings.transport()?, settings.pipeline)
        .with_telemetry(telemetry.clone());
    let executor = Runtime::new()?;
    let report = runtime
        .ingest(&PlainTextIngestor, &filename, &bytes)
        .and_then(|document| {
            executor.block_on(runtime.run_analysis_cancellable(
                &document,
                &args.regulations,
                interrupted(),
            ))
        });
    let report = match report {
        Ok(report) => report,
        Err(err) => {
            let _ = telemetry.log(
                LogLevel::Error,
                "cli.analyze.failed",
                json!({ "file": filename, "error": err.to_string() }),
            );
            return Err(err).with_context(|| format!("analysing {}", args.file.display()));
        }
    };

    print_summary(&report)?;
    let rendered = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, rendered).with_context(|| format!("writing {}", path.display()))?;
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

/// Resolves on Ctrl-C. Without a signal handler the run is never interrupted.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        future::pending::<()>().await;
    }
}

fn handle_explain(
    report_path: &Path,
    entity: &str,
    audience: Audience,
    config: Option<&Path>,
) -> Result<()> {
    let raw = fs::read_to_string(report_path)
        .with_context(|| format!("reading report {}", report_path.display()))?;
    let report: AnalysisReport = serde_json::from_str(&raw)
        .with_context(|| format!("parsing report {}", report_path.display()))?;
    let settings = Settings::load(config)?;
    let runtime = ComplianceRuntime::new(settings.transport()?, settings.pipeline);
    let executor = Runtime::new()?;
    let text = executor.block_on(runtime.explain(&report, entity, audience))?;
    println!("{text}");
    Ok(())
}

fn build_telemetry(log_dir: &Path, event_log: Option<&Path>) -> Result<Telemetry> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let log_path = log_dir.join(format!(
        "analysis-{}.log.jsonl",
        Utc::now().format("%Y%m%d-%H%M%S")
    ));
    let mut builder = Telemetry::builder("lexguard").log_path(log_path);
    if let Some(path) = event_log {
        builder = builder.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }
    builder.build()
}

fn print_summary(report: &AnalysisReport) -> Result<()> {
    let mut stderr = io::stderr().lock();
    writeln!(
        stderr,
        "{} clause(s), {} finding(s), compliance score {}/100, {} roadmap item(s)",
        report.clauses.len(),
        report.findings().len(),
        report.risk.compliance_score,
        report.roadmap.items.len()
    )?;
    for (regulation, row) in report.risk_aggregate().rows() {
        let cells: Vec<String> = row
            .iter()
            .rev()
            .map(|(severity, count)| format!("{severity}={count}"))
            .collect();
        writeln!(stderr, "  {:<8} {}", regulation.code(), cells.join(" "))?;
    }
    if !report.regulation_unavailable.is_empty() {
        let codes: Vec<&str> = report
            .regulation_unavailable
            .iter()
            .map(|regulation| regulation.code())
            .collect();
        writeln!(stderr, "  unavailable: {}", codes.join(", "))?;
    }
    for (regulation, summary) in report.regulation_summaries() {
        writeln!(stderr, "  {:<8} {summary}", regulation.code())?;
    }
    let review = report.roadmap.needing_review().count();
    if review > 0 {
        writeln!(stderr, "  {review} roadmap item(s) need manual review")?;
    }
    Ok(())
}
