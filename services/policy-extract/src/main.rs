//! Insurance policy extractor
//!
//! Turns motor-insurance policy PDFs into a fixed 42-field JSON record:
//! 1. Transcribes the PDF to plain text
//! 2. Prompts Gemini with insurer-specific extraction rules
//! 3. Retries and rotates API keys on malformed replies and rate limits
//! 4. Normalizes the reply into the output schema
//!
//! Runs one-shot from the command line (`extract`) or as an HTTP API (`serve`).

mod config;
mod error;
mod metrics;
mod output;
mod pipeline;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use backend::GeminiBackend;
use clap::{Args, Parser, Subcommand};
use extraction::Orchestrator;
use pdf_text::PdfTextSource;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::server::{AppState, Limits, ServiceMetrics};

/// Extract structured data from insurance policy PDFs
#[derive(Parser)]
#[command(name = "policy-extract")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract one policy document
    Extract(ExtractArgs),

    /// Run the HTTP API
    Serve(ServeArgs),

    /// List known insurers (document types)
    Insurers,
}

#[derive(Args)]
struct ExtractArgs {
    /// Insurer whose rules apply, e.g. "reliance"
    #[arg(short, long)]
    insurer: String,

    /// Policy PDF (or plain text file with --text)
    input: PathBuf,

    /// Directory for the result file (overrides output.dir)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the record to stdout instead of writing a file
    #[arg(long)]
    print: bool,

    /// Treat the input as already extracted text
    #[arg(long)]
    text: bool,
}

#[derive(Args)]
struct ServeArgs {
    /// Listen address (overrides server.listen_addr)
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();
}

fn load_config(cli_path: Option<&str>) -> Result<Config> {
    let (path, explicit) = Config::resolve_path(cli_path);
    info!(path = %path.display(), explicit, "loading configuration");
    Config::load_or_default(&path, explicit)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let backend = GeminiBackend::new(
        reqwest::Client::new(),
        config.backend.base_url.clone(),
        config.backend.model.clone(),
        Duration::from_secs(config.backend.timeout_secs),
    );
    let credentials = config.credentials()?;
    let registry = config.registry()?;

    info!(
        base_url = %config.backend.base_url,
        model = %config.backend.model,
        timeout_secs = config.backend.timeout_secs,
        "configuration loaded"
    );

    let orchestrator = Orchestrator::new(Arc::new(backend), credentials, registry);
    Ok(Pipeline::new(
        Arc::new(orchestrator),
        Arc::new(PdfTextSource::new()),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Extract(args) => extract(&config, args).await,
        Commands::Serve(args) => serve(&config, args).await,
        Commands::Insurers => insurers(&config),
    }
}

async fn extract(config: &Config, args: ExtractArgs) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let data = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let record = if args.text {
        let text = String::from_utf8(data)
            .with_context(|| format!("{} is not UTF-8 text", args.input.display()))?;
        pipeline.process_text(text, &args.insurer).await?
    } else {
        pipeline.process_pdf(data, &args.insurer).await?
    };

    eprintln!("{}", output::summary(&record));

    if args.print {
        println!("{}", record.to_pretty_json()?);
    } else {
        let dir = args.output.as_deref().unwrap_or(&config.output.dir);
        let path = output::write_record(&record, dir)?;
        info!(path = %path.display(), "record written");
        println!("{}", path.display());
    }
    Ok(())
}

async fn serve(config: &Config, args: ServeArgs) -> Result<()> {
    // Install before any metric is emitted
    let prometheus = metrics::install_recorder().context("failed to install metrics recorder")?;
    let pipeline = build_pipeline(config)?;

    let listen_addr = args.listen.unwrap_or(config.server.listen_addr);
    let limits = Limits {
        max_concurrent: config.server.max_concurrent,
        max_body_bytes: config
            .server
            .max_body_bytes()
            .context("max_body_mb is too large")?,
    };
    info!(
        addr = %listen_addr,
        max_concurrent = limits.max_concurrent,
        max_body_mb = config.server.max_body_mb,
        "starting policy-extract API"
    );

    let state = AppState {
        pipeline,
        metrics: ServiceMetrics::new(),
        prometheus,
    };
    let app = server::build_router(state, limits);
    server::run(app, listen_addr)
        .await
        .with_context(|| format!("server on {listen_addr} failed"))
}

fn insurers(config: &Config) -> Result<()> {
    let registry = config.registry()?;
    for profile in registry.iter() {
        println!(
            "{:<12} {:<32} {}",
            profile.id, profile.display_name, profile.canonical_name
        );
    }
    Ok(())
}
