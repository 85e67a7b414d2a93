// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Fortuna - command-line host for the pooled generator
//!
//! Starts a pooled generator over the local entropy sources (plus any remote
//! services given on the command line), waits for the first seed and writes
//! random bytes to stdout. Logs go to stderr as JSON.
//!
//! ```text
//! ┌──────────────┐   poll    ┌──────────────┐   bytes   ┌──────────┐
//! │   Sources    │ ────────> │    Pooled    │ ────────> │  stdout  │
//! │ (local/web)  │           │  generator   │           └──────────┘
//! └──────────────┘           └──────────────┘
//!                                   │ checkpoint
//!                                   v
//!                            ┌──────────────┐
//!                            │  state file  │
//!                            └──────────────┘
//! ```
//!
//! With `--continuous` it keeps emitting one chunk per interval and logging
//! metrics until SIGINT/SIGTERM, then stops cleanly with a final checkpoint.

use anyhow::{Context, Result};
use base64::Engine;
use clap::{Parser, ValueEnum};
use fortuna_core::sources::{
    self, ExternalWebConfig, ExternalWebSource, ResponseFormat,
};
use fortuna_core::{GeneratorConfig, PooledEntropyGenerator, TextFileStateStore};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};
use url::Url;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Hex,
    Base64,
    Raw,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WebFormat {
    Raw,
    Hex,
}

impl From<WebFormat> for ResponseFormat {
    fn from(format: WebFormat) -> Self {
        match format {
            WebFormat::Raw => ResponseFormat::Raw,
            WebFormat::Hex => ResponseFormat::Hex,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "fortuna")]
#[command(about = "Fortuna pooled generator - emits continuously reseeded random bytes", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Bytes per output chunk
    #[arg(short, long, default_value_t = 32)]
    bytes: usize,

    /// Output encoding
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Hex)]
    format: OutputFormat,

    /// Checkpoint file restored on start and written on reseed, periodically and on exit
    #[arg(short, long)]
    state_file: Option<PathBuf>,

    /// YAML configuration file (default: FORTUNA_* environment variables)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Remote randomness service to use as an extra source (repeatable)
    #[arg(long = "web-source")]
    web_sources: Vec<Url>,

    /// Response body format of the remote services
    #[arg(long, value_enum, default_value_t = WebFormat::Raw)]
    web_format: WebFormat,

    /// Keep emitting until interrupted
    #[arg(long)]
    continuous: bool,

    /// Delay between chunks in continuous mode, in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Metrics log interval in continuous mode, in seconds
    #[arg(long, default_value_t = 60)]
    metrics_interval_secs: u64,
}

fn load_config(args: &Args) -> Result<GeneratorConfig> {
    match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            GeneratorConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))
        }
        None => {
            info!("Loading configuration from environment variables");
            GeneratorConfig::from_env().context("Failed to load configuration from environment")
        }
    }
}

fn build_generator(args: &Args, config: GeneratorConfig) -> Result<PooledEntropyGenerator> {
    let mut builder = PooledEntropyGenerator::builder()
        .config(config)
        .sources(sources::default_local_sources());

    for (i, url) in args.web_sources.iter().enumerate() {
        let mut web = ExternalWebConfig::new(format!("Web{}", i + 1), url.clone());
        web.format = args.web_format.into();
        let source = ExternalWebSource::new(web)
            .with_context(|| format!("Invalid web source {}", url))?;
        info!("  Web source {}: {}", i + 1, url);
        builder = builder.source(Arc::new(source));
    }

    if let Some(path) = &args.state_file {
        info!("State file: {}", path.display());
        builder = builder.state_store(Arc::new(TextFileStateStore::new(path)));
    }

    Ok(builder.build()?)
}

fn emit(generator: &PooledEntropyGenerator, args: &Args, out: &mut impl Write) -> Result<()> {
    let bytes = generator.random_bytes(args.bytes)?;
    match args.format {
        OutputFormat::Hex => writeln!(out, "{}", hex::encode(&bytes))?,
        OutputFormat::Base64 => writeln!(
            out,
            "{}",
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        )?,
        OutputFormat::Raw => out.write_all(&bytes)?,
    }
    out.flush()?;
    Ok(())
}

/// Main run loop
async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    info!(
        linear_pools = config.linear_pool_count,
        random_pools = config.random_pool_count,
        primitive = ?config.primitive,
        "Configuration loaded"
    );

    let generator = build_generator(&args, config)?;
    info!("Configured {} source(s)", generator.source_names().len());

    generator
        .start_and_wait_for_seed()
        .await
        .context("Generator failed to seed")?;

    let mut stdout = std::io::stdout().lock();
    let result = if args.continuous {
        run_continuous(&generator, &args, &mut stdout).await
    } else {
        emit(&generator, &args, &mut stdout)
    };
    drop(stdout);

    if let Err(e) = &result {
        error!("Output failed: {:#}", e);
    }

    generator.stop().await.context("Failed to stop generator")?;
    info!(metrics = ?generator.metrics().snapshot(), "Final metrics");
    result
}

async fn run_continuous(
    generator: &PooledEntropyGenerator,
    args: &Args,
    out: &mut impl Write,
) -> Result<()> {
    let mut emit_ticker = interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut metrics_ticker = interval(Duration::from_secs(args.metrics_interval_secs.max(1)));
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping generator...");
                return Ok(());
            }
            _ = emit_ticker.tick() => emit(generator, args, out)?,
            _ = metrics_ticker.tick() => {
                info!(
                    state = ?generator.state(),
                    metrics = ?generator.metrics().snapshot(),
                    "Generator metrics"
                );
            }
        }
    }
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use futures::stream::StreamExt;
        use signal_hook::consts::signal::*;
        use signal_hook_tokio::Signals;

        match Signals::new([SIGINT, SIGTERM]) {
            Ok(mut signals) => {
                if let Some(signal) = signals.next().await {
                    info!("Received signal: {:?}", signal);
                }
            }
            Err(e) => {
                error!("Failed to register signal handlers: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(windows)]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing; stdout carries only random output
    let log_level = args
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .json()
        .init();

    info!("Fortuna v{}", fortuna_core::VERSION);

    run(args).await
}
