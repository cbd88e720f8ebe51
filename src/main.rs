//! songgen: song-generation API service and container health monitor.
//!
//! This is the application entry point. It loads configuration from an
//! optional TOML file and the environment, initializes tracing, and then runs
//! one of the subcommands: the HTTP service, a single health probe, or the
//! health monitor loop.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use songgen::config::{LogFormat, ServiceConfig, DEFAULT_LOG_FILTER};
use songgen::http::{bind, shutdown_signal, start_server};
use songgen::monitor::{probe_once, HealthMonitor, HealthStatus, HttpProber, MonitorSettings};
use songgen::routes::create_router;
use songgen::state::AppState;
use songgen::{backend, storage};

/// songgen: song-generation API with container health monitoring
#[derive(Parser, Debug)]
#[command(name = "songgen", version, about)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter (e.g., "songgen=debug,tower_http=info")
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve {
        /// Bind address, overrides HOST
        #[arg(long)]
        host: Option<String>,

        /// Listen port, overrides PORT
        #[arg(long)]
        port: Option<u16>,
    },

    /// Probe the health endpoint once; exit 0 when healthy, 1 otherwise
    Check {
        /// Health endpoint URL (default: derived from the HTTP config)
        #[arg(long)]
        url: Option<String>,

        /// Per-probe budget in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Probe the health endpoint on an interval and report transitions
    Monitor {
        /// Health endpoint URL (default: derived from the HTTP config)
        #[arg(long)]
        url: Option<String>,

        /// Seconds between probes
        #[arg(long)]
        interval: Option<u64>,

        /// Per-probe budget in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Seconds during which failures do not count
        #[arg(long)]
        start_period: Option<u64>,

        /// Consecutive failures before the target is unhealthy
        #[arg(long)]
        retries: Option<u32>,

        /// Exit with status 1 at the first unhealthy report
        #[arg(long)]
        exit_on_unhealthy: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration before tracing so the log format can come from it
    let config = ServiceConfig::load(args.config.as_deref());
    let format = config
        .as_ref()
        .map(|c| c.logging.format)
        .unwrap_or_default();

    // Initialize tracing with priority: CLI > env > default
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    init_tracing(&log_filter, format);

    let mut config = config.inspect_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
    })?;
    tracing::info!(config = ?args.config, "Loaded configuration");

    match args.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
    }) {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.http.host = host;
            }
            if let Some(port) = port {
                config.http.port = port;
            }
            config.validate()?;
            serve(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { url, timeout } => {
            let url = url.unwrap_or_else(|| config.health_url());
            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.health.timeout());
            let request_timeout = config.health.request_timeout().min(timeout);

            let prober = HttpProber::new(&url, request_timeout)?;
            match probe_once(&prober, timeout).await {
                Ok(()) => {
                    tracing::info!(%url, "Healthy");
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    tracing::warn!(%url, error = %e, "Unhealthy");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Monitor {
            url,
            interval,
            timeout,
            start_period,
            retries,
            exit_on_unhealthy,
        } => {
            let health = &mut config.health;
            if let Some(interval) = interval {
                health.interval_seconds = interval;
            }
            if let Some(timeout) = timeout {
                health.timeout_seconds = timeout;
                health.request_timeout_seconds = health.request_timeout_seconds.min(timeout);
            }
            if let Some(start_period) = start_period {
                health.start_period_seconds = start_period;
            }
            if let Some(retries) = retries {
                health.retries = retries;
            }
            config.validate()?;

            let url = url.unwrap_or_else(|| config.health_url());
            let prober = HttpProber::new(&url, config.health.request_timeout())?;
            let report = HealthMonitor::new(prober, MonitorSettings::from(&config.health))
                .stop_on_unhealthy(exit_on_unhealthy)
                .run(shutdown_signal())
                .await;

            if exit_on_unhealthy && report.status == HealthStatus::Unhealthy {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn init_tracing(filter: &str, format: LogFormat) {
    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(filter));

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Run the API process until SIGTERM or Ctrl+C.
async fn serve(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Directories first: a missing mount must stop us before we accept traffic
    storage::prepare_directories(&config.storage)?;
    tracing::info!(
        output_dir = %config.storage.output_dir.display(),
        cache_dir = %config.storage.cache_dir.display(),
        "Directories ready"
    );

    let backend = backend::from_config(&config);
    if backend.is_available() {
        tracing::info!(
            backend = backend.name(),
            max_concurrent = config.generation.max_concurrent,
            "Generation backend configured"
        );
    } else {
        tracing::warn!("No generation backend configured; generation routes will answer 503");
    }

    let addr = config.bind_addr()?;
    let listener = bind(addr).await?;

    if config.http.api_key.is_some() {
        tracing::info!("API key required for generation routes");
    }
    tracing::info!(
        health = %config.health.path,
        base_url = %config.public_base_url(),
        "Service ready"
    );

    let state = AppState::new(config, backend);
    let app = create_router(state);
    start_server(listener, app, shutdown_signal()).await?;

    Ok(())
}
