use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use beacon::config::{BeaconConfig, LoggingConfig};
use beacon::event::{Event, TraceMessageType};
use beacon::ratelimit::Category;
use beacon::transport::{SendOutcome, SendRequest, Transport};

/// How long to wait for in-flight sends before exiting.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "beacon", version, about = "Send telemetry payloads to a collector")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Collector DSN, overriding the configuration
    #[arg(long, global = true, env = "BEACON_DSN")]
    dsn: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Capture a message event
    Send {
        /// Message text
        message: String,

        /// Trace message type, mapped to the event level
        #[arg(long, value_enum)]
        kind: Option<Kind>,

        /// Trace category recorded as a tag
        #[arg(long, default_value = "default")]
        trace_category: String,

        /// Send this many copies concurrently
        #[arg(long, default_value_t = 1)]
        repeat: usize,
    },
    /// Send a pre-serialized payload file
    SendFile {
        /// Payload file
        path: PathBuf,

        /// Rate-limit category of the payload
        #[arg(long, default_value = "error")]
        category: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Log,
    Info,
    Warn,
    Error,
}

impl From<Kind> for TraceMessageType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Log => TraceMessageType::Log,
            Kind::Info => TraceMessageType::Info,
            Kind::Warn => TraceMessageType::Warn,
            Kind::Error => TraceMessageType::Error,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = BeaconConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(dsn) = cli.dsn {
        config.transport.dsn = Some(dsn);
    }

    init_tracing(&config.logging);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let transport = Transport::from_config(&config).context("building transport")?;
    info!(endpoint = ?transport.endpoint(), "Transport ready");

    let requests = match cli.command {
        Command::Send {
            message,
            kind,
            trace_category,
            repeat,
        } => {
            let mut event = Event::from_trace(message, &trace_category, kind.map(Into::into))
                .with_environment(config.transport.environment.clone());
            if let Some(release) = &config.transport.release {
                event = event.with_release(release.clone());
            }

            (0..repeat.max(1))
                .map(|_| {
                    let mut copy = event.clone();
                    copy.event_id = uuid::Uuid::new_v4().simple().to_string();
                    transport.request(Category::ERROR, copy.to_body()?)
                })
                .collect::<beacon::error::Result<Vec<SendRequest>>>()?
        }
        Command::SendFile { path, category } => {
            let body = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            vec![transport.request(Category::from(category), body)?]
        }
    };

    let sends = join_all(requests.into_iter().map(|request| transport.send(request)));

    let outcomes = tokio::select! {
        outcomes = sends => outcomes,
        _ = shutdown_signal() => {
            let drained = transport.flush(FLUSH_TIMEOUT).await;
            anyhow::bail!("interrupted before all sends settled (drained: {drained})");
        }
    };

    report(&outcomes)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn report(outcomes: &[SendOutcome]) -> anyhow::Result<()> {
    let mut failed = 0;
    for (index, outcome) in outcomes.iter().enumerate() {
        println!("#{index}: {outcome}");
        if !outcome.is_success() {
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} sends did not succeed", outcomes.len());
    }
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
