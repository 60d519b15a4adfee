use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::TurnstileConfig;
use turnstile::ratelimit::{
    Decision, Limiter, LimiterMetrics, StoreBackend, Sweeper, DEFAULT_POLICY,
};

/// Check identifiers read from stdin, one per line, and print each decision
/// as a JSON line.
#[derive(Parser, Debug)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Named policy to check identifiers against
    #[arg(short, long, default_value = DEFAULT_POLICY)]
    policy: String,

    /// Override the sweep interval in milliseconds
    #[arg(long)]
    sweep_interval_ms: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Serialize)]
struct CheckOutput<'a> {
    identifier: &'a str,
    #[serde(flatten)]
    decision: Decision,
}

#[derive(Serialize)]
struct CheckFailure<'a> {
    identifier: &'a str,
    error: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries decisions.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(interval_ms) = args.sweep_interval_ms {
        config.sweeper.interval_ms = interval_ms;
        config.validate()?;
    }

    let policy = config.policy_set()?.get(&args.policy)?;
    info!(
        policy = %args.policy,
        max_requests = policy.max_requests,
        window_ms = policy.window_ms,
        store = ?config.limiter.store,
        "Configuration loaded"
    );

    let store = Arc::new(StoreBackend::from_config(&config.limiter));
    let metrics = LimiterMetrics::new();
    let limiter = Limiter::new(store.clone()).with_metrics(metrics.clone());

    let sweeper = if config.sweeper.enabled {
        let sweeper = Sweeper::new(store.clone()).with_metrics(metrics.clone());
        Some(sweeper.spawn(config.sweeper.interval())?)
    } else {
        None
    };

    let mut input = BufReader::new(tokio::io::stdin());
    let mut line = Vec::new();
    let mut stdout = tokio::io::stdout();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        line.clear();
        let read = tokio::select! {
            read = input.read_until(b'\n', &mut line) => read?,
            _ = &mut shutdown => break,
        };
        if read == 0 {
            info!("End of input");
            break;
        }

        let output = match std::str::from_utf8(&line) {
            Ok(text) => {
                let identifier = text.trim();
                if identifier.is_empty() {
                    continue;
                }

                let result = match config.limiter.on_store_error {
                    Some(fallback) => {
                        let now = limiter.clock().now();
                        limiter.check_with_fallback(identifier, &policy, now, fallback)
                    }
                    None => limiter.check_now(identifier, &policy),
                };

                match result {
                    Ok(decision) => serde_json::to_string(&CheckOutput { identifier, decision })?,
                    Err(e) => {
                        error!(key = %identifier, error = %e, "Rate limit check failed");
                        serde_json::to_string(&CheckFailure {
                            identifier,
                            error: e.to_string(),
                        })?
                    }
                }
            }
            Err(e) => {
                let lossy = String::from_utf8_lossy(&line);
                let identifier = lossy.trim();
                warn!(key = %identifier, error = %e, "Skipping identifier that is not valid UTF-8");
                serde_json::to_string(&CheckFailure {
                    identifier,
                    error: format!("identifier is not valid UTF-8: {}", e),
                })?
            }
        };

        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    }

    stdout.flush().await?;

    if let Some(handle) = sweeper {
        handle.shutdown().await;
    }

    let snapshot = metrics.snapshot();
    info!(
        allowed = snapshot.checks_allowed,
        rejected = snapshot.checks_rejected,
        store_errors = snapshot.store_errors,
        swept = snapshot.windows_swept,
        "Turnstile stopped"
    );
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
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
