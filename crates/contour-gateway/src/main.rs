//! Contour Gateway
//!
//! HTTP relay in front of the contour compute executable: accepts a JSON
//! payload on `POST /compute`, runs the executable with the payload on its
//! stdin, and relays the resulting JSON (or failure) back to the caller.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use contour_core::{ComputeRelay, RelayConfig};
use contour_gateway::routes::{AppState, build_router};

#[derive(Parser, Debug)]
#[command(name = "contour-gateway")]
#[command(version, about = "HTTP relay for the contour compute executable")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:5000", env = "CONTOUR_ADDR")]
    addr: SocketAddr,

    /// Path to the compute executable (invoked with no arguments)
    #[arg(
        long,
        default_value = "./build/tukey_compute",
        env = "CONTOUR_EXECUTABLE"
    )]
    executable: PathBuf,

    /// Seconds to wait for a compute run before killing it (0 = no limit)
    #[arg(long, default_value_t = 0, env = "CONTOUR_COMPUTE_TIMEOUT")]
    compute_timeout: u64,

    /// Maximum accepted request body size in bytes
    #[arg(long, default_value_t = 10 * 1024 * 1024, env = "CONTOUR_MAX_BODY_BYTES")]
    max_body_bytes: usize,

    /// Log level filter for the gateway (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "CONTOUR_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "CONTOUR_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = format!(
        "contour_gateway={level},contour_core={level}",
        level = args.log_level
    );
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter),
    );
    if args.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        executable = %args.executable.display(),
        "Starting contour-gateway"
    );

    if !args.executable.exists() {
        warn!(
            executable = %args.executable.display(),
            "Compute executable not found; requests will fail until it is in place"
        );
    }

    let mut config = RelayConfig::new(args.executable);
    if args.compute_timeout > 0 {
        config = config.with_timeout(Duration::from_secs(args.compute_timeout));
    }

    let state = AppState {
        relay: Arc::new(ComputeRelay::new(config)),
        max_body_bytes: args.max_body_bytes,
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    info!(addr = %args.addr, "Gateway ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    info!("Gateway stopped");
    Ok(())
}
