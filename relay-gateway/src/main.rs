//! # Relay Gateway Binary
//!
//! Entry point: parse CLI args, initialize tracing, load configuration,
//! build the router, bind, and serve until a shutdown signal arrives.
//!
//! ```bash
//! relay-gateway --config gateway.toml --port 8080
//! ```

use clap::Parser;
use std::net::SocketAddr;

use relay_gateway::{config::Config, server::create_server};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file. A missing file falls back to
    /// built-in defaults rather than failing startup.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Overrides `[server].port` / the `PORT` environment variable.
    #[arg(short, long)]
    port: Option<u16>,

    /// Host address to bind the listener to.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// `tracing_subscriber` env-filter directive, e.g. "info" or "debug".
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let mut config = Config::load(&args.config)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    let app = create_server(config.clone()).await?;

    let addr = SocketAddr::new(args.host.parse()?, config.server.port);
    tracing::info!(%addr, "starting relay gateway");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolves when Ctrl+C (or, on Unix, SIGTERM) is received, so in-flight
/// forwards are allowed to run to their own deadline while new connections
/// stop being accepted.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
}
