//! SQL Tools service host entry point.
//!
//! Serves framed JSON-RPC on stdin/stdout. The process exits with status 0
//! when the client sent `shutdown` before `exit`, and 1 otherwise.

use anyhow::Result;
use sqltools_host::shutdown::install_signal_handlers;
use sqltools_host::{Channel, HostConfig, ServiceHost};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging to stderr (stdout is reserved for JSON-RPC)
    init_logging();

    std::panic::set_hook(Box::new(|info| {
        error!("panic: {}", info);
    }));

    let config = HostConfig::from_env()?;
    info!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        shutdown_timeout_secs = config.shutdown_timeout.as_secs(),
        "Configuration loaded"
    );

    let service = ServiceHost::new(config)?;
    install_signal_handlers(service.host().shutdown_controller().clone()).await;

    service.start(Channel::stdio())?;
    service.wait_for_exit().await;

    let snapshot = service.metrics().snapshot();
    let code = if service.shutdown_requested() { 0 } else { 1 };
    info!(
        exit_code = code,
        requests = snapshot.requests_dispatched,
        success_rate = snapshot.success_rate(),
        "Service host exiting"
    );

    // The blocking stdin reader cannot be cancelled, so leave without
    // waiting for the runtime to wind down.
    std::process::exit(code);
}

/// Initialize tracing subscriber with stderr output.
///
/// Logs MUST go to stderr because stdout is used for JSON-RPC communication.
fn init_logging() {
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("warn,sqltools_host=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
