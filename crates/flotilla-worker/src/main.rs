//! Flotilla Worker Daemon
//!
//! Speaks the wire protocol over stdin/stdout: the coordinator spawns one
//! of these per channel (directly or through the remote shell) and the
//! process exits when the channel closes. All logging goes to stderr;
//! stdout belongs to the protocol.

use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use flotilla_engine::EngineConfig;

/// Flotilla worker - executes task payloads for a coordinator
#[derive(Parser)]
#[command(name = "flotilla-worker")]
#[command(about = "Worker daemon for the Flotilla engine", long_about = None)]
struct Cli {
    /// Seconds an inner-layer worker may take to become ready
    #[arg(long, default_value_t = 10)]
    handshake_timeout_secs: u64,

    /// Seconds a nested leaf task may run before its worker counts as lost
    #[arg(long, default_value_t = 60)]
    task_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing on stderr
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    // Nested task bodies make this process a coordinator for its own
    // sub-cluster; these timeouts apply to that inner layer.
    let config = EngineConfig::new()
        .with_handshake_timeout(Duration::from_secs(cli.handshake_timeout_secs))
        .with_task_timeout(Duration::from_secs(cli.task_timeout_secs));

    info!("Starting Flotilla worker");

    match flotilla_engine::runtime::serve(tokio::io::stdin(), tokio::io::stdout(), config).await {
        Ok(()) => {
            info!("Worker exiting");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Worker exiting with protocol error");
            Err(e.into())
        }
    }
}
