//! Flotilla CLI - submit batches and inspect clusters.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;

use flotilla_core::{TaskBody, Topology};
use flotilla_engine::{ClusterRegistry, EngineConfig};

/// Flotilla CLI - distributed batch execution
#[derive(Parser)]
#[command(name = "flotilla")]
#[command(about = "CLI for the Flotilla engine", long_about = None)]
struct Cli {
    /// Seconds a worker may take to become ready
    #[arg(long, default_value_t = 10)]
    handshake_timeout_secs: u64,

    /// Seconds a task may run before its worker counts as lost
    #[arg(long, default_value_t = 60)]
    task_timeout_secs: u64,

    /// Run workers as tasks inside this process instead of spawning them
    #[arg(long)]
    in_process: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect a topology's outer cluster and print each worker's state
    Status {
        /// Topology file (JSON array of cluster layers)
        topology: PathBuf,
    },

    /// Run a batch file across a topology and print the results
    Run {
        /// Topology file (JSON array of cluster layers)
        topology: PathBuf,

        /// Batch file (JSON with "body" and "inputs")
        batch: PathBuf,
    },
}

/// One batch: a task body mapped over a sequence of inputs.
#[derive(Deserialize)]
struct BatchFile {
    body: TaskBody,
    inputs: Vec<Value>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = if cli.in_process {
        EngineConfig::in_process()
    } else {
        EngineConfig::new()
    };
    config = config
        .with_handshake_timeout(Duration::from_secs(cli.handshake_timeout_secs))
        .with_task_timeout(Duration::from_secs(cli.task_timeout_secs));

    match cli.command {
        Commands::Status { topology } => {
            status(config, &topology).await?;
        }
        Commands::Run { topology, batch } => {
            run(config, &topology, &batch).await?;
        }
    }

    Ok(())
}

async fn load_topology(path: &PathBuf) -> Result<Topology, Box<dyn std::error::Error>> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

async fn status(config: EngineConfig, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let topology = load_topology(path).await?;

    let registry = ClusterRegistry::connect(&config, topology.outer()).await;
    println!("{}", registry.status_report().await);
    registry.terminate_all().await;
    Ok(())
}

async fn run(
    config: EngineConfig,
    topology_path: &PathBuf,
    batch_path: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let topology = load_topology(topology_path).await?;

    let raw = tokio::fs::read_to_string(batch_path).await?;
    let batch: BatchFile = serde_json::from_str(&raw)?;

    let results =
        flotilla_engine::submit(&config, &topology, batch.body, batch.inputs).await?;

    let failures = results.iter().filter(|r| !r.is_ok()).count();
    for result in &results {
        println!("{}", serde_json::to_string(result)?);
    }

    if failures > 0 {
        eprintln!("{} of {} task(s) failed", failures, results.len());
        std::process::exit(1);
    }
    Ok(())
}
