//! Minimal CLI over the engine: inspect the cached state of a project, or
//! trigger a reconcile against the remote service. The wizard UI proper
//! lives elsewhere; this binary exists for local debugging and scripting.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use waypoint::remote::HttpRemote;
use waypoint::scoring::{self, ScoreLevel};
use waypoint::store::Store;
use waypoint::{sync, EngineConfig};

#[derive(Parser, Debug)]
#[command(name = "waypoint", version, about = "Project-design wizard state engine")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "WAYPOINT_CONFIG", default_value = "waypoint.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the locally cached state of a project as JSON.
    Inspect { project_id: String },
    /// Reconcile the local cache with the remote record, then print it.
    Reconcile { project_id: String },
    /// Print the readiness scores derived from the cached state.
    Scores { project_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(&cli.config);
    let store = Store::open(&config.data_dir).await?;

    match cli.command {
        Command::Inspect { project_id } => {
            let (state, meta) = sync::load_local(&store, &project_id).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            eprintln!("last sync: {} (version {})", meta.last_sync, meta.version);
        }
        Command::Reconcile { project_id } => {
            let remote = Arc::new(HttpRemote::new(&config.api_base_url)?);
            let reconciled = sync::reconcile(&store, remote.as_ref(), &project_id).await?;
            println!("{}", serde_json::to_string_pretty(&reconciled.state)?);
            eprintln!(
                "last sync: {} (version {})",
                reconciled.meta.last_sync, reconciled.meta.version
            );
            if reconciled.durability_degraded {
                eprintln!("warning: merged state could not be cached (storage full)");
            }
        }
        Command::Scores { project_id } => {
            let (state, _) = sync::load_local(&store, &project_id).await?;
            let feasibility = scoring::feasibility_score(&state.constraints);
            let suitability = scoring::suitability_score(&state.suitability_checks);
            println!(
                "feasibility: {feasibility} ({})",
                ScoreLevel::from_score(feasibility).as_str()
            );
            println!(
                "suitability: {suitability} ({})",
                ScoreLevel::from_score(suitability).as_str()
            );
        }
    }
    Ok(())
}
