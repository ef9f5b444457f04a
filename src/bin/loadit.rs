//! loadit binary.
//!
//! Starts `--count` simulated agents against `--backends` and keeps them
//! connected until SIGINT or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! loadit --count 5000 --backends ws://backend-1:8081,ws://backend-2:8081
//!
//! # Second machine, continuing the name range
//! LOADIT_ENTITY_OFFSET=5000 loadit --count 5000
//! ```

use anyhow::Context;
use clap::Parser;
use loadit::{
    Introspection, Population, ProcessEnv, RunFlags, RunPlan, WsAgentFactory, VERSION,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "loadit")]
#[command(version = VERSION)]
#[command(about = "Simulate a population of monitoring agents against a backend", long_about = None)]
struct Cli {
    #[command(flatten)]
    flags: RunFlags,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let plan = RunPlan::resolve(cli.flags, &ProcessEnv).context("invalid configuration")?;
    init_logging(&plan.log_level);

    let _introspection =
        Introspection::start(&plan).context("failed to start introspection endpoints")?;

    // Fires on every exit path, including the error returns below.
    let cancel = CancellationToken::new();
    let _release = cancel.clone().drop_guard();

    let factory = WsAgentFactory::new();
    let (mut population, report) = Population::launch(&plan, &factory, cancel)?;
    print!("{report}");

    let signal = population
        .run_until(loadit::wait_for_shutdown())
        .await?;

    tracing::info!(%signal, agents = population.len(), "shutting down");
    Ok(())
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}
