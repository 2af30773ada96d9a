//! `clusterbuster`: run an orchestrator against a pool of simulated agents.

mod config;
mod sim;

use clap::{Parser, Subcommand};
use clusterbuster_orchestrator::{Orchestrator, Supervisor};
use config::ClusterConfig;
use sim::SimulatedAgent;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clusterbuster", about = "ClusterBuster task orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "clusterbuster.toml")]
    config: PathBuf,

    /// Human-readable log lines instead of JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit the configured tasks, dispatch until the queue settles, print a snapshot
    Run,
    /// Run the supervisor loop until Ctrl-C or the given duration elapses
    Serve {
        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Validate the config and check every agent once
    Check,
}

fn init_tracing(pretty: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout is reserved for command output
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if pretty {
        builder.init();
    } else {
        builder.json().init();
    }
}

fn build_orchestrator(config: &ClusterConfig) -> Arc<Orchestrator> {
    let orchestrator = Arc::new(Orchestrator::new(config.orchestrator.clone()));
    for agent in &config.agents {
        orchestrator.register_agent(Arc::new(SimulatedAgent::from_config(agent)));
    }
    info!(agents = config.agents.len(), "Agents registered");

    for task_type in config.unserved_task_types() {
        warn!(task_type, "No configured agent serves this task type");
    }
    orchestrator
}

fn submit_all(orchestrator: &Orchestrator, config: &ClusterConfig) -> usize {
    let mut submitted = 0;
    for batch in &config.tasks {
        for task in batch.expand() {
            let priority = task.priority;
            orchestrator.submit(task, priority);
            submitted += 1;
        }
    }
    info!(submitted, "Tasks submitted");
    submitted
}

fn print_snapshot(orchestrator: &Orchestrator) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&orchestrator.to_json())?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.pretty);

    let config = ClusterConfig::load(&cli.config)?;

    match cli.command {
        Commands::Run => {
            let orchestrator = build_orchestrator(&config);
            submit_all(&orchestrator, &config);

            // Deferred entries are retried until a cycle makes no progress.
            loop {
                let report = orchestrator.run_dispatch_cycle().await;
                info!(
                    dispatched = report.outcomes.len(),
                    completed = report.completed(),
                    failed = report.failed(),
                    deferred = report.deferred(),
                    "Dispatch cycle finished"
                );
                let progressed = report.outcomes.len() > report.deferred();
                if orchestrator.queued() == 0 || !progressed {
                    break;
                }
            }

            let sweep = orchestrator.run_health_sweep().await;
            info!(
                checked = sweep.checked,
                failed = sweep.failures.len(),
                "Final health sweep finished"
            );
            print_snapshot(&orchestrator)?;
        }
        Commands::Serve { duration_secs } => {
            let orchestrator = build_orchestrator(&config);
            let supervisor = Supervisor::new(Arc::clone(&orchestrator));
            let shutdown = supervisor.shutdown_token();
            let handle = supervisor.start();

            submit_all(&orchestrator, &config);

            let deadline = async {
                match duration_secs {
                    Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("Interrupted, shutting down");
                }
                () = deadline => info!("Duration elapsed, shutting down"),
            }

            shutdown.cancel();
            handle.await?;
            print_snapshot(&orchestrator)?;
        }
        Commands::Check => {
            println!(
                "Config OK: {} agent(s), {} task(s)",
                config.agents.len(),
                config.task_count()
            );
            for task_type in config.unserved_task_types() {
                println!("  warning: no agent serves task type '{task_type}'");
            }

            let orchestrator = build_orchestrator(&config);
            let sweep = orchestrator.run_health_checks().await;
            println!("Checked {} agent(s):", sweep.checked);
            for agent_id in &sweep.healthy {
                println!("  {agent_id}: healthy");
            }
            for failure in &sweep.failures {
                println!("  {failure}");
            }
            if !sweep.all_healthy() {
                anyhow::bail!("{} agent(s) failed their health check", sweep.failures.len());
            }
        }
    }

    Ok(())
}
