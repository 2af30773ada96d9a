use crate::engine::Orchestrator;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Background driver for an [`Orchestrator`].
///
/// Runs a dispatch cycle every `dispatch.dispatch_interval_ms` and whenever
/// a task is submitted. Dispatch cycles never overlap each other. Health
/// checks run on their own task every `health.sweep_interval_ms`, and each
/// failed agent's recovery is spawned, so a hung execution never holds up
/// the probing that would recover it.
pub struct Supervisor {
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops both loops once their current work is done.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn the supervisor. Await the handle after cancelling the shutdown
    /// token to wait for the last dispatch cycle and any running recoveries.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let config = self.orchestrator.config();
            info!(
                dispatch_interval_ms = config.dispatch.dispatch_interval_ms,
                sweep_interval_ms = config.health.sweep_interval_ms,
                "Supervisor started"
            );

            let sweeps = tokio::spawn(sweep_loop(
                Arc::clone(&self.orchestrator),
                self.shutdown.clone(),
            ));
            self.dispatch_loop().await;
            if let Err(e) = sweeps.await {
                warn!(error = %e, "Health sweep loop ended abnormally");
            }
            info!("Supervisor stopped");
        })
    }

    async fn dispatch_loop(&self) {
        let mut ticker = interval(Duration::from_millis(
            self.orchestrator.config().dispatch.dispatch_interval_ms.max(1),
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                () = self.orchestrator.submissions().notified() => self.dispatch().await,
                _ = ticker.tick() => self.dispatch().await,
            }
        }
    }

    async fn dispatch(&self) {
        let report = self.orchestrator.run_dispatch_cycle().await;
        if !report.outcomes.is_empty() {
            info!(
                dispatched = report.outcomes.len(),
                completed = report.completed(),
                failed = report.failed(),
                deferred = report.deferred(),
                "Dispatch cycle finished"
            );
        }
    }
}

async fn sweep_loop(orchestrator: Arc<Orchestrator>, shutdown: CancellationToken) {
    let mut ticker = interval(Duration::from_millis(
        orchestrator.config().health.sweep_interval_ms.max(1),
    ));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut recoveries = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            Some(joined) = recoveries.join_next(), if !recoveries.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "Recovery task ended abnormally");
                }
            }
            _ = ticker.tick() => {
                let report = orchestrator.run_health_checks().await;
                if report.all_healthy() {
                    continue;
                }
                warn!(
                    checked = report.checked,
                    failed = report.failures.len(),
                    "Health sweep found failing agents"
                );
                // concurrent passes over one agent are safe: each job is claimed once
                for agent_id in report.failed_agents() {
                    let orchestrator = Arc::clone(&orchestrator);
                    let agent_id = agent_id.to_string();
                    recoveries.spawn(async move {
                        orchestrator.handle_agent_failure(&agent_id).await
                    });
                }
            }
        }
    }

    while let Some(joined) = recoveries.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Recovery task ended abnormally");
        }
    }
}
