//! Scriptable agent used by the unit tests in this crate.

use async_trait::async_trait;
use clusterbuster_core::{Agent, ClusterError, ClusterResult, HealthReport, Task};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub(crate) struct MockAgent {
    id: String,
    agent_type: String,
    load: AtomicU32,
    available: AtomicBool,
    healthy: AtomicBool,
    health_errors: AtomicBool,
    health_delay_ms: AtomicU64,
    fail_execute: AtomicBool,
    /// When set, `execute` parks until `release()` or cancellation.
    hold: AtomicBool,
    release: Notify,
    pub(crate) started: Notify,
    executions: AtomicU32,
    health_checks: AtomicU32,
    cancellations: AtomicU32,
}

impl MockAgent {
    pub(crate) fn new(id: &str, agent_type: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            agent_type: agent_type.to_string(),
            load: AtomicU32::new(0),
            available: AtomicBool::new(true),
            healthy: AtomicBool::new(true),
            health_errors: AtomicBool::new(false),
            health_delay_ms: AtomicU64::new(0),
            fail_execute: AtomicBool::new(false),
            hold: AtomicBool::new(false),
            release: Notify::new(),
            started: Notify::new(),
            executions: AtomicU32::new(0),
            health_checks: AtomicU32::new(0),
            cancellations: AtomicU32::new(0),
        })
    }

    pub(crate) fn with_load(self: Arc<Self>, load: u32) -> Arc<Self> {
        self.load.store(load, Ordering::SeqCst);
        self
    }

    pub(crate) fn failing(self: Arc<Self>) -> Arc<Self> {
        self.fail_execute.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn holding(self: Arc<Self>) -> Arc<Self> {
        self.hold.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub(crate) fn set_health_errors(&self, errors: bool) {
        self.health_errors.store(errors, Ordering::SeqCst);
    }

    pub(crate) fn set_health_delay(&self, delay: Duration) {
        self.health_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn release(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.release.notify_waiters();
    }

    pub(crate) fn executions(&self) -> u32 {
        self.executions.load(Ordering::SeqCst)
    }

    pub(crate) fn health_checks(&self) -> u32 {
        self.health_checks.load(Ordering::SeqCst)
    }

    pub(crate) fn cancellations(&self) -> u32 {
        self.cancellations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn agent_type(&self) -> &str {
        &self.agent_type
    }

    fn current_load(&self) -> u32 {
        self.load.load(Ordering::SeqCst)
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn execute(
        &self,
        task: &Task,
        cancellation: CancellationToken,
    ) -> ClusterResult<serde_json::Value> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let released = self.release.notified();
        tokio::pin!(released);
        released.as_mut().enable();
        self.started.notify_one();

        if self.hold.load(Ordering::SeqCst) {
            tokio::select! {
                () = released => {}
                () = cancellation.cancelled() => {
                    self.cancellations.fetch_add(1, Ordering::SeqCst);
                    return Err(ClusterError::Cancelled { task_id: task.id });
                }
            }
        }

        if self.fail_execute.load(Ordering::SeqCst) {
            return Err(ClusterError::execution(
                task.id,
                format!("{} refused the task", self.id),
            ));
        }
        Ok(serde_json::json!({ "agent": self.id, "payload": task.payload }))
    }

    async fn check_health(&self) -> ClusterResult<HealthReport> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        let delay = self.health_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.health_errors.load(Ordering::SeqCst) {
            return Err(ClusterError::health(&self.id, "health endpoint refused connection"));
        }
        if self.healthy.load(Ordering::SeqCst) {
            Ok(HealthReport::healthy())
        } else {
            Ok(HealthReport::unhealthy("degraded"))
        }
    }
}
