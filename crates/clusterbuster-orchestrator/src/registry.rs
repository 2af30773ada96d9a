use crate::types::AgentStatus;
use clusterbuster_core::Agent;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// A registered agent plus the bookkeeping the orchestrator keeps for it.
pub struct AgentSlot {
    agent: Arc<dyn Agent>,
    /// Dispatches issued by this orchestrator that have not finished.
    in_flight: AtomicU32,
    /// Result of the latest health check.
    healthy: AtomicBool,
}

impl AgentSlot {
    fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            in_flight: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    pub fn id(&self) -> &str {
        self.agent.id()
    }

    /// Load used for selection: what the agent reports plus our own dispatches.
    pub fn load(&self) -> u32 {
        self.agent
            .current_load()
            .saturating_add(self.in_flight.load(Ordering::SeqCst))
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn is_candidate(&self, task_type: &str) -> bool {
        self.agent.agent_type() == task_type && self.is_healthy() && self.agent.is_available()
    }

    fn status(&self) -> AgentStatus {
        AgentStatus {
            id: self.agent.id().to_string(),
            agent_type: self.agent.agent_type().to_string(),
            reported_load: self.agent.current_load(),
            in_flight: self.in_flight(),
            available: self.agent.is_available(),
            healthy: self.is_healthy(),
        }
    }
}

/// An agent picked for one dispatch. Counts toward the agent's load until dropped.
pub struct Reservation {
    slot: Arc<AgentSlot>,
}

impl Reservation {
    fn new(slot: Arc<AgentSlot>) -> Self {
        slot.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { slot }
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        self.slot.agent()
    }

    pub fn agent_id(&self) -> &str {
        self.slot.id()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.slot.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("agent_id", &self.agent_id())
            .finish()
    }
}

/// Every known agent, keyed by identity.
///
/// Iteration is in ascending id order, which makes the selector's tie-break
/// deterministic: among equally loaded candidates the lowest id wins.
pub struct AgentRegistry {
    agents: RwLock<BTreeMap<String, Arc<AgentSlot>>>,
    /// Serializes select-then-reserve so concurrent dispatches see each other.
    selection: Mutex<()>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(BTreeMap::new()),
            selection: Mutex::new(()),
        }
    }

    /// Register an agent, replacing any agent with the same id.
    pub fn register(&self, agent: Arc<dyn Agent>) -> Option<Arc<dyn Agent>> {
        let id = agent.id().to_string();
        let agent_type = agent.agent_type().to_string();
        let previous = self
            .agents
            .write()
            .insert(id.clone(), Arc::new(AgentSlot::new(agent)));
        match &previous {
            Some(_) => warn!(agent_id = %id, agent_type = %agent_type, "Replaced registered agent"),
            None => info!(agent_id = %id, agent_type = %agent_type, "Registered agent"),
        }
        previous.map(|slot| Arc::clone(slot.agent()))
    }

    /// Remove an agent. Jobs still assigned to it are left alone; the
    /// health monitor is what fails them over.
    pub fn unregister(&self, id: &str) -> Option<Arc<dyn Agent>> {
        let removed = self.agents.write().remove(id);
        if removed.is_some() {
            info!(agent_id = %id, "Unregistered agent");
        }
        removed.map(|slot| Arc::clone(slot.agent()))
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.read().get(id).map(|slot| Arc::clone(slot.agent()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.read().contains_key(id)
    }

    /// Pick the least-loaded available, healthy agent of `task_type`.
    ///
    /// `None` means there is no candidate; that is an expected result, not a fault.
    pub fn select_agent(&self, task_type: &str) -> Option<Arc<dyn Agent>> {
        let agents = self.agents.read();
        pick(agents.values(), task_type, &HashSet::new()).map(|slot| Arc::clone(slot.agent()))
    }

    /// Select like [`select_agent`](Self::select_agent), skipping `excluded`
    /// ids, and count the pick toward the agent's load in the same step.
    pub fn reserve(&self, task_type: &str, excluded: &HashSet<String>) -> Option<Reservation> {
        let _serial = self.selection.lock();
        let agents = self.agents.read();
        pick(agents.values(), task_type, excluded).map(|slot| Reservation::new(Arc::clone(slot)))
    }

    /// Record a health check result. Unhealthy agents are skipped by the selector
    /// until a later check succeeds. Returns `false` for unknown ids.
    pub fn set_healthy(&self, id: &str, healthy: bool) -> bool {
        match self.agents.read().get(id) {
            Some(slot) => {
                slot.healthy.store(healthy, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn is_healthy(&self, id: &str) -> Option<bool> {
        self.agents.read().get(id).map(|slot| slot.is_healthy())
    }

    /// Snapshot of the registered agents, for probing without holding the lock.
    pub fn agents(&self) -> Vec<Arc<dyn Agent>> {
        self.agents
            .read()
            .values()
            .map(|slot| Arc::clone(slot.agent()))
            .collect()
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.read().keys().cloned().collect()
    }

    pub fn statuses(&self) -> Vec<AgentStatus> {
        self.agents.read().values().map(|slot| slot.status()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// First minimum wins, so ties resolve to iteration order.
fn pick<'a>(
    slots: impl Iterator<Item = &'a Arc<AgentSlot>>,
    task_type: &str,
    excluded: &HashSet<String>,
) -> Option<&'a Arc<AgentSlot>> {
    slots
        .filter(|slot| slot.is_candidate(task_type) && !excluded.contains(slot.id()))
        .min_by_key(|slot| slot.load())
}
