use crate::config::SelectionPolicy;
use foundry_core::{AgentInfo, AgentStatus};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// What the coordinator knows about one agent.
#[derive(Debug, Clone)]
struct AgentEntry {
    info: AgentInfo,
    /// Task the coordinator dispatched and has not yet heard back about.
    assigned_task: Option<Uuid>,
    /// Recent outcomes, `true` for success.
    outcomes: VecDeque<bool>,
    last_seen: Instant,
}

impl AgentEntry {
    fn is_available(&self) -> bool {
        self.info.status == AgentStatus::Idle && self.assigned_task.is_none()
    }

    fn is_live(&self) -> bool {
        self.info.status != AgentStatus::Offline
    }

    fn failure_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|ok| !**ok).count();
        failures as f64 / self.outcomes.len() as f64
    }

    fn record(&self) -> AgentRecord {
        AgentRecord {
            info: self.info.clone(),
            assigned_task: self.assigned_task,
            failure_rate: self.failure_rate(),
            outcomes: self.outcomes.len(),
        }
    }
}

/// Snapshot of a registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub info: AgentInfo,
    pub assigned_task: Option<Uuid>,
    /// Failure fraction over the recent outcome window.
    pub failure_rate: f64,
    /// Outcomes in the window.
    pub outcomes: usize,
}

/// Agents known to the coordinator, keyed by endpoint.
///
/// Fed exclusively by STATUS and HEARTBEAT messages; the coordinator adds its
/// own dispatch reservations and outcome history on top.
#[derive(Debug)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentEntry>,
    window: usize,
}

impl AgentRegistry {
    pub fn new(window: usize) -> Self {
        Self {
            agents: HashMap::new(),
            window: window.max(1),
        }
    }

    /// Applies a self-reported status. Returns `true` when the endpoint was
    /// not known before.
    pub fn observe(&mut self, info: AgentInfo, now: Instant) -> bool {
        match self.agents.get_mut(&info.endpoint_id) {
            Some(entry) => {
                entry.info = info;
                entry.last_seen = now;
                false
            }
            None => {
                self.agents.insert(
                    info.endpoint_id.clone(),
                    AgentEntry {
                        info,
                        assigned_task: None,
                        outcomes: VecDeque::new(),
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    /// Reserves an agent for a dispatched task.
    pub fn reserve(&mut self, endpoint: &str, task_id: Uuid) -> bool {
        match self.agents.get_mut(endpoint) {
            Some(entry) if entry.is_available() => {
                entry.assigned_task = Some(task_id);
                true
            }
            _ => false,
        }
    }

    /// Clears the reservation if it is for `task_id`.
    pub fn release(&mut self, endpoint: &str, task_id: Uuid) -> bool {
        match self.agents.get_mut(endpoint) {
            Some(entry) if entry.assigned_task == Some(task_id) => {
                entry.assigned_task = None;
                true
            }
            _ => false,
        }
    }

    pub fn record_outcome(&mut self, endpoint: &str, success: bool) {
        if let Some(entry) = self.agents.get_mut(endpoint) {
            entry.outcomes.push_back(success);
            while entry.outcomes.len() > self.window {
                entry.outcomes.pop_front();
            }
        }
    }

    /// Marks an agent offline and returns the task it held.
    pub fn mark_offline(&mut self, endpoint: &str) -> Option<Uuid> {
        let entry = self.agents.get_mut(endpoint)?;
        entry.info.status = AgentStatus::Offline;
        entry.assigned_task.take()
    }

    /// Marks every live agent unheard for longer than `timeout` offline.
    /// Returns each expired endpoint with the task it held.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<(String, Option<Uuid>)> {
        let mut expired = Vec::new();
        for (endpoint, entry) in &mut self.agents {
            if entry.is_live() && now.saturating_duration_since(entry.last_seen) > timeout {
                entry.info.status = AgentStatus::Offline;
                expired.push((endpoint.clone(), entry.assigned_task.take()));
            }
        }
        expired.sort_by(|a, b| a.0.cmp(&b.0));
        expired
    }

    /// Picks an available agent covering `required`, skipping `exclude`.
    pub fn select(
        &self,
        required: &BTreeSet<String>,
        exclude: &BTreeSet<String>,
        policy: SelectionPolicy,
    ) -> Option<String> {
        self.agents
            .values()
            .filter(|e| e.is_available() && e.info.covers(required))
            .filter(|e| !exclude.contains(&e.info.endpoint_id))
            .min_by(|a, b| compare(a, b, policy))
            .map(|e| e.info.endpoint_id.clone())
    }

    /// Whether a live agent outside `exclude` covers `required`.
    pub fn has_alternative(&self, required: &BTreeSet<String>, exclude: &BTreeSet<String>) -> bool {
        self.agents.values().any(|e| {
            e.is_live() && !exclude.contains(&e.info.endpoint_id) && e.info.covers(required)
        })
    }

    /// `None` when one live agent covers all of `required`. Otherwise the
    /// first capability the closest live agent lacks; the closest agent has
    /// the most of `required`, ties going to the lowest endpoint.
    pub fn uncovered_capability(&self, required: &BTreeSet<String>) -> Option<String> {
        let live = || self.agents.values().filter(|e| e.is_live());
        if live().any(|e| e.info.covers(required)) {
            return None;
        }
        let held = |e: &AgentEntry| required.iter().filter(|c| e.info.has_capability(c)).count();
        let closest = live().min_by(|a, b| {
            held(*b)
                .cmp(&held(*a))
                .then_with(|| a.info.endpoint_id.cmp(&b.info.endpoint_id))
        });
        required
            .iter()
            .find(|cap| !closest.is_some_and(|e| e.info.has_capability(cap)))
            .cloned()
    }

    /// Agents that are not offline.
    pub fn live_count(&self) -> usize {
        self.agents.values().filter(|e| e.is_live()).count()
    }

    pub fn get(&self, endpoint: &str) -> Option<AgentRecord> {
        self.agents.get(endpoint).map(AgentEntry::record)
    }

    /// Every registered agent, sorted by endpoint.
    pub fn snapshot(&self) -> Vec<AgentRecord> {
        let mut records: Vec<_> = self.agents.values().map(AgentEntry::record).collect();
        records.sort_by(|a, b| a.info.endpoint_id.cmp(&b.info.endpoint_id));
        records
    }
}

/// `Less` means `a` is preferred.
fn compare(a: &AgentEntry, b: &AgentEntry, policy: SelectionPolicy) -> Ordering {
    let by_rate = a
        .failure_rate()
        .partial_cmp(&b.failure_rate())
        .unwrap_or(Ordering::Equal);
    // Most recent heartbeat first.
    let by_heartbeat = b.last_seen.cmp(&a.last_seen);
    let ordered = match policy {
        SelectionPolicy::LowestFailureRate => by_rate.then(by_heartbeat),
        SelectionPolicy::MostRecentHeartbeat => by_heartbeat.then(by_rate),
    };
    ordered.then_with(|| a.info.endpoint_id.cmp(&b.info.endpoint_id))
}
