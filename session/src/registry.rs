//! Authoritative agent registry for the active round.
//!
//! The registry is the single source of truth for which agent occupies which
//! resource. Assignment happens synchronously inside [`AgentRegistry::spawn`],
//! so two spawns can never observe the same free resource.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    time::Duration,
};

use rand::Rng;
use wavekeeper_core::{AgentId, AgentSnapshot, AgentState, ResourceId, ResourceState};

use crate::{
    pool::ResourcePool,
    timers::{TimerId, TimerKind, Timers},
};

#[derive(Clone, Copy, Debug)]
struct AgentEntry {
    state: AgentState,
    resource: Option<ResourceId>,
    deadline: TimerId,
}

/// Result of resolving a freshly spawned agent against the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SpawnOutcome {
    /// The agent reserved a free resource and its deadline is running.
    Assigned {
        resource: ResourceId,
        remaining: Duration,
    },
    /// No resource was free; the deadline is frozen.
    Paused { remaining: Duration },
}

/// Result of clearing a resource.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ClearOutcome {
    /// Agents that occupied the resource.
    pub(crate) cleared: Vec<AgentId>,
    /// Whether the resource went back to the free pool.
    pub(crate) released: bool,
    /// Paused agent moved onto the freed resource, with its resumed deadline.
    pub(crate) promoted: Option<(AgentId, Duration)>,
}

/// Agents of one round and their assignments.
#[derive(Debug, Default)]
pub(crate) struct AgentRegistry {
    agents: BTreeMap<AgentId, AgentEntry>,
    occupants: BTreeMap<ResourceId, BTreeSet<AgentId>>,
    paused: VecDeque<AgentId>,
    planned: u32,
    spawned: u32,
}

impl AgentRegistry {
    pub(crate) fn set_planned(&mut self, planned: u32) {
        self.planned = planned;
    }

    /// Creates an agent and immediately resolves it against the pool.
    pub(crate) fn spawn<R: Rng + ?Sized>(
        &mut self,
        agent: AgentId,
        deadline: Duration,
        pool: &mut ResourcePool,
        timers: &mut Timers,
        rng: &mut R,
        now: Duration,
    ) -> SpawnOutcome {
        self.spawned = self.spawned.saturating_add(1);
        let timer = timers.schedule(now, deadline, TimerKind::Deadline { agent });
        let mut entry = AgentEntry {
            state: AgentState::Spawned,
            resource: None,
            deadline: timer,
        };

        let outcome = match pool.pick_free(rng) {
            Some(resource) if pool.reserve(resource) => {
                entry.state = AgentState::Assigned;
                entry.resource = Some(resource);
                let _ = self.occupants.entry(resource).or_default().insert(agent);
                SpawnOutcome::Assigned {
                    resource,
                    remaining: deadline,
                }
            }
            _ => {
                let remaining = timers.pause(timer, now).unwrap_or(deadline);
                entry.state = AgentState::Paused;
                self.paused.push_back(agent);
                SpawnOutcome::Paused { remaining }
            }
        };

        let _ = self.agents.insert(agent, entry);
        outcome
    }

    /// Clears every occupant of `resource`, frees it and promotes one paused agent.
    pub(crate) fn clear(
        &mut self,
        resource: ResourceId,
        pool: &mut ResourcePool,
        timers: &mut Timers,
        now: Duration,
    ) -> ClearOutcome {
        let cleared: Vec<AgentId> = self
            .occupants
            .remove(&resource)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        for agent in &cleared {
            if let Some(entry) = self.agents.remove(agent) {
                let _ = timers.cancel(entry.deadline);
            }
        }

        let released = pool.release(resource);
        let promoted = if pool.state(resource) == Some(ResourceState::Available) {
            self.promote(resource, pool, timers, now)
        } else {
            None
        };

        ClearOutcome {
            cleared,
            released,
            promoted,
        }
    }

    /// Untracks an agent whose deadline fired and destroys its resource.
    pub(crate) fn expire(&mut self, agent: AgentId, pool: &mut ResourcePool) -> Option<ResourceId> {
        let entry = self.agents.remove(&agent)?;
        self.paused.retain(|paused| *paused != agent);
        let resource = entry.resource?;

        if let Some(set) = self.occupants.get_mut(&resource) {
            let _ = set.remove(&agent);
            if set.is_empty() {
                let _ = self.occupants.remove(&resource);
            }
        }
        let _ = pool.destroy(resource);
        Some(resource)
    }

    /// Cancels the deadline of every live agent while keeping them tracked.
    pub(crate) fn freeze(&mut self, timers: &mut Timers) {
        for entry in self.agents.values() {
            let _ = timers.cancel(entry.deadline);
        }
    }

    /// Removes every live agent, cancelling their deadlines.
    pub(crate) fn drain_live(&mut self, timers: &mut Timers) -> Vec<AgentId> {
        self.freeze(timers);
        self.occupants.clear();
        self.paused.clear();
        std::mem::take(&mut self.agents).into_keys().collect()
    }

    /// Completion predicate of the round.
    pub(crate) fn is_complete(&self) -> bool {
        self.spawned == self.planned && self.active() == 0 && self.paused() == 0
    }

    pub(crate) fn active(&self) -> usize {
        self.count(AgentState::Assigned)
    }

    pub(crate) fn paused(&self) -> usize {
        self.count(AgentState::Paused)
    }

    pub(crate) fn live_agents(&self) -> Vec<AgentId> {
        self.agents.keys().copied().collect()
    }

    pub(crate) fn occupants_of(&self, resource: ResourceId) -> Vec<AgentId> {
        self.occupants
            .get(&resource)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn snapshots(&self, timers: &Timers, now: Duration) -> Vec<AgentSnapshot> {
        self.agents
            .iter()
            .map(|(id, entry)| AgentSnapshot {
                id: *id,
                state: entry.state,
                resource: entry.resource,
                remaining: timers.remaining(entry.deadline, now).unwrap_or_default(),
            })
            .collect()
    }

    fn promote(
        &mut self,
        resource: ResourceId,
        pool: &mut ResourcePool,
        timers: &mut Timers,
        now: Duration,
    ) -> Option<(AgentId, Duration)> {
        while let Some(agent) = self.paused.pop_front() {
            let Some(entry) = self.agents.get_mut(&agent) else {
                continue;
            };
            if entry.state != AgentState::Paused {
                continue;
            }
            if !pool.reserve(resource) {
                self.paused.push_front(agent);
                return None;
            }

            entry.state = AgentState::Assigned;
            entry.resource = Some(resource);
            let remaining = timers.resume(entry.deadline, now).unwrap_or_default();
            let _ = self.occupants.entry(resource).or_default().insert(agent);
            return Some((agent, remaining));
        }
        None
    }

    fn count(&self, state: AgentState) -> usize {
        self.agents
            .values()
            .filter(|entry| entry.state == state)
            .count()
    }
}
