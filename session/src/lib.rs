#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative session state for Wavekeeper.
//!
//! The [`Session`] is the orchestrator of a run: it owns the virtual clock,
//! every timer, the current round's resource pool and agent registry, and
//! the aggregate counters. All mutation flows through [`apply`], one command
//! at a time, so pool and registry changes happen on a single timeline.

mod cascade;
mod pool;
mod registry;
mod round;
mod timers;

use std::time::Duration;

use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};
use wavekeeper_core::{
    AgentId, ClearError, Command, Event, Placement, ResourceHandle, ResourceId, ResourceState,
    RoundIndex, RoundPhase, RunPhase, RunPlan, SessionCounters, StartError, whole_millis,
};

use crate::{
    registry::SpawnOutcome,
    round::Round,
    timers::{TimerKind, Timers},
};

/// Represents the authoritative state of one coordinator instance.
#[derive(Debug)]
pub struct Session {
    clock: Duration,
    timers: Timers,
    rng: ChaCha8Rng,
    spawn_points: Vec<Placement>,
    phase: RunPhase,
    plan: RunPlan,
    round: Option<Round>,
    counters: SessionCounters,
    next_agent: u32,
}

impl Session {
    /// Creates an idle session with no spawn points configured.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Duration::ZERO,
            timers: Timers::new(),
            rng: ChaCha8Rng::seed_from_u64(0),
            spawn_points: Vec::new(),
            phase: RunPhase::Idle,
            plan: RunPlan::default(),
            round: None,
            counters: SessionCounters::default(),
            next_agent: 0,
        }
    }

    /// Cancels every timer, discards the round and its pool, resets the
    /// counters and returns the orchestrator to [`RunPhase::Idle`].
    ///
    /// Spawn points and the clock survive a teardown.
    pub fn teardown(&mut self) {
        self.timers.clear();
        self.round = None;
        self.plan = RunPlan::default();
        self.counters = SessionCounters::default();
        self.phase = RunPhase::Idle;
    }

    fn start_run(&mut self, plan: RunPlan, out_events: &mut Vec<Event>) {
        if self.phase != RunPhase::Idle {
            warn!(phase = ?self.phase, "start requested while a run is active");
            out_events.push(Event::StartRejected {
                reason: StartError::AlreadyRunning,
            });
            return;
        }
        if let Err(reason) = plan.validate() {
            warn!(%reason, "run plan rejected");
            out_events.push(Event::StartRejected { reason });
            return;
        }

        self.rng = ChaCha8Rng::seed_from_u64(plan.tuning.seed);
        self.counters = SessionCounters::default();
        self.phase = RunPhase::Running;
        self.plan = plan;

        let rounds = self.plan.round_count();
        info!(rounds, "run started");
        out_events.push(Event::RunStarted { rounds });
        self.start_round(RoundIndex::new(0), out_events);
    }

    fn start_round(&mut self, index: RoundIndex, out_events: &mut Vec<Event>) {
        let Some(config) = self.plan.rounds.get(index.get() as usize).copied() else {
            return;
        };

        self.round = Some(Round::new(index, config));
        self.counters.resources_remaining = 0;
        self.counters.resources_destroyed = 0;

        info!(
            round = index.get(),
            resources = config.resources,
            agents = config.agents,
            speed = config.speed,
            "round started"
        );
        out_events.push(Event::RoundStarted {
            round: index,
            config,
        });
        out_events.push(Event::ResourcesRequested {
            round: index,
            count: config.resources,
            speed: config.speed,
        });
    }

    fn provide_resources(
        &mut self,
        index: RoundIndex,
        handles: Vec<ResourceHandle>,
        out_events: &mut Vec<Event>,
    ) {
        let timeout = self.plan.tuning.round_timeout();
        let Some(round) = self.round.as_mut().filter(|round| round.index == index) else {
            debug!(round = index.get(), "ignoring resources for an inactive round");
            return;
        };
        if !round.resolve(handles) {
            debug!(round = index.get(), "ignoring a second resource batch");
            return;
        }

        round.arm_timeout(&mut self.timers, self.clock, timeout);
        let resources = round.pool.live();
        if resources == 0 {
            warn!(
                round = index.get(),
                "factory produced no resources; the round can only time out"
            );
        }
        self.counters.resources_remaining = resources;
        self.counters.resources_destroyed = 0;

        info!(round = index.get(), resources, "resources ready");
        out_events.push(Event::ResourcesReady {
            round: index,
            resources,
            agents: round.config.agents,
        });
    }

    fn schedule_spawns(
        &mut self,
        index: RoundIndex,
        offsets: Vec<Duration>,
        out_events: &mut Vec<Event>,
    ) {
        let Some(round) = self.round.as_mut().filter(|round| round.index == index) else {
            debug!(round = index.get(), "ignoring timetable for an inactive round");
            return;
        };
        if offsets.len() != round.config.agents as usize {
            warn!(
                round = index.get(),
                planned = round.config.agents,
                scheduled = offsets.len(),
                "timetable size differs from the planned agent count"
            );
        }
        if !round.schedule(&offsets, &mut self.timers, self.clock) {
            debug!(round = index.get(), "ignoring timetable");
            return;
        }

        debug!(round = index.get(), spawns = offsets.len(), "spawns scheduled");
        self.check_completion(out_events);
    }

    fn clear_resource(&mut self, resource: ResourceId, out_events: &mut Vec<Event>) {
        let now = self.clock;
        let Some(round) = self.round.as_mut().filter(|round| round.accepts_clears()) else {
            reject_clear(resource, ClearError::RoundNotActive, out_events);
            return;
        };
        match round.pool.state(resource) {
            None => {
                reject_clear(resource, ClearError::UnknownResource, out_events);
                return;
            }
            Some(ResourceState::Destroyed) => {
                reject_clear(resource, ClearError::ResourceDestroyed, out_events);
                return;
            }
            Some(_) => {}
        }

        let outcome = round
            .registry
            .clear(resource, &mut round.pool, &mut self.timers, now);

        for agent in &outcome.cleared {
            debug!(agent = agent.get(), resource = resource.get(), "agent cleared");
            out_events.push(Event::AgentCleared {
                agent: *agent,
                resource,
            });
        }
        let cleared = u32::try_from(outcome.cleared.len()).unwrap_or(u32::MAX);
        self.counters.agents_cleared = self.counters.agents_cleared.saturating_add(cleared);

        if outcome.released {
            out_events.push(Event::ResourceReleased { resource });
        }
        if let Some((agent, remaining)) = outcome.promoted {
            debug!(
                agent = agent.get(),
                resource = resource.get(),
                remaining_ms = whole_millis(remaining),
                "paused agent resumed"
            );
            out_events.push(Event::AgentAssigned {
                agent,
                resource,
                remaining,
            });
        }

        self.check_completion(out_events);
    }

    fn advance(&mut self, dt: Duration, out_events: &mut Vec<Event>) {
        out_events.push(Event::TimeAdvanced { dt });
        let target = self.clock.saturating_add(dt);
        while let Some((due, kind)) = self.timers.pop_due(target) {
            self.clock = self.clock.max(due);
            self.fire(kind, out_events);
        }
        self.clock = target;
    }

    fn fire(&mut self, kind: TimerKind, out_events: &mut Vec<Event>) {
        match kind {
            TimerKind::Spawn { round } => self.spawn_agent(round, out_events),
            TimerKind::Deadline { agent } => self.expire_agent(agent, out_events),
            TimerKind::RoundTimeout { round } => self.round_timed_out(round, out_events),
            TimerKind::NextRound { round } => self.start_round(round, out_events),
            TimerKind::Redirect { agent } => {
                debug!(agent = agent.get(), "agent redirected to the neutral waypoint");
                out_events.push(Event::AgentRedirected { agent });
            }
            TimerKind::CascadeGrace => self.finish_cascade(out_events),
            TimerKind::Reset { reason } => self.full_reset(reason, out_events),
        }
    }

    fn spawn_agent(&mut self, index: RoundIndex, out_events: &mut Vec<Event>) {
        let now = self.clock;
        let base_deadline = self.plan.tuning.base_deadline;
        let Some(round) = self
            .round
            .as_mut()
            .filter(|round| round.index == index && round.phase == RoundPhase::Spawning)
        else {
            return;
        };

        let agent = AgentId::new(self.next_agent);
        self.next_agent = self.next_agent.wrapping_add(1);

        let spawn_point = self.spawn_points.choose(&mut self.rng).copied();
        if spawn_point.is_none() {
            warn!(agent = agent.get(), "no spawn points configured; agent spawns without a position");
        }

        let deadline = round.config.deadline(base_deadline);
        let outcome = round.registry.spawn(
            agent,
            deadline,
            &mut round.pool,
            &mut self.timers,
            &mut self.rng,
            now,
        );
        self.counters.agents_spawned = self.counters.agents_spawned.saturating_add(1);

        match outcome {
            SpawnOutcome::Assigned {
                resource,
                remaining,
            } => {
                debug!(agent = agent.get(), resource = resource.get(), "agent assigned");
                out_events.push(Event::AgentSpawned {
                    agent,
                    resource: Some(resource),
                    spawn_point,
                });
                out_events.push(Event::AgentAssigned {
                    agent,
                    resource,
                    remaining,
                });
            }
            SpawnOutcome::Paused { remaining } => {
                debug!(agent = agent.get(), "no free resource; agent paused");
                out_events.push(Event::AgentSpawned {
                    agent,
                    resource: None,
                    spawn_point,
                });
                out_events.push(Event::AgentPaused { agent, remaining });
            }
        }

        if round.spawn_fired() {
            debug!(round = index.get(), "every agent spawned; round draining");
        }
        self.check_completion(out_events);
    }

    fn expire_agent(&mut self, agent: AgentId, out_events: &mut Vec<Event>) {
        let Some(round) = self.round.as_mut().filter(|round| round.accepts_clears()) else {
            return;
        };
        let Some(resource) = round.registry.expire(agent, &mut round.pool) else {
            return;
        };

        let index = round.index;
        let live = round.pool.live();
        self.counters.agents_expired = self.counters.agents_expired.saturating_add(1);
        self.counters.resources_destroyed = round.pool.destroyed();
        self.counters.resources_remaining = live;

        info!(
            agent = agent.get(),
            resource = resource.get(),
            live_resources = live,
            "deadline expired; resource destroyed"
        );
        out_events.push(Event::AgentExpired { agent, resource });
        out_events.push(Event::ResourceDestroyed { resource });

        if live == 0 {
            self.resources_exhausted(index, out_events);
        } else {
            self.check_completion(out_events);
        }
    }

    fn check_completion(&mut self, out_events: &mut Vec<Event>) {
        let Some(round) = self.round.as_mut().filter(|round| round.is_complete()) else {
            return;
        };
        round.finish(&mut self.timers, RoundPhase::Complete);
        let index = round.index;
        self.counters.rounds_completed = self.counters.rounds_completed.saturating_add(1);

        info!(round = index.get(), "round complete");
        out_events.push(Event::RoundCompleted { round: index });

        let next = index.next();
        if (next.get() as usize) < self.plan.rounds.len() {
            let _ = self.timers.schedule(
                self.clock,
                self.plan.tuning.round_interval,
                TimerKind::NextRound { round: next },
            );
            return;
        }

        let counters = self.counters;
        info!(rounds = counters.rounds_completed, "run won");
        out_events.push(Event::RunWon {
            rounds: counters.rounds_completed,
            counters,
        });
        self.teardown();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

fn reject_clear(resource: ResourceId, reason: ClearError, out_events: &mut Vec<Event>) {
    warn!(resource = resource.get(), %reason, "clear rejected");
    out_events.push(Event::ClearRejected { resource, reason });
}

/// Applies the provided command to the session, mutating state deterministically.
pub fn apply(session: &mut Session, command: Command, out_events: &mut Vec<Event>) {
    match command {
        Command::ConfigureSpawnPoints { points } => {
            debug!(points = points.len(), "spawn points configured");
            session.spawn_points = points;
        }
        Command::StartRun { plan } => session.start_run(plan, out_events),
        Command::ProvideResources { round, resources } => {
            session.provide_resources(round, resources, out_events);
        }
        Command::ScheduleSpawns { round, offsets } => {
            session.schedule_spawns(round, offsets, out_events);
        }
        Command::ClearResource { resource } => session.clear_resource(resource, out_events),
        Command::Tick { dt } => session.advance(dt, out_events),
    }
}

/// Query functions that provide read-only access to the session state.
pub mod query {
    use std::time::Duration;

    use super::Session;
    use wavekeeper_core::{
        AgentSnapshot, Placement, ResourceSnapshot, RoundIndex, RoundPhase, RunPhase,
        SessionCounters,
    };

    /// Current reading of the session clock.
    #[must_use]
    pub fn now(session: &Session) -> Duration {
        session.clock
    }

    /// Phase of the orchestrator.
    #[must_use]
    pub fn run_phase(session: &Session) -> RunPhase {
        session.phase
    }

    /// Phase of the current round, or [`RoundPhase::Idle`] when none exists.
    #[must_use]
    pub fn round_phase(session: &Session) -> RoundPhase {
        session
            .round
            .as_ref()
            .map_or(RoundPhase::Idle, |round| round.phase)
    }

    /// Index of the current round, if any.
    #[must_use]
    pub fn round_index(session: &Session) -> Option<RoundIndex> {
        session.round.as_ref().map(|round| round.index)
    }

    /// Aggregate counters of the active run.
    #[must_use]
    pub fn counters(session: &Session) -> SessionCounters {
        session.counters
    }

    /// Resources the current round was provided with, destroyed ones included.
    #[must_use]
    pub fn resource_capacity(session: &Session) -> u32 {
        session
            .round
            .as_ref()
            .map_or(0, |round| round.pool.capacity())
    }

    /// Spawn points agents are currently placed at.
    #[must_use]
    pub fn spawn_points(session: &Session) -> &[Placement] {
        &session.spawn_points
    }

    /// Live agents of the current round in identifier order.
    #[must_use]
    pub fn agent_view(session: &Session) -> Vec<AgentSnapshot> {
        session.round.as_ref().map_or_else(Vec::new, |round| {
            round.registry.snapshots(&session.timers, session.clock)
        })
    }

    /// Resources of the current round with their assignment sets.
    #[must_use]
    pub fn resource_view(session: &Session) -> Vec<ResourceSnapshot> {
        let Some(round) = session.round.as_ref() else {
            return Vec::new();
        };
        round
            .pool
            .iter()
            .map(|(id, resource)| ResourceSnapshot {
                id,
                placement: resource.placement,
                state: resource.state,
                occupants: round.registry.occupants_of(id),
            })
            .collect()
    }

    /// Agents of the current round that hold a resource.
    #[must_use]
    pub fn active_agents(session: &Session) -> usize {
        session
            .round
            .as_ref()
            .map_or(0, |round| round.registry.active())
    }

    /// Agents of the current round waiting for a resource.
    #[must_use]
    pub fn paused_agents(session: &Session) -> usize {
        session
            .round
            .as_ref()
            .map_or(0, |round| round.registry.paused())
    }

    /// Timers that are running or paused.
    #[must_use]
    pub fn pending_timers(session: &Session) -> usize {
        session.timers.active()
    }
}
