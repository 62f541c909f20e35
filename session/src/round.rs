//! Wave controller state for a single round.

use std::time::Duration;

use wavekeeper_core::{ResourceHandle, RoundConfig, RoundIndex, RoundPhase};

use crate::{
    pool::ResourcePool,
    registry::AgentRegistry,
    timers::{TimerId, TimerKind, Timers},
};

/// One round: its pool, its agents and the timers it owns.
#[derive(Debug)]
pub(crate) struct Round {
    pub(crate) index: RoundIndex,
    pub(crate) config: RoundConfig,
    pub(crate) phase: RoundPhase,
    pub(crate) pool: ResourcePool,
    pub(crate) registry: AgentRegistry,
    spawn_timers: Vec<TimerId>,
    pending_spawns: usize,
    timeout: Option<TimerId>,
    scheduled: bool,
    starved: bool,
}

impl Round {
    pub(crate) fn new(index: RoundIndex, config: RoundConfig) -> Self {
        Self {
            index,
            config,
            phase: RoundPhase::AwaitingResources,
            pool: ResourcePool::default(),
            registry: AgentRegistry::default(),
            spawn_timers: Vec::new(),
            pending_spawns: 0,
            timeout: None,
            scheduled: false,
            starved: false,
        }
    }

    /// Installs the factory's batch. Only the first batch is accepted.
    pub(crate) fn resolve(&mut self, handles: Vec<ResourceHandle>) -> bool {
        if self.phase != RoundPhase::AwaitingResources {
            return false;
        }
        self.starved = handles.is_empty();
        self.pool = ResourcePool::from_handles(handles);
        self.phase = RoundPhase::Spawning;
        true
    }

    pub(crate) fn arm_timeout(&mut self, timers: &mut Timers, now: Duration, timeout: Duration) {
        if let Some(previous) = self.timeout.take() {
            let _ = timers.cancel(previous);
        }
        self.timeout = Some(timers.schedule(
            now,
            timeout,
            TimerKind::RoundTimeout { round: self.index },
        ));
    }

    /// Schedules one spawn per offset. Only the first timetable is accepted.
    pub(crate) fn schedule(&mut self, offsets: &[Duration], timers: &mut Timers, now: Duration) -> bool {
        if self.phase != RoundPhase::Spawning || self.scheduled {
            return false;
        }
        self.scheduled = true;
        let round = self.index;
        self.registry
            .set_planned(u32::try_from(offsets.len()).unwrap_or(u32::MAX));
        self.spawn_timers = offsets
            .iter()
            .map(|offset| timers.schedule(now, *offset, TimerKind::Spawn { round }))
            .collect();
        self.pending_spawns = offsets.len();
        if self.pending_spawns == 0 {
            self.phase = RoundPhase::Draining;
        }
        true
    }

    /// Records a fired spawn timer. Returns `true` once the round starts draining.
    pub(crate) fn spawn_fired(&mut self) -> bool {
        self.pending_spawns = self.pending_spawns.saturating_sub(1);
        if self.pending_spawns == 0 && self.phase == RoundPhase::Spawning {
            self.phase = RoundPhase::Draining;
            return true;
        }
        false
    }

    pub(crate) fn accepts_clears(&self) -> bool {
        matches!(self.phase, RoundPhase::Spawning | RoundPhase::Draining)
    }

    pub(crate) fn is_terminal(&self) -> bool {
        matches!(
            self.phase,
            RoundPhase::Complete | RoundPhase::TimedOut | RoundPhase::Lost
        )
    }

    /// A round that never received a resource can only end through its timeout.
    pub(crate) fn is_complete(&self) -> bool {
        !self.starved && self.phase == RoundPhase::Draining && self.registry.is_complete()
    }

    /// Moves the round into a terminal phase, cancelling its timeout and pending spawns.
    pub(crate) fn finish(&mut self, timers: &mut Timers, phase: RoundPhase) {
        if let Some(timeout) = self.timeout.take() {
            let _ = timers.cancel(timeout);
        }
        for timer in self.spawn_timers.drain(..) {
            let _ = timers.cancel(timer);
        }
        self.pending_spawns = 0;
        self.phase = phase;
    }
}
