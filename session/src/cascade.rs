//! Failure handling: round timeouts and resource cascades.

use std::time::Duration;

use tracing::{info, warn};
use wavekeeper_core::{Event, ResetReason, RoundIndex, RoundPhase, RunPhase};

use crate::{timers::TimerKind, Session};

impl Session {
    /// Destroys every live agent of a round that ran past its supervisory timeout.
    pub(crate) fn round_timed_out(&mut self, index: RoundIndex, out_events: &mut Vec<Event>) {
        let Some(round) = self
            .round
            .as_mut()
            .filter(|round| round.index == index && !round.is_terminal())
        else {
            return;
        };

        round.finish(&mut self.timers, RoundPhase::TimedOut);
        let destroyed = round.registry.drain_live(&mut self.timers);
        self.counters.agents_destroyed = self
            .counters
            .agents_destroyed
            .saturating_add(u32::try_from(destroyed.len()).unwrap_or(u32::MAX));

        warn!(
            round = index.get(),
            destroyed = destroyed.len(),
            "round timed out"
        );
        out_events.extend(
            destroyed
                .into_iter()
                .map(|agent| Event::AgentDestroyed { agent }),
        );
        out_events.push(Event::RoundTimedOut { round: index });

        self.phase = RunPhase::Resetting;
        let _ = self.timers.schedule(
            self.clock,
            self.plan.tuning.reset_delay,
            TimerKind::Reset {
                reason: ResetReason::RoundTimedOut,
            },
        );
    }

    /// Starts the cascade once the last live resource of a round was destroyed.
    ///
    /// Surviving agents keep existing with frozen deadlines. Each is redirected
    /// in turn, `cascade_stagger` apart, and the grace period starts after the
    /// last redirect.
    pub(crate) fn resources_exhausted(&mut self, index: RoundIndex, out_events: &mut Vec<Event>) {
        let Some(round) = self
            .round
            .as_mut()
            .filter(|round| round.index == index && !round.is_terminal())
        else {
            return;
        };

        round.finish(&mut self.timers, RoundPhase::Lost);
        round.registry.freeze(&mut self.timers);
        let survivors = round.registry.live_agents();

        warn!(
            round = index.get(),
            survivors = survivors.len(),
            "every resource was destroyed"
        );
        out_events.push(Event::AllResourcesLost { round: index });
        self.phase = RunPhase::Resetting;

        let tuning = self.plan.tuning;
        let mut offset = Duration::ZERO;
        for agent in &survivors {
            let _ = self
                .timers
                .schedule(self.clock, offset, TimerKind::Redirect { agent: *agent });
            offset = offset.saturating_add(tuning.cascade_stagger);
        }
        let _ = self.timers.schedule(
            self.clock,
            offset.saturating_add(tuning.cascade_grace),
            TimerKind::CascadeGrace,
        );
    }

    /// Destroys the survivors of a cascade and resets the run.
    pub(crate) fn finish_cascade(&mut self, out_events: &mut Vec<Event>) {
        if let Some(round) = self.round.as_mut() {
            let destroyed = round.registry.drain_live(&mut self.timers);
            self.counters.agents_destroyed = self
                .counters
                .agents_destroyed
                .saturating_add(u32::try_from(destroyed.len()).unwrap_or(u32::MAX));
            out_events.extend(
                destroyed
                    .into_iter()
                    .map(|agent| Event::AgentDestroyed { agent }),
            );
        }
        self.full_reset(ResetReason::AllResourcesLost, out_events);
    }

    /// Tears the run down and announces the reset.
    pub(crate) fn full_reset(&mut self, reason: ResetReason, out_events: &mut Vec<Event>) {
        info!(?reason, "run reset");
        self.teardown();
        out_events.push(Event::RunReset { reason });
    }
}
