//! Headless driver that pumps commands between the session and its systems.

use std::time::Duration;

use tracing::{debug, info, warn};
use wavekeeper_core::{Command, Event, ResetReason, RunPhase, SessionCounters};
use wavekeeper_session::{self as session, query, Session};
use wavekeeper_system_operator::{self as operator, Operator};
use wavekeeper_system_provisioning::{self as provisioning, Provisioning};
use wavekeeper_system_timetable::{self as timetable, Timetable};

use crate::config::Scenario;

const PROVISIONING_STREAM: u64 = 0x9e37_79b9_7f4a_7c15;
const OPERATOR_STREAM: u64 = 0xbf58_476d_1ce4_e5b9;

/// How a simulated run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Every planned round completed.
    Won {
        rounds: u32,
        counters: SessionCounters,
    },
    /// A failure tore the run down.
    Reset {
        reason: ResetReason,
        rounds_completed: u32,
    },
    /// The tick budget ran out first.
    Unfinished,
}

/// Summary of a simulated run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Report {
    pub(crate) outcome: Outcome,
    pub(crate) elapsed: Duration,
    pub(crate) missed: u32,
}

/// Session plus the reference systems that answer its events.
#[derive(Debug)]
pub(crate) struct Simulation {
    session: Session,
    timetable: Timetable,
    provisioning: Provisioning,
    operator: Operator,
    scenario: Scenario,
    rounds_completed: u32,
}

impl Simulation {
    pub(crate) fn new(scenario: Scenario) -> Self {
        let seed = scenario.tuning.seed;
        let timetable = Timetable::new(timetable::Config::new(
            scenario.tuning.first_spawn,
            scenario.tuning.spawn_window,
            seed,
        ));
        let provisioning = Provisioning::new(
            provisioning::Config::new(
                scenario.factory_placements(),
                scenario.factory.readiness,
                seed ^ PROVISIONING_STREAM,
            )
            .with_jitter(scenario.factory.jitter),
        );
        let operator = Operator::new(operator::Config::new(
            scenario.operator.reaction,
            scenario.operator.miss_rate,
            seed ^ OPERATOR_STREAM,
        ));

        Self {
            session: Session::new(),
            timetable,
            provisioning,
            operator,
            scenario,
            rounds_completed: 0,
        }
    }

    /// Starts the run and advances the clock by `tick` until it ends or `max_ticks` elapse.
    pub(crate) fn run(&mut self, tick: Duration, max_ticks: u64) -> Report {
        let spawn_points = self.scenario.spawn_points();
        let plan = self.scenario.plan();
        let mut outcome = self.submit(Command::ConfigureSpawnPoints {
            points: spawn_points,
        });
        outcome = outcome.or(self.submit(Command::StartRun { plan }));

        if query::run_phase(&self.session) == RunPhase::Idle && outcome.is_none() {
            warn!("session refused to start the run");
            return self.report(Outcome::Unfinished);
        }

        for _ in 0..max_ticks {
            if let Some(outcome) = outcome {
                return self.report(outcome);
            }
            outcome = self.submit(Command::Tick { dt: tick });
        }

        match outcome {
            Some(outcome) => self.report(outcome),
            None => {
                warn!(max_ticks, "tick budget exhausted before the run ended");
                self.report(Outcome::Unfinished)
            }
        }
    }

    fn report(&self, outcome: Outcome) -> Report {
        Report {
            outcome,
            elapsed: query::now(&self.session),
            missed: self.operator.missed(),
        }
    }

    /// Applies `command` and feeds the resulting events through every system
    /// until no further commands are produced.
    fn submit(&mut self, command: Command) -> Option<Outcome> {
        let mut outcome = None;
        let mut events = Vec::new();
        session::apply(&mut self.session, command, &mut events);

        while !events.is_empty() {
            for event in &events {
                outcome = outcome.or(self.observe(event));
            }

            let mut commands = Vec::new();
            self.timetable.handle(&events, &mut commands);
            self.provisioning.handle(&events, &mut commands);
            self.operator.handle(&events, &mut commands);

            events.clear();
            for command in commands {
                session::apply(&mut self.session, command, &mut events);
            }
        }
        outcome
    }

    fn observe(&mut self, event: &Event) -> Option<Outcome> {
        match event {
            Event::RunStarted { rounds } => info!(rounds, "run started"),
            Event::StartRejected { reason } => warn!(%reason, "run rejected"),
            Event::RoundCompleted { round } => {
                self.rounds_completed = self.rounds_completed.saturating_add(1);
                info!(round = round.get(), "round cleared");
            }
            Event::AgentExpired { agent, resource } => {
                info!(agent = agent.get(), resource = resource.get(), "resource lost");
            }
            Event::RunWon { rounds, counters } => {
                return Some(Outcome::Won {
                    rounds: *rounds,
                    counters: *counters,
                });
            }
            Event::RunReset { reason } => {
                return Some(Outcome::Reset {
                    reason: *reason,
                    rounds_completed: self.rounds_completed,
                });
            }
            Event::TimeAdvanced { .. } => {}
            other => debug!(event = ?other, "session event"),
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatorSettings;
    use wavekeeper_core::{RoundConfig, SessionTuning};

    fn scenario(rounds: Vec<RoundConfig>, operator: OperatorSettings) -> Scenario {
        Scenario {
            rounds,
            operator,
            ..Scenario::default()
        }
    }

    #[test]
    fn attentive_operator_wins_the_run() {
        let operator = OperatorSettings {
            reaction: Duration::from_millis(500),
            miss_rate: 0.0,
        };
        let mut simulation = Simulation::new(scenario(
            vec![RoundConfig::new(3, 3, 1.0), RoundConfig::new(2, 4, 1.0)],
            operator,
        ));

        let report = simulation.run(Duration::from_millis(100), 2_000);

        let Outcome::Won { rounds, counters } = report.outcome else {
            panic!("run did not end in a win: {report:?}");
        };
        assert_eq!(rounds, 2);
        assert_eq!(counters.agents_spawned, 7);
        assert_eq!(counters.agents_cleared, 7);
        assert_eq!(report.missed, 0);
    }

    #[test]
    fn absent_operator_loses_every_resource() {
        let operator = OperatorSettings {
            reaction: Duration::from_millis(500),
            miss_rate: 1.0,
        };
        let mut simulation = Simulation::new(scenario(vec![RoundConfig::new(2, 4, 1.0)], operator));

        let report = simulation.run(Duration::from_millis(100), 2_000);

        assert!(matches!(
            report.outcome,
            Outcome::Reset {
                reason: ResetReason::AllResourcesLost,
                rounds_completed: 0,
            }
        ));
        assert!(report.missed >= 2);
    }

    #[test]
    fn tick_budget_bounds_the_run() {
        let mut simulation = Simulation::new(Scenario::default());
        let report = simulation.run(Duration::from_millis(100), 5);
        assert_eq!(report.outcome, Outcome::Unfinished);
        assert_eq!(report.elapsed, Duration::from_millis(500));
    }

    #[test]
    fn same_seed_replays_identically() {
        let tuning = SessionTuning {
            seed: 77,
            ..SessionTuning::default()
        };
        let build = || {
            Simulation::new(Scenario {
                tuning,
                ..Scenario::default()
            })
        };
        let first = build().run(Duration::from_millis(100), 3_000);
        let second = build().run(Duration::from_millis(100), 3_000);
        assert_eq!(first, second);
    }
}
