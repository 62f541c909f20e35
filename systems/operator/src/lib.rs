#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Simulated operator that clears occupied resources after a reaction delay.
//!
//! Stands in for the input layer: every assignment is noticed with
//! probability `1 - miss_rate` and, once the reaction time has elapsed, the
//! resource is cleared through `Command::ClearResource`.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;
use wavekeeper_core::{AgentId, Command, Event, ResourceId};

/// Configuration parameters required to construct the operator system.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    reaction: Duration,
    miss_rate: f64,
    rng_seed: u64,
}

impl Config {
    /// Creates a new configuration.
    ///
    /// `miss_rate` is clamped to `[0, 1]`; non-finite values disable misses.
    #[must_use]
    pub fn new(reaction: Duration, miss_rate: f64, rng_seed: u64) -> Self {
        let miss_rate = if miss_rate.is_finite() {
            miss_rate.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            reaction,
            miss_rate,
            rng_seed,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Watch {
    agent: AgentId,
    resource: ResourceId,
    remaining: Duration,
}

/// Pure system that reacts to assignments with delayed clear requests.
#[derive(Debug)]
pub struct Operator {
    reaction: Duration,
    miss_rate: f64,
    rng: ChaCha8Rng,
    watches: Vec<Watch>,
    missed: u32,
}

impl Operator {
    /// Creates a new operator using the supplied configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            reaction: config.reaction,
            miss_rate: config.miss_rate,
            rng: ChaCha8Rng::seed_from_u64(config.rng_seed),
            watches: Vec::new(),
            missed: 0,
        }
    }

    /// Assignments the operator is currently reacting to.
    #[must_use]
    pub fn watching(&self) -> usize {
        self.watches.len()
    }

    /// Assignments the operator failed to notice.
    #[must_use]
    pub fn missed(&self) -> u32 {
        self.missed
    }

    /// Consumes events and emits clear requests whose reaction time elapsed.
    pub fn handle(&mut self, events: &[Event], out: &mut Vec<Command>) {
        for event in events {
            match event {
                Event::AgentAssigned {
                    agent, resource, ..
                } => self.notice(*agent, *resource),
                Event::TimeAdvanced { dt } => self.react(*dt, out),
                Event::AgentCleared { agent, .. }
                | Event::AgentExpired { agent, .. }
                | Event::AgentDestroyed { agent } => {
                    self.watches.retain(|watch| watch.agent != *agent);
                }
                Event::RoundTimedOut { .. }
                | Event::AllResourcesLost { .. }
                | Event::RunReset { .. } => self.watches.clear(),
                _ => {}
            }
        }
    }

    fn notice(&mut self, agent: AgentId, resource: ResourceId) {
        if self.miss_rate > 0.0 && self.rng.gen_bool(self.miss_rate) {
            self.missed = self.missed.saturating_add(1);
            debug!(agent = agent.get(), resource = resource.get(), "operator missed assignment");
            return;
        }
        self.watches.push(Watch {
            agent,
            resource,
            remaining: self.reaction,
        });
    }

    fn react(&mut self, dt: Duration, out: &mut Vec<Command>) {
        self.watches.retain_mut(|watch| {
            watch.remaining = watch.remaining.saturating_sub(dt);
            if !watch.remaining.is_zero() {
                return true;
            }
            out.push(Command::ClearResource {
                resource: watch.resource,
            });
            false
        });
    }
}
