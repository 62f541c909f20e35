#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Reference resource factory.
//!
//! Answers every `ResourcesRequested` event with a `ProvideResources` command
//! once all of the batch's resources report ready. Resources are instantiated
//! at distinct placement points, so a request larger than the number of
//! placements yields a partial batch and a factory without placements yields
//! an empty one.

use std::time::Duration;

use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, warn};
use wavekeeper_core::{
    whole_millis, Command, Event, Placement, ResourceHandle, ResourceId, RoundIndex,
};

/// Configuration parameters required to construct the provisioning system.
#[derive(Clone, Debug)]
pub struct Config {
    placements: Vec<Placement>,
    readiness: Duration,
    jitter: Duration,
    rng_seed: u64,
}

impl Config {
    /// Creates a configuration whose resources all become ready after `readiness`.
    #[must_use]
    pub fn new(placements: Vec<Placement>, readiness: Duration, rng_seed: u64) -> Self {
        Self {
            placements,
            readiness,
            jitter: Duration::ZERO,
            rng_seed,
        }
    }

    /// Adds a uniform per-resource delay in `[0, jitter)` on top of the readiness latency.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }
}

#[derive(Debug)]
struct PendingBatch {
    round: RoundIndex,
    resources: Vec<ResourceHandle>,
    /// Time until the slowest resource of the batch reports ready.
    remaining: Duration,
}

/// Pure system that instantiates resources for each requested round.
#[derive(Debug)]
pub struct Provisioning {
    placements: Vec<Placement>,
    readiness: Duration,
    jitter: Duration,
    rng: ChaCha8Rng,
    next_resource: u32,
    pending: Vec<PendingBatch>,
}

impl Provisioning {
    /// Creates a new provisioning system using the supplied configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            placements: config.placements,
            readiness: config.readiness,
            jitter: config.jitter,
            rng: ChaCha8Rng::seed_from_u64(config.rng_seed),
            next_resource: 0,
            pending: Vec::new(),
        }
    }

    /// Number of batches still waiting for their resources to report ready.
    #[must_use]
    pub fn pending_batches(&self) -> usize {
        self.pending.len()
    }

    /// Consumes events and emits `ProvideResources` commands for ready batches.
    pub fn handle(&mut self, events: &[Event], out: &mut Vec<Command>) {
        for event in events {
            match event {
                Event::ResourcesRequested { round, count, .. } => {
                    self.request(*round, *count);
                    self.flush(out);
                }
                Event::TimeAdvanced { dt } => {
                    for batch in &mut self.pending {
                        batch.remaining = batch.remaining.saturating_sub(*dt);
                    }
                    self.flush(out);
                }
                Event::RoundTimedOut { .. } | Event::RunReset { .. } => {
                    if !self.pending.is_empty() {
                        debug!(batches = self.pending.len(), "dropping pending batches");
                    }
                    self.pending.clear();
                }
                _ => {}
            }
        }
    }

    fn request(&mut self, round: RoundIndex, count: u32) {
        let placements: Vec<Placement> = self
            .placements
            .choose_multiple(&mut self.rng, count as usize)
            .copied()
            .collect();
        if placements.len() < count as usize {
            warn!(
                round = round.get(),
                requested = count,
                provided = placements.len(),
                "not enough placements for the requested resources"
            );
        }

        let mut remaining = Duration::ZERO;
        let mut resources = Vec::with_capacity(placements.len());
        for placement in placements {
            let id = ResourceId::new(self.next_resource);
            self.next_resource = self.next_resource.wrapping_add(1);
            remaining = remaining.max(self.readiness.saturating_add(self.draw_jitter()));
            resources.push(ResourceHandle::new(id, placement));
        }

        debug!(
            round = round.get(),
            resources = resources.len(),
            latency_ms = whole_millis(remaining),
            "resources instantiated"
        );
        self.pending.push(PendingBatch {
            round,
            resources,
            remaining,
        });
    }

    fn draw_jitter(&mut self) -> Duration {
        let nanos = u64::try_from(self.jitter.as_nanos()).unwrap_or(u64::MAX);
        if nanos == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.rng.gen_range(0..nanos))
    }

    fn flush(&mut self, out: &mut Vec<Command>) {
        let (ready, waiting): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|batch| batch.remaining.is_zero());
        self.pending = waiting;
        for batch in ready {
            out.push(Command::ProvideResources {
                round: batch.round,
                resources: batch.resources,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requested(count: u32) -> Event {
        Event::ResourcesRequested {
            round: RoundIndex::new(0),
            count,
            speed: 1.0,
        }
    }

    #[test]
    fn jitter_stays_below_its_bound() {
        let config = Config::new(Vec::new(), Duration::ZERO, 5).with_jitter(Duration::from_millis(10));
        let mut provisioning = Provisioning::new(config);
        for _ in 0..64 {
            assert!(provisioning.draw_jitter() < Duration::from_millis(10));
        }
    }

    #[test]
    fn instant_readiness_answers_in_the_same_pass() {
        let placements = vec![Placement::new(0, 0), Placement::new(1, 0)];
        let mut provisioning = Provisioning::new(Config::new(placements, Duration::ZERO, 5));
        let mut commands = Vec::new();
        provisioning.handle(&[requested(2)], &mut commands);

        assert_eq!(commands.len(), 1);
        assert_eq!(provisioning.pending_batches(), 0);
    }
}
