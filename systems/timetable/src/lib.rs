#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Deterministic timetable system that answers resolved rounds with spawn offsets.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;
use wavekeeper_core::{whole_millis, Command, Event};

/// Draws `count` spawn offsets measured from the start of a round.
///
/// The first offset is always exactly `first`; the remaining `count - 1` are
/// independent uniform draws in `[0, window)`. The result is sorted ascending,
/// so a draw below `first` sorts ahead of it. Duplicates are permitted.
#[must_use]
pub fn generate<R: Rng + ?Sized>(
    count: u32,
    first: Duration,
    window: Duration,
    rng: &mut R,
) -> Vec<Duration> {
    if count == 0 {
        return Vec::new();
    }

    let window_nanos = u64::try_from(window.as_nanos()).unwrap_or(u64::MAX);
    let mut offsets = Vec::with_capacity(count as usize);
    offsets.push(first);
    for _ in 1..count {
        let offset = if window_nanos == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(rng.gen_range(0..window_nanos))
        };
        offsets.push(offset);
    }
    offsets.sort_unstable();
    offsets
}

/// Configuration parameters required to construct the timetable system.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    first_spawn: Duration,
    spawn_window: Duration,
    rng_seed: u64,
}

impl Config {
    /// Creates a new configuration using the provided offsets and seed.
    #[must_use]
    pub const fn new(first_spawn: Duration, spawn_window: Duration, rng_seed: u64) -> Self {
        Self {
            first_spawn,
            spawn_window,
            rng_seed,
        }
    }
}

/// Pure system that schedules the agents of every round once its resources are ready.
#[derive(Debug)]
pub struct Timetable {
    first_spawn: Duration,
    spawn_window: Duration,
    rng: ChaCha8Rng,
}

impl Timetable {
    /// Creates a new timetable system using the supplied configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            first_spawn: config.first_spawn,
            spawn_window: config.spawn_window,
            rng: ChaCha8Rng::seed_from_u64(config.rng_seed),
        }
    }

    /// Consumes events and emits one `ScheduleSpawns` command per resolved round.
    pub fn handle(&mut self, events: &[Event], out: &mut Vec<Command>) {
        for event in events {
            let Event::ResourcesReady { round, agents, .. } = event else {
                continue;
            };
            let offsets = generate(*agents, self.first_spawn, self.spawn_window, &mut self.rng);
            debug!(
                round = round.get(),
                spawns = offsets.len(),
                last_ms = offsets.last().copied().map_or(0, whole_millis),
                "timetable generated"
            );
            out.push(Command::ScheduleSpawns {
                round: *round,
                offsets,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_agents_yield_empty_timetable() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(generate(0, Duration::from_secs(1), Duration::from_secs(5), &mut rng).is_empty());
    }

    #[test]
    fn single_agent_spawns_at_first_offset() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            generate(1, Duration::from_secs(2), Duration::from_secs(5), &mut rng),
            vec![Duration::from_secs(2)]
        );
    }

    #[test]
    fn empty_window_collapses_remaining_offsets_to_zero() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            generate(3, Duration::from_secs(1), Duration::ZERO, &mut rng),
            vec![Duration::ZERO, Duration::ZERO, Duration::from_secs(1)]
        );
    }
}
