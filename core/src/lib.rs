#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the Wavekeeper engine.
//!
//! This crate defines the message surface that connects adapters, the
//! authoritative session, and pure systems. Adapters and systems submit
//! [`Command`] values describing desired mutations, the session executes
//! those commands via its `apply` entry point, and then broadcasts [`Event`]
//! values for systems and presentation layers to react to deterministically.
//! Systems consume event streams and respond exclusively with new command
//! batches.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Commands that express all permissible session mutations.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Replaces the spawn points agents are placed at when they appear.
    ConfigureSpawnPoints {
        /// Placements the session picks from for each spawned agent.
        points: Vec<Placement>,
    },
    /// Starts a new run that sequences the provided rounds.
    StartRun {
        /// Rounds and timing parameters for the run.
        plan: RunPlan,
    },
    /// Answers an outstanding resource request for a round.
    ProvideResources {
        /// Round the resources were requested for.
        round: RoundIndex,
        /// Handles that reported ready. May be fewer than requested, or none.
        resources: Vec<ResourceHandle>,
    },
    /// Installs the spawn timetable for a round whose resources are ready.
    ScheduleSpawns {
        /// Round the timetable belongs to.
        round: RoundIndex,
        /// Spawn offsets measured from the moment the resources resolved.
        offsets: Vec<Duration>,
    },
    /// Releases whichever agent occupies the resource and frees it.
    ClearResource {
        /// Resource selected by the player.
        resource: ResourceId,
    },
    /// Advances the session clock by the provided delta time.
    Tick {
        /// Duration of simulated time that elapsed since the previous tick.
        dt: Duration,
    },
}

/// Events broadcast by the session after processing commands.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Indicates that the session clock advanced.
    TimeAdvanced {
        /// Duration of simulated time that elapsed in the tick.
        dt: Duration,
    },
    /// Announces that a run began.
    RunStarted {
        /// Number of rounds the run must complete to be won.
        rounds: u32,
    },
    /// Reports that a run could not be started.
    StartRejected {
        /// Specific reason the start request failed.
        reason: StartError,
    },
    /// Announces that a round began.
    RoundStarted {
        /// Index of the round within the run.
        round: RoundIndex,
        /// Configuration the round runs with.
        config: RoundConfig,
    },
    /// Asks the resource factory to produce a batch of resources.
    ResourcesRequested {
        /// Round the batch is for.
        round: RoundIndex,
        /// Number of resources requested.
        count: u32,
        /// Speed multiplier applied to the round.
        speed: f32,
    },
    /// Confirms that the round's resource batch resolved.
    ResourcesReady {
        /// Round whose pool is now populated.
        round: RoundIndex,
        /// Number of live resources in the pool.
        resources: u32,
        /// Number of agents the round plans to spawn.
        agents: u32,
    },
    /// Confirms that an agent was created by the spawn timetable.
    AgentSpawned {
        /// Identifier assigned to the new agent.
        agent: AgentId,
        /// Resource reserved for the agent, if one was free.
        resource: Option<ResourceId>,
        /// Cosmetic placement of the agent, if any spawn point exists.
        spawn_point: Option<Placement>,
    },
    /// Reports that an agent found no free resource and is waiting.
    AgentPaused {
        /// Agent that was paused.
        agent: AgentId,
        /// Deadline time the agent keeps frozen until resumed.
        remaining: Duration,
    },
    /// Reports that an agent now occupies a resource and its deadline runs.
    AgentAssigned {
        /// Agent that received the resource.
        agent: AgentId,
        /// Resource the agent occupies.
        resource: ResourceId,
        /// Deadline time left before the resource is destroyed.
        remaining: Duration,
    },
    /// Confirms that an agent was cleared off its resource.
    AgentCleared {
        /// Agent that was cleared.
        agent: AgentId,
        /// Resource the agent occupied.
        resource: ResourceId,
    },
    /// Reports that an agent's deadline ran out while holding a resource.
    AgentExpired {
        /// Agent whose deadline expired.
        agent: AgentId,
        /// Resource destroyed by the expiry.
        resource: ResourceId,
    },
    /// Asks the movement layer to send an agent to the neutral waypoint.
    AgentRedirected {
        /// Agent being redirected.
        agent: AgentId,
    },
    /// Reports that an agent was force-destroyed by a round abort.
    AgentDestroyed {
        /// Agent that was destroyed.
        agent: AgentId,
    },
    /// Confirms that a resource returned to the free pool.
    ResourceReleased {
        /// Resource that became available.
        resource: ResourceId,
    },
    /// Reports that a resource was permanently destroyed.
    ResourceDestroyed {
        /// Resource that was destroyed.
        resource: ResourceId,
    },
    /// Reports that the last live resource of a round was destroyed.
    AllResourcesLost {
        /// Round that lost every resource.
        round: RoundIndex,
    },
    /// Announces that a round finished successfully.
    RoundCompleted {
        /// Round that completed.
        round: RoundIndex,
    },
    /// Announces that a round exceeded its timeout.
    RoundTimedOut {
        /// Round that timed out.
        round: RoundIndex,
    },
    /// Announces that every round of the run completed.
    RunWon {
        /// Number of rounds completed.
        rounds: u32,
        /// Aggregate counters captured before the run was torn down.
        counters: SessionCounters,
    },
    /// Announces that the run was torn down after a failure.
    RunReset {
        /// Failure that forced the reset.
        reason: ResetReason,
    },
    /// Reports that a clear request was rejected.
    ClearRejected {
        /// Resource named in the request.
        resource: ResourceId,
        /// Specific reason the clear failed.
        reason: ClearError,
    },
}

/// Unique identifier assigned to an agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(u32);

impl AgentId {
    /// Creates a new agent identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// Unique identifier assigned to a resource by the factory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(u32);

impl ResourceId {
    /// Creates a new resource identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the resource identifier.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// Zero-based position of a round within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoundIndex(u32);

impl RoundIndex {
    /// Creates a new round index.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the underlying index.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Index of the round that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Grid location used for resource placements and agent spawn points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Placement {
    column: u32,
    row: u32,
}

impl Placement {
    /// Creates a new placement.
    #[must_use]
    pub const fn new(column: u32, row: u32) -> Self {
        Self { column, row }
    }

    /// Zero-based column of the placement.
    #[must_use]
    pub const fn column(&self) -> u32 {
        self.column
    }

    /// Zero-based row of the placement.
    #[must_use]
    pub const fn row(&self) -> u32 {
        self.row
    }
}

/// Resource produced by the factory and reported ready.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    /// Identifier assigned by the factory.
    pub id: ResourceId,
    /// Where the resource was instantiated.
    pub placement: Placement,
}

impl ResourceHandle {
    /// Creates a new resource handle.
    #[must_use]
    pub const fn new(id: ResourceId, placement: Placement) -> Self {
        Self { id, placement }
    }
}

/// Parameters of a single round.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundConfig {
    /// Number of resources requested from the factory.
    pub resources: u32,
    /// Number of agents spawned over the round.
    pub agents: u32,
    /// Multiplier that shortens agent deadlines as it grows.
    pub speed: f32,
}

impl RoundConfig {
    /// Creates a new round configuration.
    #[must_use]
    pub const fn new(resources: u32, agents: u32, speed: f32) -> Self {
        Self {
            resources,
            agents,
            speed,
        }
    }

    /// Deadline granted to each agent, `base / speed`.
    ///
    /// Non-positive or non-finite speeds fall back to the unscaled base.
    #[must_use]
    pub fn deadline(&self, base: Duration) -> Duration {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return base;
        }
        Duration::try_from_secs_f64(base.as_secs_f64() / f64::from(self.speed))
            .unwrap_or(Duration::MAX)
    }
}

/// Timing parameters shared by every round of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTuning {
    /// Deadline granted to an agent at speed 1.
    #[serde(with = "seconds")]
    pub base_deadline: Duration,
    /// Offset of the first spawn in every round.
    #[serde(with = "seconds")]
    pub first_spawn: Duration,
    /// Window the remaining spawn offsets are drawn from.
    #[serde(with = "seconds")]
    pub spawn_window: Duration,
    /// Round timeout expressed as a multiple of the spawn window.
    pub timeout_factor: u32,
    /// Delay between a round timeout and the full reset.
    #[serde(with = "seconds")]
    pub reset_delay: Duration,
    /// Interval between successive agent redirects after all resources are lost.
    #[serde(with = "seconds")]
    pub cascade_stagger: Duration,
    /// Extra time granted after the last redirect before the reset.
    #[serde(with = "seconds")]
    pub cascade_grace: Duration,
    /// Pause between a completed round and the next one.
    #[serde(with = "seconds")]
    pub round_interval: Duration,
    /// Seed for resource picking and spawn point selection.
    pub seed: u64,
}

impl SessionTuning {
    /// Round timeout derived from the spawn window.
    #[must_use]
    pub fn round_timeout(&self) -> Duration {
        self.spawn_window.saturating_mul(self.timeout_factor)
    }
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            base_deadline: Duration::from_secs(8),
            first_spawn: Duration::from_secs(1),
            spawn_window: Duration::from_secs(20),
            timeout_factor: 2,
            reset_delay: Duration::from_secs(3),
            cascade_stagger: Duration::from_millis(500),
            cascade_grace: Duration::from_secs(2),
            round_interval: Duration::from_secs(2),
            seed: 0x5eed_0f_ca5c_ade5,
        }
    }
}

/// Ordered rounds plus timing parameters for one run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunPlan {
    /// Rounds played in order.
    pub rounds: Vec<RoundConfig>,
    /// Timing parameters shared by every round.
    #[serde(default)]
    pub tuning: SessionTuning,
}

impl RunPlan {
    /// Creates a run plan from rounds and tuning.
    #[must_use]
    pub fn new(rounds: Vec<RoundConfig>, tuning: SessionTuning) -> Self {
        Self { rounds, tuning }
    }

    /// Number of rounds as reported in events.
    #[must_use]
    pub fn round_count(&self) -> u32 {
        u32::try_from(self.rounds.len()).unwrap_or(u32::MAX)
    }

    /// Checks that the plan can be executed.
    pub fn validate(&self) -> Result<(), StartError> {
        if self.rounds.is_empty() {
            return Err(StartError::EmptyPlan);
        }
        if self.tuning.round_timeout().is_zero() {
            return Err(StartError::ZeroTimeout);
        }
        for (index, round) in self.rounds.iter().enumerate() {
            if !round.speed.is_finite() || round.speed <= 0.0 {
                let index = u32::try_from(index).unwrap_or(u32::MAX);
                return Err(StartError::InvalidSpeed {
                    round: RoundIndex::new(index),
                });
            }
        }
        Ok(())
    }
}

/// Aggregate counters maintained for the active run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SessionCounters {
    /// Agents created by spawn timers.
    pub agents_spawned: u32,
    /// Agents cleared off their resources.
    pub agents_cleared: u32,
    /// Agents whose deadline expired.
    pub agents_expired: u32,
    /// Agents force-destroyed by an abort.
    pub agents_destroyed: u32,
    /// Resources destroyed in the current round.
    pub resources_destroyed: u32,
    /// Live resources in the current round.
    pub resources_remaining: u32,
    /// Rounds completed in the current run.
    pub rounds_completed: u32,
}

/// Top-level phase of the orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunPhase {
    /// No run is active; a new one may start.
    Idle,
    /// Rounds are being played.
    Running,
    /// A failure was reported and the reset is pending.
    Resetting,
}

/// Phase of the wave controller for the current round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoundPhase {
    /// No round is active.
    Idle,
    /// Waiting for the factory to answer the resource request.
    AwaitingResources,
    /// Spawn timers are still pending.
    Spawning,
    /// Every agent spawned; waiting for the survivors to resolve.
    Draining,
    /// Completion predicate held.
    Complete,
    /// Round timeout fired first.
    TimedOut,
    /// The last live resource was destroyed.
    Lost,
}

/// Lifecycle state of a live agent. Cleared and expired agents leave the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AgentState {
    /// Created, not yet resolved against the pool.
    Spawned,
    /// Waiting for a free resource with its deadline frozen.
    Paused,
    /// Occupying a resource with its deadline running.
    Assigned,
}

/// Occupancy state of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceState {
    /// Free for the next agent.
    Available,
    /// Held by exactly one agent.
    Reserved,
    /// Permanently lost.
    Destroyed,
}

/// Immutable representation of a single agent's state used for queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AgentSnapshot {
    /// Identifier of the agent.
    pub id: AgentId,
    /// Current lifecycle state.
    pub state: AgentState,
    /// Resource held by the agent, if any.
    pub resource: Option<ResourceId>,
    /// Deadline time left, frozen while paused.
    pub remaining: Duration,
}

/// Immutable representation of a single resource's state used for queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceSnapshot {
    /// Identifier of the resource.
    pub id: ResourceId,
    /// Where the resource was instantiated.
    pub placement: Placement,
    /// Current occupancy state.
    pub state: ResourceState,
    /// Agents recorded in the resource's assignment set.
    pub occupants: Vec<AgentId>,
}

/// Failure that forced a run reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResetReason {
    /// The round timeout fired before completion.
    RoundTimedOut,
    /// The last live resource was destroyed.
    AllResourcesLost,
}

/// Reasons a clear request may be rejected by the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum ClearError {
    /// No round is currently accepting clears.
    #[error("no round is accepting clears")]
    RoundNotActive,
    /// The resource is not part of the current round's pool.
    #[error("resource is not part of the current pool")]
    UnknownResource,
    /// The resource was already destroyed.
    #[error("resource was destroyed")]
    ResourceDestroyed,
}

/// Reasons a run may fail to start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum StartError {
    /// A run is already in progress or still resetting.
    #[error("a run is already in progress")]
    AlreadyRunning,
    /// The plan contains no rounds.
    #[error("run plan has no rounds")]
    EmptyPlan,
    /// The timeout derived from the spawn window is zero.
    #[error("round timeout must be greater than zero")]
    ZeroTimeout,
    /// A round uses a speed multiplier that is not a positive number.
    #[error("round {} has a non-positive speed multiplier", .round.get())]
    InvalidSpeed {
        /// Offending round.
        round: RoundIndex,
    },
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
#[must_use]
pub fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Serde adapter storing a [`Duration`] as fractional seconds.
pub mod seconds {
    use std::time::Duration;

    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    /// Serializes the duration as seconds.
    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.as_secs_f64())
    }

    /// Deserializes a non-negative number of seconds.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        whole_millis, ClearError, ResetReason, RoundConfig, RoundIndex, RunPlan, SessionTuning,
        StartError,
    };
    use serde::{de::DeserializeOwned, Serialize};
    use std::time::Duration;

    fn assert_round_trip<T>(value: &T)
    where
        T: Serialize + DeserializeOwned + PartialEq + std::fmt::Debug,
    {
        let bytes = bincode::serialize(value).expect("serialize");
        let restored: T = bincode::deserialize(&bytes).expect("deserialize");
        assert_eq!(&restored, value);
    }

    #[test]
    fn rejection_reasons_round_trip_through_bincode() {
        assert_round_trip(&ClearError::ResourceDestroyed);
        assert_round_trip(&ResetReason::AllResourcesLost);
        assert_round_trip(&StartError::InvalidSpeed {
            round: RoundIndex::new(3),
        });
    }

    #[test]
    fn whole_millis_saturates_instead_of_wrapping() {
        assert_eq!(whole_millis(Duration::from_micros(2_999)), 2);
        assert_eq!(whole_millis(Duration::from_secs(u64::MAX / 1_000)), u64::MAX / 1_000 * 1_000);
        assert_eq!(whole_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn deadline_scales_inversely_with_speed() {
        let base = Duration::from_secs(8);
        assert_eq!(RoundConfig::new(1, 1, 2.0).deadline(base), Duration::from_secs(4));
        assert_eq!(RoundConfig::new(1, 1, 0.5).deadline(base), Duration::from_secs(16));
        assert_eq!(RoundConfig::new(1, 1, 0.0).deadline(base), base);
    }

    #[test]
    fn round_timeout_doubles_spawn_window_by_default() {
        let tuning = SessionTuning::default();
        assert_eq!(tuning.round_timeout(), tuning.spawn_window * 2);
    }

    #[test]
    fn validation_flags_empty_plans_and_bad_speeds() {
        let tuning = SessionTuning::default();
        assert_eq!(
            RunPlan::new(Vec::new(), tuning).validate(),
            Err(StartError::EmptyPlan)
        );

        let plan = RunPlan::new(
            vec![RoundConfig::new(2, 2, 1.0), RoundConfig::new(2, 2, -1.0)],
            tuning,
        );
        assert_eq!(
            plan.validate(),
            Err(StartError::InvalidSpeed {
                round: RoundIndex::new(1)
            })
        );

        let zero_window = SessionTuning {
            spawn_window: Duration::ZERO,
            ..tuning
        };
        let plan = RunPlan::new(vec![RoundConfig::new(1, 1, 1.0)], zero_window);
        assert_eq!(plan.validate(), Err(StartError::ZeroTimeout));
    }

    #[test]
    fn round_index_advances() {
        assert_eq!(RoundIndex::new(4).next(), RoundIndex::new(5));
    }
}
