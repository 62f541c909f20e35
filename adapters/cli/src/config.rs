//! Scenario files describing a run plan and its reference collaborators.

use std::{fs, io, path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use wavekeeper_core::{seconds, Placement, RoundConfig, RunPlan, SessionTuning, StartError};

/// Errors raised while loading a scenario file.
#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    /// The file could not be read.
    #[error("could not read scenario file")]
    Read(#[source] io::Error),
    /// The contents are not a valid scenario.
    #[error("could not parse scenario toml")]
    Parse(#[source] toml::de::Error),
    /// The run plan would be rejected by the session.
    #[error("invalid run plan: {0}")]
    Invalid(#[source] StartError),
}

/// Reference factory settings.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct FactorySettings {
    /// Number of placement points laid out along the factory floor.
    pub(crate) placements: u32,
    /// Time every resource needs before reporting ready.
    #[serde(with = "seconds")]
    pub(crate) readiness: Duration,
    /// Upper bound of the random delay added per resource.
    #[serde(with = "seconds")]
    pub(crate) jitter: Duration,
}

impl Default for FactorySettings {
    fn default() -> Self {
        Self {
            placements: 6,
            readiness: Duration::from_millis(500),
            jitter: Duration::from_millis(250),
        }
    }
}

/// Simulated operator settings.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct OperatorSettings {
    /// Delay between an assignment and the operator's clear.
    #[serde(with = "seconds")]
    pub(crate) reaction: Duration,
    /// Probability that an assignment goes unnoticed.
    pub(crate) miss_rate: f64,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            reaction: Duration::from_millis(1_500),
            miss_rate: 0.05,
        }
    }
}

/// Everything needed to drive one simulated run.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub(crate) struct Scenario {
    /// Rounds played in order, written as `[[round]]` tables.
    #[serde(rename = "round")]
    pub(crate) rounds: Vec<RoundConfig>,
    #[serde(default)]
    pub(crate) tuning: SessionTuning,
    #[serde(default)]
    pub(crate) factory: FactorySettings,
    #[serde(default)]
    pub(crate) operator: OperatorSettings,
    /// Spawn points agents appear at; a row of four is used when empty.
    #[serde(default)]
    pub(crate) spawn_points: Vec<Placement>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            rounds: vec![
                RoundConfig::new(3, 4, 1.0),
                RoundConfig::new(3, 6, 1.25),
                RoundConfig::new(2, 8, 1.5),
            ],
            tuning: SessionTuning::default(),
            factory: FactorySettings::default(),
            operator: OperatorSettings::default(),
            spawn_points: Vec::new(),
        }
    }
}

impl Scenario {
    /// Parses and validates a scenario from TOML text.
    pub(crate) fn parse(contents: &str) -> Result<Self, ConfigError> {
        let scenario: Self = toml::from_str(contents).map_err(ConfigError::Parse)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Rejects scenarios the session would refuse to start.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        self.plan().validate().map_err(ConfigError::Invalid)
    }

    pub(crate) fn plan(&self) -> RunPlan {
        RunPlan::new(self.rounds.clone(), self.tuning)
    }

    /// Placement points of the reference factory, laid out in a single row.
    pub(crate) fn factory_placements(&self) -> Vec<Placement> {
        (0..self.factory.placements)
            .map(|column| Placement::new(column, 0))
            .collect()
    }

    pub(crate) fn spawn_points(&self) -> Vec<Placement> {
        if !self.spawn_points.is_empty() {
            return self.spawn_points.clone();
        }
        (0..4).map(|column| Placement::new(column * 3, 8)).collect()
    }
}

/// Reads a scenario file from disk.
pub(crate) fn load(path: &Path) -> Result<Scenario, ConfigError> {
    let contents = fs::read_to_string(path).map_err(ConfigError::Read)?;
    Scenario::parse(&contents)
}
