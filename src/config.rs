//! Solver configuration.
//!
//! Loaded from TOML or built in code; every field has a default so a config
//! file only needs the values it changes:
//!
//! ```toml
//! epsilon = 1e-6
//! max_iterations = 250
//! device = { name_contains = "NVIDIA" }
//! ```

use std::fmt;
use std::path::Path;

use serde_derive::Deserialize;

use crate::error::{JacobiError, Result};

pub const DEFAULT_EPSILON: f64 = 1e-5;
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// Which compute device `Context::open` may pick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelector {
    /// The adapter with the highest estimated throughput.
    #[default]
    HighestThroughput,
    /// The best adapter whose name contains this text (case-insensitive).
    NameContains(String),
}

impl DeviceSelector {
    pub fn accepts(&self, adapter_name: &str) -> bool {
        match self {
            DeviceSelector::HighestThroughput => true,
            DeviceSelector::NameContains(needle) => adapter_name
                .to_ascii_lowercase()
                .contains(&needle.to_ascii_lowercase()),
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::HighestThroughput => write!(f, "highest-throughput"),
            DeviceSelector::NameContains(needle) => write!(f, "name containing {needle:?}"),
        }
    }
}

/// Convergence policy and device choice for a solve session.
///
/// The residual is the L1 norm of the change between the two ping-pong
/// buffers after a full iteration, divided by the L1 norm of the iterate
/// when that exceeds one. The solve converges once it is at most `epsilon`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    pub epsilon: f64,
    pub max_iterations: u32,
    pub device: DeviceSelector,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            device: DeviceSelector::default(),
        }
    }
}

impl SolverConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SolverConfig =
            toml::from_str(text).map_err(|e| JacobiError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.epsilon.is_finite() && self.epsilon >= 0.0) {
            return Err(JacobiError::Config(format!(
                "epsilon must be a non-negative finite number, got {}",
                self.epsilon
            )));
        }
        if self.max_iterations == 0 {
            return Err(JacobiError::Config("max_iterations must be at least 1".into()));
        }
        Ok(())
    }
}
