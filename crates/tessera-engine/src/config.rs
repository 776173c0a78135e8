//! Engine configuration.
//!
//! [`EngineConfig`] controls the fixed-timestep accumulator and when the
//! command buffer is flushed. It (de)serializes with serde so that hosts can
//! keep it in a JSON file; missing fields fall back to the defaults.

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// When queued commands are applied during a group run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Flush once after each phase (`before`, `act`, `after`).
    #[default]
    PerPhase,
    /// Additionally flush after every system's `act` iteration.
    PerSystem,
}

/// Configuration for the engine's update loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Duration of one fixed step in milliseconds. Must be positive and finite.
    pub fixed_step_ms: f64,
    /// Maximum fixed steps run by a single `update`. Accumulated time beyond
    /// this is dropped.
    pub max_fixed_steps: u32,
    /// Frame deltas larger than this are clamped before use.
    pub max_delta_ms: f64,
    pub flush_policy: FlushPolicy,
}

impl Default for EngineConfig {
    /// 60 Hz fixed step, at most 8 catch-up steps, 250 ms delta clamp.
    fn default() -> Self {
        Self {
            fixed_step_ms: 1000.0 / 60.0,
            max_fixed_steps: 8,
            max_delta_ms: 250.0,
            flush_policy: FlushPolicy::PerPhase,
        }
    }
}

impl EngineConfig {
    /// Check that every value is usable by the update loop.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.fixed_step_ms > 0.0 && self.fixed_step_ms.is_finite()) {
            return Err(invalid(format!(
                "fixed_step_ms must be positive and finite, got {}",
                self.fixed_step_ms
            )));
        }
        if self.max_fixed_steps == 0 {
            return Err(invalid("max_fixed_steps must be at least 1".to_owned()));
        }
        if !(self.max_delta_ms > 0.0 && self.max_delta_ms.is_finite()) {
            return Err(invalid(format!(
                "max_delta_ms must be positive and finite, got {}",
                self.max_delta_ms
            )));
        }
        Ok(())
    }

    /// Parse a JSON document and validate the result.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json).map_err(|e| invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

fn invalid(reason: String) -> EngineError {
    EngineError::InvalidConfig { reason }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
