//! Engine-level snapshot and restore with BLAKE3 hashing.
//!
//! [`EngineSnapshot`] wraps a [`WorldSnapshot`] together with the update
//! loop's timing state (tick counter, elapsed time, fixed-step accumulator)
//! and a BLAKE3 hex digest of all of it. The digest is recomputed and
//! checked before anything is restored.
//!
//! # Usage
//!
//! ```
//! use tessera_engine::prelude::*;
//!
//! let mut engine = Engine::new();
//! engine.register_component::<u32>("score").unwrap();
//! engine.run_updates(10, 16.0).unwrap();
//!
//! let snapshot = engine.serialize().unwrap();
//! assert_eq!(snapshot.tick_counter, 10);
//! assert_eq!(snapshot.hash.len(), 64); // BLAKE3 hex digest
//!
//! engine.run_updates(10, 16.0).unwrap();
//! engine.deserialize(&snapshot).unwrap();
//! assert_eq!(engine.tick_count(), 10);
//! ```
//!
//! # What Is NOT Serialized
//!
//! - **Systems** (closures) and the component registry: both are code, not
//!   data, and must be registered the same way on the restoring engine.
//! - **Capabilities** supplied through the builder.
//! - **Queued commands**: the command buffer is cleared on restore.

use serde::{Deserialize, Serialize};
use tessera_ecs::snapshot::WorldSnapshot;

use crate::engine::Engine;
use crate::EngineError;

// ---------------------------------------------------------------------------
// EngineSnapshot
// ---------------------------------------------------------------------------

/// A serializable snapshot of the engine simulation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Complete ECS world state (entities, components, allocator).
    pub world: WorldSnapshot,
    /// Number of completed updates at the time of capture.
    pub tick_counter: u64,
    pub elapsed_ms: f64,
    /// Partial fixed step carried into the next update.
    pub accumulator_ms: f64,
    /// BLAKE3 hex digest (64 lowercase hex chars) of the fields above.
    pub hash: String,
}

impl EngineSnapshot {
    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string(self).map_err(serialization)
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json).map_err(serialization)
    }

    /// Recompute the digest and compare it with the recorded one.
    pub fn verify(&self) -> Result<(), EngineError> {
        let actual = compute_hash(
            &self.world,
            self.tick_counter,
            self.elapsed_ms,
            self.accumulator_ms,
        )?;
        if actual != self.hash {
            return Err(EngineError::SnapshotHashMismatch {
                expected: self.hash.clone(),
                actual,
            });
        }
        Ok(())
    }
}

fn serialization(e: serde_json::Error) -> EngineError {
    EngineError::Serialization {
        details: e.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Hashing helpers
// ---------------------------------------------------------------------------

/// BLAKE3 hex digest of the hashable engine state.
///
/// The world snapshot lists entities in index order and components sorted by
/// name, so equal states always serialize to the same bytes.
fn compute_hash(
    world: &WorldSnapshot,
    tick_counter: u64,
    elapsed_ms: f64,
    accumulator_ms: f64,
) -> Result<String, EngineError> {
    #[derive(Serialize)]
    struct HashableState<'a> {
        world: &'a WorldSnapshot,
        tick_counter: u64,
        elapsed_ms: f64,
        accumulator_ms: f64,
    }

    let json_bytes = serde_json::to_vec(&HashableState {
        world,
        tick_counter,
        elapsed_ms,
        accumulator_ms,
    })
    .map_err(serialization)?;

    Ok(blake3::hash(&json_bytes).to_hex().to_string())
}

// ---------------------------------------------------------------------------
// Engine snapshot/restore methods
// ---------------------------------------------------------------------------

impl Engine {
    /// Capture the world and timing state.
    pub fn serialize(&self) -> Result<EngineSnapshot, EngineError> {
        let world = self.world.capture_snapshot()?;
        let hash = compute_hash(&world, self.tick_counter, self.elapsed_ms, self.accumulator_ms)?;
        Ok(EngineSnapshot {
            world,
            tick_counter: self.tick_counter,
            elapsed_ms: self.elapsed_ms,
            accumulator_ms: self.accumulator_ms,
            hash,
        })
    }

    /// Restore a snapshot taken by [`serialize`](Self::serialize).
    ///
    /// The hash and timing values are checked first and the world restore is
    /// itself all-or-nothing, so on error the engine is unchanged. Registered
    /// systems are kept; queued commands are dropped.
    pub fn deserialize(&mut self, snapshot: &EngineSnapshot) -> Result<(), EngineError> {
        for (field, value) in [
            ("elapsed_ms", snapshot.elapsed_ms),
            ("accumulator_ms", snapshot.accumulator_ms),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(EngineError::Serialization {
                    details: format!("snapshot has invalid {field}: {value}"),
                });
            }
        }
        snapshot.verify()?;

        self.world.restore_from_snapshot(&snapshot.world)?;
        self.tick_counter = snapshot.tick_counter;
        self.elapsed_ms = snapshot.elapsed_ms;
        self.accumulator_ms = snapshot.accumulator_ms;
        self.commands.clear();

        tracing::info!(tick = self.tick_counter, "restored engine from snapshot");
        Ok(())
    }

    /// The digest [`serialize`](Self::serialize) would record right now.
    pub fn state_hash(&self) -> Result<String, EngineError> {
        Ok(self.serialize()?.hash)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
