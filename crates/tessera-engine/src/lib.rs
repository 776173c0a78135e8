//! Tessera Engine -- the runtime that drives a [`tessera_ecs`] world.
//!
//! The [`Engine`](engine::Engine) owns a world, a command buffer and a
//! [`Scheduler`](scheduler::Scheduler). Each call to
//! [`Engine::update`](engine::Engine::update) runs the fixed-timestep group
//! as many times as the accumulated time allows, then the variable group
//! once. Every group run goes through three phases (`before`, `act`,
//! `after`) with the command buffer flushed between them.
//!
//! # Quick Start
//!
//! ```
//! use tessera_engine::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Position(f64);
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Velocity(f64);
//!
//! let mut engine = Engine::new();
//! engine.register_component::<Position>("position").unwrap();
//! engine.register_component::<Velocity>("velocity").unwrap();
//!
//! let e = engine.create_entity(None);
//! engine.entity_mut(e).unwrap().insert(Position(0.0)).unwrap().insert(Velocity(2.0)).unwrap();
//!
//! engine
//!     .create_system(
//!         SystemDescriptor::new("movement", QueryBuilder::new().all::<Position>().all::<Velocity>())
//!             .act(|row, _ctx| {
//!                 if let Some((p, v)) = row.get_pair_mut::<Position, Velocity>() {
//!                     p.0 += v.0;
//!                 }
//!             }),
//!     )
//!     .unwrap();
//!
//! engine.update(16.0).unwrap();
//! assert_eq!(engine.world().get_component::<Position>(e), Ok(&Position(2.0)));
//! assert_eq!(engine.tick_count(), 1);
//! ```

#![deny(unsafe_code)]

use tessera_ecs::EcsError;

pub mod capability;
pub mod config;
pub mod engine;
pub mod scheduler;
pub mod snapshot;
pub mod system;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the engine layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// An error bubbled up from the ECS store.
    #[error(transparent)]
    Ecs(#[from] EcsError),

    /// No system is registered under the given name.
    #[error("no system named '{name}'")]
    UnknownSystem { name: String },

    /// A system with this name is already registered.
    #[error("a system named '{name}' is already registered")]
    DuplicateSystem { name: String },

    /// The frame delta passed to `update` was negative, NaN or infinite.
    #[error("invalid frame delta {delta_ms} ms (must be finite and non-negative)")]
    InvalidDelta { delta_ms: f64 },

    /// The engine configuration was rejected.
    #[error("invalid engine configuration: {reason}")]
    InvalidConfig { reason: String },

    /// An engine snapshot's recorded hash does not match its contents.
    #[error("snapshot hash mismatch: recorded {expected} but recomputed {actual}")]
    SnapshotHashMismatch { expected: String, actual: String },

    /// Encoding or decoding engine state failed.
    #[error("serialization failed: {details}")]
    Serialization { details: String },
}

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the ECS crate for convenience.
pub use tessera_ecs;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use tessera_ecs::prelude::*;

    pub use crate::capability::Capabilities;
    pub use crate::config::{EngineConfig, FlushPolicy};
    pub use crate::engine::{Engine, EngineBuilder, TickReport};
    pub use crate::scheduler::Scheduler;
    pub use crate::snapshot::EngineSnapshot;
    pub use crate::system::{SystemContext, SystemDescriptor, SystemState, TickTime, Timestep};
    pub use crate::EngineError;
}
