//! Deterministic tick engine for SwarmGrid.
//!
//! The engine consumes an immutable [`GameConfig`] and a rectangular map of
//! cell strings, then advances the world one tick at a time: event scheduler,
//! prioritized action dispatch, per-agent on-tick hooks, fixed and mobile AOE
//! application, collective housekeeping, observation encoding, reward
//! evaluation, and the truncation check. Outputs are published through flat
//! per-agent buffers.

pub mod actions;
pub mod config;
pub mod engine;
pub mod obs;
pub mod reward;

pub use actions::{ActionRuntime, ActionSet};
pub use config::{
    ActionConfig, ActionKind, AgentConfig, ConfigError, EngineOptions, FeatureIds, GameConfig,
    GlobalObsConfig, ObjectConfig, ObsValueConfig,
};
pub use engine::{Engine, EngineError, ObsValidationStats, StepTiming};
pub use obs::manhattan_offsets;
pub use reward::{RewardConfig, RewardEntryConfig, RewardHelper};
