//! Immutable engine configuration and its validation.

use crate::reward::RewardConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use swarmgrid_core::{
    AoeConfig, CollectiveConfig, CompileError, EventConfig, GameValueConfig, GridError,
    HandlerConfig, InventoryConfig, PackedCoord, QueryTagConfig, ResourceId, TagId, VibeId,
};
use thiserror::Error;

/// Errors raised while constructing an engine.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("observation window {width}x{height} exceeds the packable size of {max}x{max}")]
    WindowTooLarge { width: u8, height: u8, max: u8 },
    #[error("token value base {0} must be between 2 and 256")]
    InvalidTokenBase(u32),
    #[error("map must be a non-empty rectangle")]
    MalformedMap,
    #[error("unknown cell string {0:?} in the map")]
    UnknownCell(String),
    #[error("type id {type_id} is claimed by both {existing:?} and {new:?}")]
    TypeIdConflict {
        type_id: u16,
        existing: String,
        new: String,
    },
    #[error("map contains {found} agents but the config declares {configured}")]
    AgentCountMismatch { configured: usize, found: usize },
    #[error("{0} agents exceed the agent id range")]
    TooManyAgents(usize),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// One agent-scope observation value: a game value rendered as tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObsValueConfig {
    pub value: GameValueConfig,
    pub feature_id: u8,
}

/// Which agent-scope tokens are emitted each tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalObsConfig {
    #[serde(default = "yes")]
    pub episode_completion_pct: bool,
    #[serde(default = "yes")]
    pub last_action: bool,
    #[serde(default = "yes")]
    pub last_reward: bool,
    #[serde(default)]
    pub goal_obs: bool,
    #[serde(default)]
    pub local_position: bool,
    #[serde(default)]
    pub obs: Vec<ObsValueConfig>,
}

fn yes() -> bool {
    true
}

impl Default for GlobalObsConfig {
    fn default() -> Self {
        Self {
            episode_completion_pct: true,
            last_action: true,
            last_reward: true,
            goal_obs: false,
            local_position: false,
            obs: Vec::new(),
        }
    }
}

/// Feature-id assignments for observation tokens. An id of zero disables the
/// feature.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureIds {
    pub collective: u8,
    pub tag: u8,
    pub vibe: u8,
    pub group: u8,
    pub frozen: u8,
    pub agent_id: u8,
    pub episode_completion_pct: u8,
    pub last_action: u8,
    pub last_action_move: u8,
    pub last_reward: u8,
    pub goal: u8,
    pub lp_east: u8,
    pub lp_west: u8,
    pub lp_north: u8,
    pub lp_south: u8,
    pub territory: u8,
    /// Per-resource inventory feature ids, indexed by resource id.
    pub inventory: Vec<u8>,
}

impl FeatureIds {
    /// Sequential assignment covering every feature, starting at 1.
    #[must_use]
    pub fn standard(num_resources: usize) -> Self {
        let mut next = 1u8;
        let mut take = || {
            let id = next;
            next += 1;
            id
        };
        Self {
            collective: take(),
            tag: take(),
            vibe: take(),
            group: take(),
            frozen: take(),
            agent_id: take(),
            episode_completion_pct: take(),
            last_action: take(),
            last_action_move: take(),
            last_reward: take(),
            goal: take(),
            lp_east: take(),
            lp_west: take(),
            lp_north: take(),
            lp_south: take(),
            territory: take(),
            inventory: (0..num_resources).map(|_| take()).collect(),
        }
    }

    /// Inventory feature id for `resource` (0 if unassigned).
    #[must_use]
    pub fn inventory_feature(&self, resource: ResourceId) -> u8 {
        self.inventory.get(resource as usize).copied().unwrap_or(0)
    }
}

/// Built-in action behaviors dispatched by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ActionKind {
    /// Do nothing, always succeeds.
    Noop,
    /// Step by `(dr, dc)`; fails on occupied or out-of-bounds cells.
    Move { dr: i32, dc: i32 },
    /// Scan the 8-neighborhood in a fixed order and apply the action's
    /// handler chain (or, when empty, each target's own `on_use` chain)
    /// until one target succeeds.
    UseNearby,
    /// Set the acting agent's vibe.
    ChangeVibe { vibe: VibeId },
}

/// One entry of the action catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    pub name: String,
    #[serde(default)]
    pub priority: u8,
    pub kind: ActionKind,
    /// Handler chain for `UseNearby`; tried first-match per target.
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

/// Agent-specific configuration attached to an object type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub group: u8,
    #[serde(default)]
    pub group_name: String,
    /// Hard role id (255 = unassigned).
    #[serde(default = "no_role")]
    pub role: u8,
    #[serde(default)]
    pub role_weights: [u8; 4],
    #[serde(default)]
    pub on_tick: Vec<HandlerConfig>,
    #[serde(default)]
    pub reward: RewardConfig,
}

const fn no_role() -> u8 {
    255
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            group: 0,
            group_name: String::new(),
            role: no_role(),
            role_weights: [0; 4],
            on_tick: Vec::new(),
            reward: RewardConfig::default(),
        }
    }
}

/// Catalog entry describing every object instantiated from a map cell.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectConfig {
    pub type_id: u16,
    pub type_name: String,
    /// Display name; defaults to the type name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<TagId>,
    #[serde(default)]
    pub vibe: VibeId,
    #[serde(default)]
    pub collective: Option<String>,
    #[serde(default)]
    pub inventory_config: InventoryConfig,
    #[serde(default)]
    pub initial_inventory: BTreeMap<ResourceId, u16>,
    #[serde(default)]
    pub on_use: Vec<HandlerConfig>,
    #[serde(default)]
    pub on_tag_add: BTreeMap<TagId, Vec<HandlerConfig>>,
    #[serde(default)]
    pub on_tag_remove: BTreeMap<TagId, Vec<HandlerConfig>>,
    #[serde(default)]
    pub aoe: Vec<AoeConfig>,
    #[serde(default)]
    pub agent: Option<AgentConfig>,
}

/// The immutable configuration an external collaborator hands the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    pub num_agents: usize,
    pub obs_width: u8,
    pub obs_height: u8,
    /// 0 disables the step limit.
    #[serde(default)]
    pub max_steps: u32,
    /// Whether hitting `max_steps` truncates (true) or terminates (false).
    #[serde(default)]
    pub episode_truncates: bool,
    pub resource_names: Vec<String>,
    #[serde(default)]
    pub vibe_names: Vec<String>,
    pub num_observation_tokens: usize,
    #[serde(default)]
    pub global_obs: GlobalObsConfig,
    pub feature_ids: FeatureIds,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
    pub objects: BTreeMap<String, ObjectConfig>,
    /// Tag-id to display-name map (diagnostics only).
    #[serde(default)]
    pub tag_names: BTreeMap<TagId, String>,
    #[serde(default)]
    pub collectives: Vec<CollectiveConfig>,
    /// Per-action reward estimates exported to trainers (not read per tick).
    #[serde(default)]
    pub reward_estimates: BTreeMap<String, f32>,
    /// Base for multi-token value encoding (2..=256).
    #[serde(default = "default_token_base")]
    pub token_value_base: u32,
    #[serde(default)]
    pub events: Vec<EventConfig>,
    #[serde(default)]
    pub query_tags: Vec<QueryTagConfig>,
}

const fn default_token_base() -> u32 {
    256
}

impl GameConfig {
    /// Validate window, token base, and map shape; returns `(height, width)`.
    pub(crate) fn validate_map(&self, map: &[Vec<String>]) -> Result<(u16, u16), ConfigError> {
        let max = PackedCoord::MAX_COORD + 1;
        if self.obs_width > max || self.obs_height > max || self.obs_width == 0 || self.obs_height == 0
        {
            return Err(ConfigError::WindowTooLarge {
                width: self.obs_width,
                height: self.obs_height,
                max,
            });
        }
        if !(2..=256).contains(&self.token_value_base) {
            return Err(ConfigError::InvalidTokenBase(self.token_value_base));
        }
        let height = map.len();
        let width = map.first().map_or(0, Vec::len);
        if height == 0 || width == 0 || map.iter().any(|row| row.len() != width) {
            return Err(ConfigError::MalformedMap);
        }
        Ok((height as u16, width as u16))
    }
}

/// Diagnostic switches, routed through the constructor rather than read as
/// ambient globals. [`EngineOptions::from_env`] honors the documented
/// environment variables.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Collect and log per-phase tick timings.
    pub profiling: bool,
    /// Run both observation encoders and compare outputs byte-for-byte.
    pub obs_validation: bool,
    /// Use the optimized encoder as the primary path.
    pub use_optimized_obs: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            profiling: false,
            obs_validation: false,
            use_optimized_obs: true,
        }
    }
}

impl EngineOptions {
    /// Read the diagnostic environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let flag = |name: &str| std::env::var(name).is_ok_and(|v| v == "1");
        Self {
            profiling: flag("METTAGRID_PROFILING"),
            obs_validation: flag("METTAGRID_OBS_VALIDATION"),
            use_optimized_obs: std::env::var("METTAGRID_OBS_USE_OPTIMIZED")
                .map_or(true, |v| v == "1"),
        }
    }
}
