//! Grid objects and the optional per-agent state carried by some of them.

use crate::aoe::AoeConfig;
use crate::handler::Handler;
use crate::inventory::{Inventory, InventoryConfig};
use crate::stats::StatsTracker;
use crate::types::{CollectiveId, GridLocation, TagSet, VibeId};
use slotmap::new_key_type;
use std::collections::HashMap;
use std::sync::Arc;

new_key_type! {
    /// Stable handle for grid objects backed by a generational slot map.
    pub struct ObjectKey;
}

/// Dense index of an agent within the engine's agent list.
pub type AgentId = u16;

/// Per-agent state attached to a [`GridObject`].
#[derive(Debug, Clone)]
pub struct AgentState {
    /// Index into the engine's agent list (also the reward-slot index).
    pub agent_id: AgentId,
    /// Group the agent belongs to (used for the group observation token).
    pub group: u8,
    /// Remaining frozen ticks; a frozen agent cannot act.
    pub frozen: u16,
    /// Where the agent was constructed; local-position tokens measure from here.
    pub spawn_location: GridLocation,
    /// Hard role id; 255 means unassigned.
    pub role: u8,
    /// Soft per-role weights (0..=255 each) used for role-gated rewards.
    pub role_weights: [u8; 4],
    /// Per-agent stats tracker.
    pub stats: StatsTracker,
    /// Handlers fired for this agent every tick after action dispatch.
    pub on_tick: Arc<[Handler]>,
}

impl AgentState {
    /// Construct agent state at its spawn location.
    #[must_use]
    pub fn new(agent_id: AgentId, group: u8, spawn: GridLocation, stats: StatsTracker) -> Self {
        Self {
            agent_id,
            group,
            frozen: 0,
            spawn_location: spawn,
            role: 255,
            role_weights: [0; 4],
            stats,
            on_tick: Arc::from([]),
        }
    }
}

/// One entity occupying at most one grid cell.
///
/// Agents are grid objects with `agent: Some(..)`; there is no deeper type
/// hierarchy. Behavior hooks (`on_use`, tag lifecycle handlers) are immutable
/// `Arc` chains so they can be invoked while the rest of the world is being
/// mutated.
#[derive(Debug, Clone)]
pub struct GridObject {
    pub type_id: u16,
    pub type_name: String,
    pub name: String,
    pub location: GridLocation,
    /// Whether the object currently occupies its grid cell. Objects removed
    /// from the grid (e.g. depleted resource piles) stay in the arena.
    pub in_grid: bool,
    pub vibe: VibeId,
    pub tags: TagSet,
    pub collective: Option<CollectiveId>,
    pub inventory: Inventory,
    pub inventory_config: Arc<InventoryConfig>,
    /// Ordered handler chain tried (first match wins) when the object is used.
    pub on_use: Arc<[Handler]>,
    /// Lifecycle handlers fired when a tag is gained.
    pub on_tag_add: HashMap<crate::types::TagId, Arc<[Handler]>>,
    /// Lifecycle handlers fired when a tag is lost.
    pub on_tag_remove: HashMap<crate::types::TagId, Arc<[Handler]>>,
    /// Passive AOE sources this object emits.
    pub aoe_configs: Vec<AoeConfig>,
    /// Agent-only state.
    pub agent: Option<AgentState>,
    /// Tick at which this object was last observed by any agent.
    pub last_seen_step: u32,
}

impl GridObject {
    /// Construct a plain object with no behavior hooks.
    #[must_use]
    pub fn new(type_id: u16, type_name: impl Into<String>, location: GridLocation) -> Self {
        let type_name = type_name.into();
        Self {
            type_id,
            name: type_name.clone(),
            type_name,
            location,
            in_grid: true,
            vibe: 0,
            tags: TagSet::new(),
            collective: None,
            inventory: Inventory::new(),
            inventory_config: Arc::new(InventoryConfig::unbounded()),
            on_use: Arc::from([]),
            on_tag_add: HashMap::new(),
            on_tag_remove: HashMap::new(),
            aoe_configs: Vec::new(),
            agent: None,
            last_seen_step: 0,
        }
    }

    /// Whether this object is an agent.
    #[must_use]
    pub fn is_agent(&self) -> bool {
        self.agent.is_some()
    }
}
