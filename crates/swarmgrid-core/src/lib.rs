//! Data model and effect algebra for the SwarmGrid simulation core.
//!
//! This crate owns everything below the engine tick: the object arena and
//! cell grid, tag bookkeeping, inventories, stats, collectives, and the
//! filter / mutation / query algebra that drives events, AOE effects, action
//! handlers, tag lifecycle hooks, and reward references.

pub mod aoe;
pub mod collective;
pub mod compile;
pub mod event;
pub mod filter;
pub mod grid;
pub mod handler;
pub mod inventory;
pub mod mutation;
pub mod object;
pub mod query;
pub mod stats;
pub mod tag_index;
pub mod types;
pub mod value;
pub mod world;

pub use aoe::{AoeConfig, AoeTracker, PresenceDelta, TerritoryControl};
pub use collective::{Collective, CollectiveConfig};
pub use compile::{CompileCtx, CompileError};
pub use event::{EventConfig, EventScheduler};
pub use filter::{AlignmentCondition, Filter, FilterConfig};
pub use grid::{Grid, GridError};
pub use handler::{
    DeferredDeltas, EffectCtx, EntityRef, Handler, HandlerConfig, HandlerMode, MultiHandler,
};
pub use inventory::{Inventory, InventoryConfig, LimitModifier};
pub use mutation::{AlignTo, Mutation, MutationConfig, StatsEntity, StatsTarget};
pub use object::{AgentId, AgentState, GridObject, ObjectKey};
pub use query::{Query, QueryConfig, QueryOrderBy, QueryTagConfig, QueryTagDef};
pub use stats::{StatId, StatsTracker};
pub use tag_index::TagIndex;
pub use types::{
    CollectiveId, GridCoord, GridLocation, PackedCoord, ResourceId, TagId, TagSet, VibeId,
    MAX_TAGS,
};
pub use value::{GameValue, GameValueConfig, GameValueScope};
pub use world::{Owner, WorldCore};
