//! Game values: typed references to dynamic quantities.

use crate::compile::{CompileCtx, CompileError};
use crate::handler::{EffectCtx, EntityRef};
use crate::object::ObjectKey;
use crate::query::{Query, QueryConfig};
use crate::types::{ResourceId, TagId};
use crate::world::WorldCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which stats tracker a scoped value reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GameValueScope {
    #[default]
    Agent,
    Game,
    Collective,
}

/// Serialized form of a game value reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GameValueConfig {
    /// Inventory amount of a resource on the entity (or its collective).
    Inventory {
        #[serde(default)]
        scope: GameValueScope,
        resource: ResourceId,
    },
    /// A named stat on the scoped stats tracker. With `delta = true` the
    /// consumer reads per-step differences via a snapshot it maintains.
    Stat {
        #[serde(default)]
        scope: GameValueScope,
        stat_name: String,
        #[serde(default)]
        delta: bool,
    },
    /// Number of objects currently carrying a tag.
    TagCount { tag: TagId },
    /// A constant.
    Const { value: f32 },
    /// Sum of a resource over the results of a query.
    QueryInventory {
        resource: ResourceId,
        query: Box<QueryConfig>,
    },
}

/// Compiled game value reference.
#[derive(Debug, Clone)]
pub enum GameValue {
    Inventory {
        scope: GameValueScope,
        resource: ResourceId,
    },
    Stat {
        scope: GameValueScope,
        stat_name: String,
        delta: bool,
    },
    TagCount {
        tag: TagId,
    },
    Const(f32),
    QueryInventory {
        resource: ResourceId,
        query: Arc<Query>,
    },
}

impl GameValue {
    /// Compile a game value config.
    pub fn compile(config: &GameValueConfig, setup: &CompileCtx) -> Result<Self, CompileError> {
        Ok(match config {
            GameValueConfig::Inventory { scope, resource } => GameValue::Inventory {
                scope: *scope,
                resource: setup.check_resource(*resource)?,
            },
            GameValueConfig::Stat {
                scope,
                stat_name,
                delta,
            } => GameValue::Stat {
                scope: *scope,
                stat_name: stat_name.clone(),
                delta: *delta,
            },
            GameValueConfig::TagCount { tag } => GameValue::TagCount {
                tag: setup.check_tag(*tag)?,
            },
            GameValueConfig::Const { value } => GameValue::Const(*value),
            GameValueConfig::QueryInventory { resource, query } => GameValue::QueryInventory {
                resource: setup.check_resource(*resource)?,
                query: Arc::new(Query::compile(query, setup)?),
            },
        })
    }

    /// Whether a mutation may write through this value.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        matches!(self, GameValue::Inventory { .. } | GameValue::Stat { .. })
    }
}

/// Read a scoped stat for `entity` without mutating anything.
pub(crate) fn read_scoped_stat(
    world: &WorldCore,
    scope: GameValueScope,
    entity: Option<ObjectKey>,
    stat_name: &str,
) -> f32 {
    match scope {
        GameValueScope::Agent => entity
            .and_then(|key| world.objects.get(key))
            .and_then(|object| object.agent.as_ref())
            .map_or(0.0, |agent| agent.stats.get(stat_name)),
        GameValueScope::Collective => entity
            .and_then(|key| world.collective_of(key))
            .and_then(|cid| world.collectives.get(cid as usize))
            .map_or(0.0, |collective| collective.stats.get(stat_name)),
        GameValueScope::Game => world.stats.get(stat_name),
    }
}

/// Resolve a compiled game value to its current float, binding `entity` as
/// the subject. The `delta` flag on stat values is applied by consumers that
/// keep a per-step snapshot, not here.
pub fn resolve_game_value(
    world: &mut WorldCore,
    ctx: &EffectCtx,
    value: &GameValue,
    entity: EntityRef,
) -> f32 {
    match value {
        GameValue::Inventory { scope, resource } => {
            // Collective scope redirects the entity reference to its collective.
            let entity = if *scope == GameValueScope::Collective {
                match entity {
                    EntityRef::Actor => EntityRef::ActorCollective,
                    EntityRef::Target => EntityRef::TargetCollective,
                    other => other,
                }
            } else {
                entity
            };
            match world.resolve_owner(ctx, entity) {
                Some(owner) => f32::from(world.inventory_amount(owner, *resource)),
                None => 0.0,
            }
        }
        GameValue::Stat {
            scope, stat_name, ..
        } => {
            let entity = world.resolve_entity(ctx, entity);
            read_scoped_stat(world, *scope, entity, stat_name)
        }
        GameValue::TagCount { tag } => world.tag_index.count(*tag),
        GameValue::Const(value) => *value,
        GameValue::QueryInventory { resource, query } => {
            let results = query.evaluate(world);
            results
                .iter()
                .map(|key| {
                    world
                        .objects
                        .get(*key)
                        .map_or(0.0, |o| f32::from(o.inventory.amount(*resource)))
                })
                .sum()
        }
    }
}
