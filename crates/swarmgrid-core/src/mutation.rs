//! Mutations: effects applied when a handler's filters pass.

use crate::compile::{CompileCtx, CompileError};
use crate::handler::{DeferredDeltas, EffectCtx, EntityRef};
use crate::inventory::Delta;
use crate::query::{self, Query, QueryConfig};
use crate::types::{ResourceId, TagId};
use crate::value::{resolve_game_value, GameValue, GameValueConfig, GameValueScope};
use crate::world::{Owner, WorldCore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Alignment choices for [`MutationConfig::Alignment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlignTo {
    /// Align the target to the actor's collective.
    #[default]
    ActorCollective,
    /// Clear the target's alignment.
    None,
}

/// Which stats tracker a stats mutation writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StatsTarget {
    Game,
    Agent,
    #[default]
    Collective,
}

/// Which context entity resolves the stats target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StatsEntity {
    #[default]
    Target,
    Actor,
}

/// Serialized form of a mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MutationConfig {
    /// Add `delta` to the entity's inventory of `resource`.
    ResourceDelta {
        #[serde(default)]
        entity: EntityRef,
        resource: ResourceId,
        delta: Delta,
    },
    /// Move resources from one entity to another; `amount < 0` moves all
    /// available. Optionally removes the source from the grid and tag index
    /// when its inventory empties.
    ResourceTransfer {
        #[serde(default = "actor_ref")]
        source: EntityRef,
        #[serde(default)]
        destination: EntityRef,
        resource: ResourceId,
        #[serde(default = "all_available")]
        amount: Delta,
        #[serde(default)]
        remove_source_when_empty: bool,
    },
    /// Re-align the target's collective.
    Alignment {
        #[serde(default)]
        align_to: AlignTo,
        /// When set, align to this collective regardless of `align_to`.
        #[serde(default)]
        collective: Option<String>,
    },
    /// Set the target's freeze counter.
    Freeze { duration: u16 },
    /// Clear all, or a listed subset of, resources on the entity.
    ClearInventory {
        #[serde(default)]
        entity: EntityRef,
        #[serde(default)]
        resources: Vec<ResourceId>,
    },
    /// Consume a weapon unit on the actor, burn target armor, then damage
    /// target health with an integer percent multiplier.
    Attack {
        weapon: ResourceId,
        armor: ResourceId,
        health: ResourceId,
        #[serde(default = "full_multiplier")]
        damage_multiplier_pct: u32,
    },
    /// Add `delta` to a stat on the game, agent, or collective tracker.
    Stats {
        stat: String,
        #[serde(default = "one_f32")]
        delta: f32,
        #[serde(default)]
        target: StatsTarget,
        #[serde(default)]
        entity: StatsEntity,
    },
    /// Add a tag to the entity, firing lifecycle handlers unless suppressed.
    AddTag {
        #[serde(default)]
        entity: EntityRef,
        tag: TagId,
    },
    /// Remove a tag from the entity, firing lifecycle handlers unless
    /// suppressed.
    RemoveTag {
        #[serde(default)]
        entity: EntityRef,
        tag: TagId,
    },
    /// Remove every tag from a prefix group.
    RemoveTagsWithPrefix {
        #[serde(default)]
        entity: EntityRef,
        tags: Vec<TagId>,
    },
    /// Read `source`, write the resolved delta through `value` (inventory or
    /// mutable stat only).
    GameValue {
        value: GameValueConfig,
        #[serde(default)]
        target: EntityRef,
        source: GameValueConfig,
    },
    /// Ask the query system to recompute a materialized query tag.
    RecomputeMaterializedQuery { tag: TagId },
    /// Evaluate a query, then add fixed deltas to each result's inventory,
    /// or transfer against a source entity when one is set.
    QueryInventory {
        query: Box<QueryConfig>,
        deltas: Vec<(ResourceId, Delta)>,
        #[serde(default)]
        source: Option<EntityRef>,
    },
}

fn actor_ref() -> EntityRef {
    EntityRef::Actor
}

const fn all_available() -> Delta {
    -1
}

const fn full_multiplier() -> u32 {
    100
}

const fn one_f32() -> f32 {
    1.0
}

/// Compiled mutation evaluator.
#[derive(Debug, Clone)]
pub enum Mutation {
    ResourceDelta {
        entity: EntityRef,
        resource: ResourceId,
        delta: Delta,
    },
    ResourceTransfer {
        source: EntityRef,
        destination: EntityRef,
        resource: ResourceId,
        amount: Delta,
        remove_source_when_empty: bool,
    },
    Alignment {
        align_to: AlignTo,
        collective: Option<crate::types::CollectiveId>,
    },
    Freeze {
        duration: u16,
    },
    ClearInventory {
        entity: EntityRef,
        resources: Vec<ResourceId>,
    },
    Attack {
        weapon: ResourceId,
        armor: ResourceId,
        health: ResourceId,
        damage_multiplier_pct: u32,
    },
    Stats {
        stat: String,
        delta: f32,
        target: StatsTarget,
        entity: StatsEntity,
    },
    AddTag {
        entity: EntityRef,
        tag: TagId,
    },
    RemoveTag {
        entity: EntityRef,
        tag: TagId,
    },
    RemoveTagsWithPrefix {
        entity: EntityRef,
        mask: Vec<TagId>,
    },
    GameValue {
        value: GameValue,
        target: EntityRef,
        source: GameValue,
    },
    RecomputeMaterializedQuery {
        tag: TagId,
    },
    QueryInventory {
        query: Arc<Query>,
        deltas: Vec<(ResourceId, Delta)>,
        source: Option<EntityRef>,
    },
}

impl Mutation {
    /// Compile a mutation config into its evaluator.
    pub fn compile(config: &MutationConfig, setup: &CompileCtx) -> Result<Self, CompileError> {
        Ok(match config {
            MutationConfig::ResourceDelta {
                entity,
                resource,
                delta,
            } => Mutation::ResourceDelta {
                entity: *entity,
                resource: setup.check_resource(*resource)?,
                delta: *delta,
            },
            MutationConfig::ResourceTransfer {
                source,
                destination,
                resource,
                amount,
                remove_source_when_empty,
            } => Mutation::ResourceTransfer {
                source: *source,
                destination: *destination,
                resource: setup.check_resource(*resource)?,
                amount: *amount,
                remove_source_when_empty: *remove_source_when_empty,
            },
            MutationConfig::Alignment {
                align_to,
                collective,
            } => Mutation::Alignment {
                align_to: *align_to,
                collective: collective
                    .as_deref()
                    .map(|name| setup.collective(name))
                    .transpose()?,
            },
            MutationConfig::Freeze { duration } => Mutation::Freeze {
                duration: *duration,
            },
            MutationConfig::ClearInventory { entity, resources } => {
                for resource in resources {
                    setup.check_resource(*resource)?;
                }
                Mutation::ClearInventory {
                    entity: *entity,
                    resources: resources.clone(),
                }
            }
            MutationConfig::Attack {
                weapon,
                armor,
                health,
                damage_multiplier_pct,
            } => Mutation::Attack {
                weapon: setup.check_resource(*weapon)?,
                armor: setup.check_resource(*armor)?,
                health: setup.check_resource(*health)?,
                damage_multiplier_pct: *damage_multiplier_pct,
            },
            MutationConfig::Stats {
                stat,
                delta,
                target,
                entity,
            } => Mutation::Stats {
                stat: stat.clone(),
                delta: *delta,
                target: *target,
                entity: *entity,
            },
            MutationConfig::AddTag { entity, tag } => Mutation::AddTag {
                entity: *entity,
                tag: setup.check_tag(*tag)?,
            },
            MutationConfig::RemoveTag { entity, tag } => Mutation::RemoveTag {
                entity: *entity,
                tag: setup.check_tag(*tag)?,
            },
            MutationConfig::RemoveTagsWithPrefix { entity, tags } => {
                for tag in tags {
                    setup.check_tag(*tag)?;
                }
                Mutation::RemoveTagsWithPrefix {
                    entity: *entity,
                    mask: tags.clone(),
                }
            }
            MutationConfig::GameValue {
                value,
                target,
                source,
            } => {
                let value = GameValue::compile(value, setup)?;
                if !value.is_writable() {
                    return Err(CompileError::ReadOnlyGameValue);
                }
                Mutation::GameValue {
                    value,
                    target: *target,
                    source: GameValue::compile(source, setup)?,
                }
            }
            MutationConfig::RecomputeMaterializedQuery { tag } => {
                Mutation::RecomputeMaterializedQuery {
                    tag: setup.check_tag(*tag)?,
                }
            }
            MutationConfig::QueryInventory {
                query,
                deltas,
                source,
            } => {
                for (resource, _) in deltas {
                    setup.check_resource(*resource)?;
                }
                Mutation::QueryInventory {
                    query: Arc::new(Query::compile(query, setup)?),
                    deltas: deltas.clone(),
                    source: *source,
                }
            }
        })
    }

    /// Apply this mutation for `ctx`. Mutations never fail; unresolved
    /// entities make them no-ops.
    pub fn apply(
        &self,
        world: &mut WorldCore,
        ctx: &EffectCtx,
        deferred: Option<&mut DeferredDeltas>,
    ) {
        match self {
            Mutation::ResourceDelta {
                entity,
                resource,
                delta,
            } => {
                // Fixed AOE application installs an accumulator so net deltas
                // clamp once. Modifier resources shift limits and must apply
                // immediately.
                if let Some(deferred) = deferred {
                    if *entity == EntityRef::Target {
                        if let Some(target) = ctx.target {
                            let is_modifier = world
                                .objects
                                .get(target)
                                .is_some_and(|o| o.inventory_config.is_modifier(*resource));
                            if !is_modifier {
                                deferred.accumulate(*resource, *delta);
                                return;
                            }
                        }
                    }
                }
                if let Some(owner) = world.resolve_owner(ctx, *entity) {
                    world.update_inventory(owner, *resource, *delta);
                }
            }
            Mutation::ResourceTransfer {
                source,
                destination,
                resource,
                amount,
                remove_source_when_empty,
            } => {
                let (Some(src), Some(dst)) = (
                    world.resolve_owner(ctx, *source),
                    world.resolve_owner(ctx, *destination),
                ) else {
                    return;
                };
                let amount = if *amount < 0 {
                    Delta::from(world.inventory_amount(src, *resource))
                } else {
                    *amount
                };
                let moved = world.transfer(src, dst, *resource, amount);
                if moved > 0 {
                    if let Owner::Object(key) = src {
                        let name = world
                            .resource_names
                            .get(*resource as usize)
                            .cloned()
                            .unwrap_or_default();
                        if let Some(agent) =
                            world.objects.get_mut(key).and_then(|o| o.agent.as_mut())
                        {
                            agent.stats.add(&format!("{name}.deposited"), moved as f32);
                        }
                    }
                }
                if *remove_source_when_empty {
                    if let Owner::Object(key) = src {
                        let empty = world
                            .objects
                            .get(key)
                            .is_some_and(|o| o.inventory.is_empty());
                        if empty {
                            world.remove_from_grid(key);
                            if let Some(object) = world.objects.get(key) {
                                let tags: Vec<_> = object.tags.iter().collect();
                                for tag in tags {
                                    world.remove_tag(key, tag, ctx);
                                }
                            }
                        }
                    }
                }
            }
            Mutation::Alignment {
                align_to,
                collective,
            } => {
                let Some(target) = ctx.target else { return };
                if let Some(cid) = collective {
                    world.set_collective(target, Some(*cid));
                    return;
                }
                match align_to {
                    AlignTo::ActorCollective => {
                        let actor_coll = ctx.actor.and_then(|key| world.collective_of(key));
                        if let Some(cid) = actor_coll {
                            world.set_collective(target, Some(cid));
                        }
                    }
                    AlignTo::None => world.set_collective(target, None),
                }
            }
            Mutation::Freeze { duration } => {
                if let Some(agent) = ctx
                    .target
                    .and_then(|key| world.objects.get_mut(key))
                    .and_then(|object| object.agent.as_mut())
                {
                    agent.frozen = *duration;
                }
            }
            Mutation::ClearInventory { entity, resources } => {
                let Some(owner) = world.resolve_owner(ctx, *entity) else {
                    return;
                };
                let targets: Vec<ResourceId> = if resources.is_empty() {
                    match owner {
                        Owner::Object(key) => world
                            .objects
                            .get(key)
                            .map(|o| o.inventory.iter().map(|(r, _)| r).collect())
                            .unwrap_or_default(),
                        Owner::Collective(cid) => world
                            .collectives
                            .get(cid as usize)
                            .map(|c| c.inventory.iter().map(|(r, _)| r).collect())
                            .unwrap_or_default(),
                    }
                } else {
                    resources.clone()
                };
                for resource in targets {
                    let held = Delta::from(world.inventory_amount(owner, resource));
                    if held > 0 {
                        world.update_inventory(owner, resource, -held);
                    }
                }
            }
            Mutation::Attack {
                weapon,
                armor,
                health,
                damage_multiplier_pct,
            } => {
                let (Some(actor), Some(target)) = (ctx.actor, ctx.target) else {
                    return;
                };
                let spent = world.update_inventory(Owner::Object(actor), *weapon, -1);
                if spent == 0 {
                    return;
                }
                let mut damage = *damage_multiplier_pct as Delta / 100;
                if damage <= 0 {
                    return;
                }
                let shield = Delta::from(world.inventory_amount(Owner::Object(target), *armor));
                let absorbed = damage.min(shield);
                if absorbed > 0 {
                    world.update_inventory(Owner::Object(target), *armor, -absorbed);
                    damage -= absorbed;
                }
                if damage > 0 {
                    world.update_inventory(Owner::Object(target), *health, -damage);
                }
            }
            Mutation::Stats {
                stat,
                delta,
                target,
                entity,
            } => {
                let subject = match entity {
                    StatsEntity::Target => ctx.target,
                    StatsEntity::Actor => ctx.actor,
                };
                match target {
                    StatsTarget::Game => world.stats.add(stat, *delta),
                    StatsTarget::Agent => {
                        if let Some(agent) = subject
                            .and_then(|key| world.objects.get_mut(key))
                            .and_then(|object| object.agent.as_mut())
                        {
                            agent.stats.add(stat, *delta);
                        }
                    }
                    StatsTarget::Collective => {
                        if let Some(collective) = subject
                            .and_then(|key| world.collective_of(key))
                            .and_then(|cid| world.collectives.get_mut(cid as usize))
                        {
                            collective.stats.add(stat, *delta);
                        }
                    }
                }
            }
            Mutation::AddTag { entity, tag } => {
                if let Some(key) = world.resolve_entity(ctx, *entity) {
                    world.add_tag(key, *tag, ctx);
                }
            }
            Mutation::RemoveTag { entity, tag } => {
                if let Some(key) = world.resolve_entity(ctx, *entity) {
                    world.remove_tag(key, *tag, ctx);
                }
            }
            Mutation::RemoveTagsWithPrefix { entity, mask } => {
                if let Some(key) = world.resolve_entity(ctx, *entity) {
                    for tag in mask {
                        world.remove_tag(key, *tag, ctx);
                    }
                }
            }
            Mutation::GameValue {
                value,
                target,
                source,
            } => {
                let delta = resolve_game_value(world, ctx, source, *target);
                match value {
                    GameValue::Inventory { scope, resource } => {
                        let entity = if *scope == GameValueScope::Collective {
                            match target {
                                EntityRef::Actor => EntityRef::ActorCollective,
                                EntityRef::Target => EntityRef::TargetCollective,
                                other => *other,
                            }
                        } else {
                            *target
                        };
                        if let Some(owner) = world.resolve_owner(ctx, entity) {
                            world.update_inventory(owner, *resource, delta as Delta);
                        }
                    }
                    GameValue::Stat {
                        scope, stat_name, ..
                    } => {
                        let subject = world.resolve_entity(ctx, *target);
                        match scope {
                            GameValueScope::Game => world.stats.add(stat_name, delta),
                            GameValueScope::Agent => {
                                if let Some(agent) = subject
                                    .and_then(|key| world.objects.get_mut(key))
                                    .and_then(|object| object.agent.as_mut())
                                {
                                    agent.stats.add(stat_name, delta);
                                }
                            }
                            GameValueScope::Collective => {
                                if let Some(collective) = subject
                                    .and_then(|key| world.collective_of(key))
                                    .and_then(|cid| world.collectives.get_mut(cid as usize))
                                {
                                    collective.stats.add(stat_name, delta);
                                }
                            }
                        }
                    }
                    // Rejected at compile time.
                    _ => {}
                }
            }
            Mutation::RecomputeMaterializedQuery { tag } => {
                query::recompute(world, *tag);
            }
            Mutation::QueryInventory {
                query,
                deltas,
                source,
            } => {
                let results = query.evaluate(world);
                match source {
                    Some(source) => {
                        let Some(src) = world.resolve_owner(ctx, *source) else {
                            return;
                        };
                        for key in results {
                            for (resource, delta) in deltas {
                                if *delta > 0 {
                                    world.transfer(src, Owner::Object(key), *resource, *delta);
                                } else if *delta < 0 {
                                    world.transfer(Owner::Object(key), src, *resource, -*delta);
                                }
                            }
                        }
                    }
                    None => {
                        for key in results {
                            for (resource, delta) in deltas {
                                world.update_inventory(Owner::Object(key), *resource, *delta);
                            }
                        }
                    }
                }
            }
        }
    }
}
