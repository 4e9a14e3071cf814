//! Filters: predicates over an `(actor, target)` effect context.

use crate::compile::{CompileCtx, CompileError};
use crate::handler::{EffectCtx, EntityRef};
use crate::query::{Query, QueryConfig};
use crate::types::{ResourceId, TagId, TagSet, VibeId};
use crate::value::{resolve_game_value, GameValue, GameValueConfig};
use crate::world::WorldCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Alignment conditions for [`FilterConfig::Alignment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlignmentCondition {
    /// Entity has a collective.
    Aligned,
    /// Entity has no collective.
    Unaligned,
    /// Actor and target belong to the same collective.
    #[default]
    SameCollective,
    /// Actor and target belong to different collectives.
    DifferentCollective,
}

/// Serialized form of a filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FilterConfig {
    /// Entity's vibe equals `vibe`.
    Vibe {
        #[serde(default)]
        entity: EntityRef,
        vibe: VibeId,
    },
    /// Entity holds at least `min_amount` of `resource`.
    Resource {
        #[serde(default)]
        entity: EntityRef,
        resource: ResourceId,
        #[serde(default = "one")]
        min_amount: u16,
    },
    /// Alignment relationship, optionally against a specific collective.
    Alignment {
        #[serde(default)]
        entity: EntityRef,
        #[serde(default)]
        condition: AlignmentCondition,
        #[serde(default)]
        collective: Option<String>,
    },
    /// Entity carries `tag`.
    Tag {
        #[serde(default)]
        entity: EntityRef,
        tag: TagId,
    },
    /// Actor and target share at least one tag from the prefix group.
    SharedTagPrefix { tags: Vec<TagId> },
    /// Entity carries any tag from the prefix group.
    TagPrefix {
        #[serde(default)]
        entity: EntityRef,
        tags: Vec<TagId>,
    },
    /// A resolved game value compares `>= threshold`.
    GameValue {
        value: GameValueConfig,
        #[serde(default)]
        threshold: f32,
        #[serde(default)]
        entity: EntityRef,
    },
    /// Unary: entity within `radius` (squared L2) of any source-query
    /// result; radius 0 means unbounded, so "the query returns anything".
    /// Binary (no source): actor within `radius` of entity.
    MaxDistance {
        #[serde(default)]
        entity: EntityRef,
        #[serde(default)]
        source: Option<Box<QueryConfig>>,
        #[serde(default)]
        radius: u32,
    },
    /// Summed inventory of query results meets every per-resource minimum.
    QueryResource {
        query: Box<QueryConfig>,
        requirements: Vec<(ResourceId, u16)>,
    },
    /// Entity is within Chebyshev `radius` of an object that carries `tag`
    /// and passes all `inner` filters (candidate bound as target).
    Near {
        #[serde(default)]
        entity: EntityRef,
        tag: TagId,
        radius: u16,
        #[serde(default)]
        inner: Vec<FilterConfig>,
    },
    /// NOT(AND of `inner`).
    Neg { inner: Vec<FilterConfig> },
    /// OR of `inner`, short-circuit.
    Or { inner: Vec<FilterConfig> },
}

fn one() -> u16 {
    1
}

/// Compiled filter evaluator.
#[derive(Debug, Clone)]
pub enum Filter {
    Vibe {
        entity: EntityRef,
        vibe: VibeId,
    },
    Resource {
        entity: EntityRef,
        resource: ResourceId,
        min_amount: u16,
    },
    Alignment {
        entity: EntityRef,
        condition: AlignmentCondition,
        collective: Option<crate::types::CollectiveId>,
    },
    Tag {
        entity: EntityRef,
        tag: TagId,
    },
    SharedTagPrefix {
        mask: TagSet,
    },
    TagPrefix {
        entity: EntityRef,
        mask: TagSet,
    },
    GameValue {
        value: GameValue,
        threshold: f32,
        entity: EntityRef,
    },
    MaxDistance {
        entity: EntityRef,
        source: Option<Arc<Query>>,
        radius: u32,
    },
    QueryResource {
        query: Arc<Query>,
        requirements: Vec<(ResourceId, u16)>,
    },
    Near {
        entity: EntityRef,
        tag: TagId,
        radius: u16,
        inner: Vec<Filter>,
    },
    Neg {
        inner: Vec<Filter>,
    },
    Or {
        inner: Vec<Filter>,
    },
}

fn compile_list(configs: &[FilterConfig], setup: &CompileCtx) -> Result<Vec<Filter>, CompileError> {
    configs.iter().map(|c| Filter::compile(c, setup)).collect()
}

impl Filter {
    /// Compile a filter config into its evaluator.
    pub fn compile(config: &FilterConfig, setup: &CompileCtx) -> Result<Self, CompileError> {
        Ok(match config {
            FilterConfig::Vibe { entity, vibe } => Filter::Vibe {
                entity: *entity,
                vibe: setup.check_vibe(*vibe)?,
            },
            FilterConfig::Resource {
                entity,
                resource,
                min_amount,
            } => Filter::Resource {
                entity: *entity,
                resource: setup.check_resource(*resource)?,
                min_amount: *min_amount,
            },
            FilterConfig::Alignment {
                entity,
                condition,
                collective,
            } => Filter::Alignment {
                entity: *entity,
                condition: *condition,
                collective: collective
                    .as_deref()
                    .map(|name| setup.collective(name))
                    .transpose()?,
            },
            FilterConfig::Tag { entity, tag } => Filter::Tag {
                entity: *entity,
                tag: setup.check_tag(*tag)?,
            },
            FilterConfig::SharedTagPrefix { tags } => {
                for tag in tags {
                    setup.check_tag(*tag)?;
                }
                Filter::SharedTagPrefix {
                    mask: TagSet::from_tags(tags),
                }
            }
            FilterConfig::TagPrefix { entity, tags } => {
                for tag in tags {
                    setup.check_tag(*tag)?;
                }
                Filter::TagPrefix {
                    entity: *entity,
                    mask: TagSet::from_tags(tags),
                }
            }
            FilterConfig::GameValue {
                value,
                threshold,
                entity,
            } => Filter::GameValue {
                value: GameValue::compile(value, setup)?,
                threshold: *threshold,
                entity: *entity,
            },
            FilterConfig::MaxDistance {
                entity,
                source,
                radius,
            } => Filter::MaxDistance {
                entity: *entity,
                source: source
                    .as_deref()
                    .map(|q| Query::compile(q, setup).map(Arc::new))
                    .transpose()?,
                radius: *radius,
            },
            FilterConfig::QueryResource {
                query,
                requirements,
            } => {
                for (resource, _) in requirements {
                    setup.check_resource(*resource)?;
                }
                Filter::QueryResource {
                    query: Arc::new(Query::compile(query, setup)?),
                    requirements: requirements.clone(),
                }
            }
            FilterConfig::Near {
                entity,
                tag,
                radius,
                inner,
            } => Filter::Near {
                entity: *entity,
                tag: setup.check_tag(*tag)?,
                radius: *radius,
                inner: compile_list(inner, setup)?,
            },
            FilterConfig::Neg { inner } => Filter::Neg {
                inner: compile_list(inner, setup)?,
            },
            FilterConfig::Or { inner } => Filter::Or {
                inner: compile_list(inner, setup)?,
            },
        })
    }

    /// Evaluate this filter for `ctx`.
    pub fn passes(&self, world: &mut WorldCore, ctx: &EffectCtx) -> bool {
        match self {
            Filter::Vibe { entity, vibe } => world
                .resolve_entity(ctx, *entity)
                .and_then(|key| world.objects.get(key))
                .is_some_and(|object| object.vibe == *vibe),
            Filter::Resource {
                entity,
                resource,
                min_amount,
            } => world
                .resolve_entity(ctx, *entity)
                .and_then(|key| world.objects.get(key))
                .is_some_and(|object| object.inventory.amount(*resource) >= *min_amount),
            Filter::Alignment {
                entity,
                condition,
                collective,
            } => {
                if let Some(required) = collective {
                    return world
                        .resolve_entity(ctx, *entity)
                        .and_then(|key| world.collective_of(key))
                        .is_some_and(|cid| cid == *required);
                }
                let actor_coll = ctx.actor.and_then(|key| world.collective_of(key));
                let target_coll = ctx.target.and_then(|key| world.collective_of(key));
                let entity_coll = match entity {
                    EntityRef::Actor | EntityRef::ActorCollective => actor_coll,
                    EntityRef::Target | EntityRef::TargetCollective => target_coll,
                };
                match condition {
                    AlignmentCondition::Aligned => entity_coll.is_some(),
                    AlignmentCondition::Unaligned => entity_coll.is_none(),
                    AlignmentCondition::SameCollective => {
                        actor_coll.is_some() && actor_coll == target_coll
                    }
                    AlignmentCondition::DifferentCollective => {
                        actor_coll.is_some() && target_coll.is_some() && actor_coll != target_coll
                    }
                }
            }
            Filter::Tag { entity, tag } => world
                .resolve_entity(ctx, *entity)
                .and_then(|key| world.objects.get(key))
                .is_some_and(|object| object.tags.contains(*tag)),
            Filter::SharedTagPrefix { mask } => {
                let masked = |key: Option<crate::object::ObjectKey>| {
                    key.and_then(|k| world.objects.get(k))
                        .map(|object| object.tags)
                        .unwrap_or_default()
                };
                let actor_tags = masked(ctx.actor);
                let target_tags = masked(ctx.target);
                let mut shared = TagSet::new();
                for tag in mask.iter() {
                    if actor_tags.contains(tag) && target_tags.contains(tag) {
                        shared.insert(tag);
                    }
                }
                !shared.is_empty()
            }
            Filter::TagPrefix { entity, mask } => world
                .resolve_entity(ctx, *entity)
                .and_then(|key| world.objects.get(key))
                .is_some_and(|object| object.tags.intersects(mask)),
            Filter::GameValue {
                value,
                threshold,
                entity,
            } => resolve_game_value(world, ctx, value, *entity) >= *threshold,
            Filter::MaxDistance {
                entity,
                source,
                radius,
            } => {
                let Some(entity_key) = world.resolve_entity(ctx, *entity) else {
                    return false;
                };
                let entity_loc = match world.objects.get(entity_key) {
                    Some(object) => object.location,
                    None => return false,
                };
                match source {
                    None => {
                        // Binary mode: distance from actor to entity.
                        let Some(actor) = ctx.actor else { return false };
                        if *radius == 0 {
                            return true;
                        }
                        let Some(actor_loc) = world.objects.get(actor).map(|o| o.location)
                        else {
                            return false;
                        };
                        let r = i64::from(*radius);
                        entity_loc.distance_sq(&actor_loc) <= r * r
                    }
                    Some(query) => {
                        let sources = query.evaluate(world);
                        if *radius == 0 {
                            // 0 = unlimited range: passes iff anything matched.
                            return !sources.is_empty();
                        }
                        let r = i64::from(*radius);
                        sources.iter().any(|key| {
                            world.objects.get(*key).is_some_and(|object| {
                                entity_loc.distance_sq(&object.location) <= r * r
                            })
                        })
                    }
                }
            }
            Filter::QueryResource {
                query,
                requirements,
            } => {
                let results = query.evaluate(world);
                requirements.iter().all(|(resource, min_amount)| {
                    let total: u32 = results
                        .iter()
                        .map(|key| {
                            world
                                .objects
                                .get(*key)
                                .map_or(0, |o| u32::from(o.inventory.amount(*resource)))
                        })
                        .sum();
                    total >= u32::from(*min_amount)
                })
            }
            Filter::Near {
                entity,
                tag,
                radius,
                inner,
            } => {
                let Some(entity_key) = world.resolve_entity(ctx, *entity) else {
                    return false;
                };
                let Some(entity_loc) = world.objects.get(entity_key).map(|o| o.location) else {
                    return false;
                };
                let candidates: Vec<_> = world.tag_index.objects_with_tag(*tag).to_vec();
                for candidate in candidates {
                    let within = world
                        .objects
                        .get(candidate)
                        .is_some_and(|object| entity_loc.chebyshev(&object.location) <= *radius);
                    if !within {
                        continue;
                    }
                    if inner.is_empty() {
                        return true;
                    }
                    let inner_ctx = EffectCtx {
                        actor: ctx.actor,
                        target: Some(candidate),
                        skip_tag_triggers: ctx.skip_tag_triggers,
                    };
                    if inner.iter().all(|f| f.passes(world, &inner_ctx)) {
                        return true;
                    }
                }
                false
            }
            Filter::Neg { inner } => !inner.iter().all(|f| f.passes(world, ctx)),
            Filter::Or { inner } => inner.iter().any(|f| f.passes(world, ctx)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::GridObject;
    use crate::types::GridLocation;
    use std::sync::Arc as StdArc;

    fn setup() -> (WorldCore, CompileCtx) {
        let world = WorldCore::new(
            8,
            8,
            1,
            StdArc::new(vec!["ore".into(), "heart".into()]),
        );
        let compile = CompileCtx {
            collective_ids: Default::default(),
            num_resources: 2,
            num_vibes: 4,
        };
        (world, compile)
    }

    fn object_at(world: &mut WorldCore, r: u16, c: u16) -> crate::object::ObjectKey {
        world
            .insert_object(GridObject::new(0, "thing", GridLocation::new(r, c)))
            .expect("insert")
    }

    #[test]
    fn vibe_and_resource_filters() {
        let (mut world, compile) = setup();
        let key = object_at(&mut world, 0, 0);
        world.objects[key].vibe = 2;
        world.update_inventory(crate::world::Owner::Object(key), 0, 3);

        let ctx = EffectCtx::on_self(key);
        let vibe = Filter::compile(
            &FilterConfig::Vibe {
                entity: EntityRef::Target,
                vibe: 2,
            },
            &compile,
        )
        .expect("compile");
        assert!(vibe.passes(&mut world, &ctx));

        let resource = Filter::compile(
            &FilterConfig::Resource {
                entity: EntityRef::Target,
                resource: 0,
                min_amount: 4,
            },
            &compile,
        )
        .expect("compile");
        assert!(!resource.passes(&mut world, &ctx));
    }

    #[test]
    fn shared_tag_prefix_requires_overlap_within_mask() {
        let (mut world, compile) = setup();
        let a = object_at(&mut world, 0, 0);
        let b = object_at(&mut world, 0, 1);
        let ctx = EffectCtx::acting(a, b);
        world.add_tag(a, 10, &ctx);
        world.add_tag(b, 11, &ctx);

        let filter = Filter::compile(
            &FilterConfig::SharedTagPrefix {
                tags: vec![10, 11],
            },
            &compile,
        )
        .expect("compile");
        assert!(!filter.passes(&mut world, &ctx));

        world.add_tag(b, 10, &ctx);
        assert!(filter.passes(&mut world, &ctx));
    }

    #[test]
    fn binary_max_distance_checks_actor_to_entity() {
        let (mut world, compile) = setup();
        let a = object_at(&mut world, 0, 0);
        let b = object_at(&mut world, 0, 3);
        let ctx = EffectCtx::acting(a, b);

        let near = Filter::compile(
            &FilterConfig::MaxDistance {
                entity: EntityRef::Target,
                source: None,
                radius: 2,
            },
            &compile,
        )
        .expect("compile");
        assert!(!near.passes(&mut world, &ctx));

        let unbounded = Filter::compile(
            &FilterConfig::MaxDistance {
                entity: EntityRef::Target,
                source: None,
                radius: 0,
            },
            &compile,
        )
        .expect("compile");
        assert!(unbounded.passes(&mut world, &ctx));
    }

    #[test]
    fn unary_max_distance_with_zero_radius_checks_existence() {
        let (mut world, compile) = setup();
        let a = object_at(&mut world, 0, 0);
        let far = object_at(&mut world, 7, 7);
        let ctx = EffectCtx::on_self(a);
        world.add_tag(far, 6, &ctx);

        let source = crate::query::QueryConfig::Tag {
            tag: 6,
            filters: vec![],
            max_items: 0,
            order_by: crate::query::QueryOrderBy::None,
        };
        let exists = Filter::compile(
            &FilterConfig::MaxDistance {
                entity: EntityRef::Target,
                source: Some(Box::new(source.clone())),
                radius: 0,
            },
            &compile,
        )
        .expect("compile");
        // Radius 0 means unbounded: the far object satisfies the filter.
        assert!(exists.passes(&mut world, &ctx));

        let bounded = Filter::compile(
            &FilterConfig::MaxDistance {
                entity: EntityRef::Target,
                source: Some(Box::new(source)),
                radius: 3,
            },
            &compile,
        )
        .expect("compile");
        assert!(!bounded.passes(&mut world, &ctx));

        world.remove_tag(far, 6, &ctx);
        assert!(!exists.passes(&mut world, &ctx));
    }

    #[test]
    fn neg_negates_the_and_of_inner_filters() {
        let (mut world, compile) = setup();
        let key = object_at(&mut world, 0, 0);
        let ctx = EffectCtx::on_self(key);
        world.add_tag(key, 4, &ctx);

        let neg_both = Filter::compile(
            &FilterConfig::Neg {
                inner: vec![
                    FilterConfig::Tag {
                        entity: EntityRef::Target,
                        tag: 4,
                    },
                    FilterConfig::Tag {
                        entity: EntityRef::Target,
                        tag: 5,
                    },
                ],
            },
            &compile,
        )
        .expect("compile");
        // Tag 5 is absent, the AND fails, so the negation passes.
        assert!(neg_both.passes(&mut world, &ctx));
    }
}
