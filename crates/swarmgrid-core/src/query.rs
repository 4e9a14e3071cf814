//! Queries over the object population and materialized query tags.

use crate::compile::{CompileCtx, CompileError};
use crate::filter::{Filter, FilterConfig};
use crate::handler::EffectCtx;
use crate::object::ObjectKey;
use crate::types::{GridLocation, TagId};
use crate::world::WorldCore;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Post-processing order for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QueryOrderBy {
    #[default]
    None,
    /// Shuffle results with the engine RNG (deterministic under the seed).
    Random,
}

/// Serialized form of a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueryConfig {
    /// Objects carrying `tag`, restricted by `filters`.
    Tag {
        tag: TagId,
        #[serde(default)]
        filters: Vec<FilterConfig>,
        #[serde(default)]
        max_items: usize,
        #[serde(default)]
        order_by: QueryOrderBy,
    },
    /// BFS from the source query's results through the 8-connected
    /// neighborhood. Expansion is gated by `edge_filters` (actor = current
    /// member, target = candidate); an empty list means "seeds only". BFS
    /// depth is bounded by `radius` (0 = unlimited). `result_filters`
    /// optionally restrict the final membership.
    Closure {
        source: Box<QueryConfig>,
        #[serde(default)]
        radius: u16,
        #[serde(default)]
        edge_filters: Vec<FilterConfig>,
        #[serde(default)]
        result_filters: Vec<FilterConfig>,
        #[serde(default)]
        max_items: usize,
        #[serde(default)]
        order_by: QueryOrderBy,
    },
    /// Evaluate `inner`, then keep results passing `filters`.
    Filtered {
        inner: Box<QueryConfig>,
        filters: Vec<FilterConfig>,
        #[serde(default)]
        max_items: usize,
        #[serde(default)]
        order_by: QueryOrderBy,
    },
}

/// Compiled query evaluator.
#[derive(Debug, Clone)]
pub struct Query {
    kind: QueryKind,
    max_items: usize,
    order_by: QueryOrderBy,
}

#[derive(Debug, Clone)]
enum QueryKind {
    Tag {
        tag: TagId,
        filters: Vec<Filter>,
    },
    Closure {
        source: Arc<Query>,
        radius: u16,
        edge_filters: Vec<Filter>,
        result_filters: Vec<Filter>,
    },
    Filtered {
        inner: Arc<Query>,
        filters: Vec<Filter>,
    },
}

fn compile_filters(
    configs: &[FilterConfig],
    setup: &CompileCtx,
) -> Result<Vec<Filter>, CompileError> {
    configs.iter().map(|c| Filter::compile(c, setup)).collect()
}

/// Whether every filter passes with actor = target = `candidate`.
fn matches_filters(world: &mut WorldCore, filters: &[Filter], candidate: ObjectKey) -> bool {
    if filters.is_empty() {
        return true;
    }
    let ctx = EffectCtx::on_self(candidate);
    filters.iter().all(|f| f.passes(world, &ctx))
}

impl Query {
    /// Compile a query config.
    pub fn compile(config: &QueryConfig, setup: &CompileCtx) -> Result<Self, CompileError> {
        Ok(match config {
            QueryConfig::Tag {
                tag,
                filters,
                max_items,
                order_by,
            } => Query {
                kind: QueryKind::Tag {
                    tag: setup.check_tag(*tag)?,
                    filters: compile_filters(filters, setup)?,
                },
                max_items: *max_items,
                order_by: *order_by,
            },
            QueryConfig::Closure {
                source,
                radius,
                edge_filters,
                result_filters,
                max_items,
                order_by,
            } => Query {
                kind: QueryKind::Closure {
                    source: Arc::new(Query::compile(source, setup)?),
                    radius: *radius,
                    edge_filters: compile_filters(edge_filters, setup)?,
                    result_filters: compile_filters(result_filters, setup)?,
                },
                max_items: *max_items,
                order_by: *order_by,
            },
            QueryConfig::Filtered {
                inner,
                filters,
                max_items,
                order_by,
            } => Query {
                kind: QueryKind::Filtered {
                    inner: Arc::new(Query::compile(inner, setup)?),
                    filters: compile_filters(filters, setup)?,
                },
                max_items: *max_items,
                order_by: *order_by,
            },
        })
    }

    /// Evaluate this query against the world.
    pub fn evaluate(&self, world: &mut WorldCore) -> Vec<ObjectKey> {
        let results = match &self.kind {
            QueryKind::Tag { tag, filters } => {
                let candidates: Vec<ObjectKey> = world.tag_index.objects_with_tag(*tag).to_vec();
                candidates
                    .into_iter()
                    .filter(|key| matches_filters(world, filters, *key))
                    .collect()
            }
            QueryKind::Closure {
                source,
                radius,
                edge_filters,
                result_filters,
            } => {
                let mut visited = closure_bfs(world, source, *radius, edge_filters);
                if !result_filters.is_empty() {
                    visited.retain(|key| matches_filters(world, result_filters, *key));
                }
                visited
            }
            QueryKind::Filtered { inner, filters } => {
                let mut results = inner.evaluate(world);
                results.retain(|key| matches_filters(world, filters, *key));
                results
            }
        };
        self.apply_limits(world, results)
    }

    fn apply_limits(&self, world: &mut WorldCore, mut results: Vec<ObjectKey>) -> Vec<ObjectKey> {
        if self.order_by == QueryOrderBy::Random {
            results.shuffle(&mut world.rng);
        }
        if self.max_items > 0 && results.len() > self.max_items {
            results.truncate(self.max_items);
        }
        results
    }
}

/// BFS from the seed set through the grid's 8-connected neighborhood.
///
/// Returns members in discovery order (seeds first), which keeps downstream
/// mutation order deterministic.
fn closure_bfs(
    world: &mut WorldCore,
    source: &Query,
    radius: u16,
    edge_filters: &[Filter],
) -> Vec<ObjectKey> {
    let seeds = source.evaluate(world);

    let max_depth = if radius == 0 {
        u32::MAX
    } else {
        u32::from(radius)
    };
    let mut order: Vec<ObjectKey> = Vec::with_capacity(seeds.len());
    let mut depth: HashMap<ObjectKey, u32> = HashMap::new();
    let mut frontier: VecDeque<ObjectKey> = VecDeque::new();

    for seed in seeds {
        if !depth.contains_key(&seed) {
            depth.insert(seed, 0);
            order.push(seed);
            frontier.push_back(seed);
        }
    }

    // An empty edge-filter list means "seeds only, no expansion"; otherwise
    // every neighbor would trivially qualify.
    if edge_filters.is_empty() {
        return order;
    }

    while let Some(current) = frontier.pop_front() {
        let current_depth = depth[&current];
        if current_depth >= max_depth {
            continue;
        }
        let Some(center) = world.objects.get(current).map(|o| o.location) else {
            continue;
        };
        let mut neighbors: Vec<(GridLocation, ObjectKey)> = Vec::with_capacity(8);
        let grid = &world.grid;
        grid.for_each_neighbor(center, 1, |loc| {
            if let Some(key) = grid.object_at(loc) {
                neighbors.push((loc, key));
            }
        });
        for (_, candidate) in neighbors {
            if depth.contains_key(&candidate) {
                continue;
            }
            let ctx = EffectCtx::acting(current, candidate);
            if edge_filters.iter().all(|f| f.passes(world, &ctx)) {
                depth.insert(candidate, current_depth + 1);
                order.push(candidate);
                frontier.push_back(candidate);
            }
        }
    }

    order
}

/// A materialized query tag: tag membership recomputed from a query.
#[derive(Debug, Clone)]
pub struct QueryTagDef {
    pub tag: TagId,
    pub query: Arc<Query>,
}

/// Serialized form of a materialized query tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTagConfig {
    pub tag: TagId,
    pub query: QueryConfig,
}

impl QueryTagDef {
    /// Compile a query tag config.
    pub fn compile(config: &QueryTagConfig, setup: &CompileCtx) -> Result<Self, CompileError> {
        Ok(Self {
            tag: setup.check_tag(config.tag)?,
            query: Arc::new(Query::compile(&config.query, setup)?),
        })
    }
}

/// Recompute every materialized query tag from scratch. Lifecycle handlers
/// are suppressed; used at engine init.
pub fn compute_all(world: &mut WorldCore) {
    let defs: Vec<QueryTagDef> = world.query_tags.clone();
    let ctx = EffectCtx {
        actor: None,
        target: None,
        skip_tag_triggers: true,
    };
    for def in defs {
        let tagged: Vec<ObjectKey> = world.tag_index.objects_with_tag(def.tag).to_vec();
        for key in tagged {
            world.remove_tag(key, def.tag, &ctx);
        }
        let members = def.query.evaluate(world);
        for key in members {
            world.add_tag(key, def.tag, &ctx);
        }
    }
}

/// Recompute a single materialized query tag.
///
/// Membership is rewritten with lifecycle handlers suppressed, then
/// `on_tag_remove` fires exactly once for each net loser and `on_tag_add`
/// exactly once for each net gainer.
pub fn recompute(world: &mut WorldCore, tag: TagId) {
    let Some(def) = world.query_tags.iter().find(|d| d.tag == tag).cloned() else {
        return;
    };

    let ctx = EffectCtx {
        actor: None,
        target: None,
        skip_tag_triggers: true,
    };

    let before: Vec<ObjectKey> = world.tag_index.objects_with_tag(tag).to_vec();
    for key in &before {
        world.remove_tag(*key, tag, &ctx);
    }

    let after = def.query.evaluate(world);
    for key in &after {
        world.add_tag(*key, tag, &ctx);
    }

    let before_set: HashSet<ObjectKey> = before.iter().copied().collect();
    let after_set: HashSet<ObjectKey> = after.iter().copied().collect();

    for key in &before {
        if !after_set.contains(key) {
            world.fire_tag_removed_handlers(*key, tag);
        }
    }
    for key in &after {
        if !before_set.contains(key) {
            world.fire_tag_added_handlers(*key, tag);
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
        let world = WorldCore::new(8, 8, 42, StdArc::new(vec!["ore".into()]));
        let compile = CompileCtx {
            collective_ids: Default::default(),
            num_resources: 1,
            num_vibes: 1,
        };
        (world, compile)
    }

    fn tagged_object(world: &mut WorldCore, r: u16, c: u16, tag: TagId) -> ObjectKey {
        let key = world
            .insert_object(GridObject::new(0, "node", GridLocation::new(r, c)))
            .expect("insert");
        world.add_tag(key, tag, &EffectCtx::on_self(key));
        key
    }

    #[test]
    fn tag_query_filters_and_truncates() {
        let (mut world, compile) = setup();
        for c in 0..4 {
            tagged_object(&mut world, 0, c, 5);
        }
        let query = Query::compile(
            &QueryConfig::Tag {
                tag: 5,
                filters: vec![],
                max_items: 2,
                order_by: QueryOrderBy::None,
            },
            &compile,
        )
        .expect("compile");
        assert_eq!(query.evaluate(&mut world).len(), 2);
    }

    #[test]
    fn closure_with_empty_edge_filters_returns_seeds_only() {
        let (mut world, compile) = setup();
        let seed = tagged_object(&mut world, 2, 2, 1);
        tagged_object(&mut world, 2, 3, 2); // adjacent, different tag

        let query = Query::compile(
            &QueryConfig::Closure {
                source: Box::new(QueryConfig::Tag {
                    tag: 1,
                    filters: vec![],
                    max_items: 0,
                    order_by: QueryOrderBy::None,
                }),
                radius: 0,
                edge_filters: vec![],
                result_filters: vec![],
                max_items: 0,
                order_by: QueryOrderBy::None,
            },
            &compile,
        )
        .expect("compile");
        assert_eq!(query.evaluate(&mut world), vec![seed]);
    }

    #[test]
    fn closure_expands_through_edge_filtered_neighbors() {
        let (mut world, compile) = setup();
        // Chain of tag-7 objects with one gap.
        let a = tagged_object(&mut world, 1, 1, 7);
        let b = tagged_object(&mut world, 1, 2, 7);
        let c = tagged_object(&mut world, 1, 3, 7);
        let _far = tagged_object(&mut world, 5, 5, 7);
        // Seed tag on the first object only.
        world.add_tag(a, 1, &EffectCtx::on_self(a));

        let query = Query::compile(
            &QueryConfig::Closure {
                source: Box::new(QueryConfig::Tag {
                    tag: 1,
                    filters: vec![],
                    max_items: 0,
                    order_by: QueryOrderBy::None,
                }),
                radius: 0,
                edge_filters: vec![FilterConfig::Tag {
                    entity: crate::handler::EntityRef::Target,
                    tag: 7,
                }],
                result_filters: vec![],
                max_items: 0,
                order_by: QueryOrderBy::None,
            },
            &compile,
        )
        .expect("compile");
        let members = query.evaluate(&mut world);
        assert_eq!(members, vec![a, b, c]);
    }

    #[test]
    fn recompute_is_idempotent_on_an_unchanged_world() {
        let (mut world, compile) = setup();
        let a = tagged_object(&mut world, 1, 1, 7);
        let b = tagged_object(&mut world, 1, 2, 7);
        world.query_tags = vec![QueryTagDef::compile(
            &QueryTagConfig {
                tag: 9,
                query: QueryConfig::Tag {
                    tag: 7,
                    filters: vec![],
                    max_items: 0,
                    order_by: QueryOrderBy::None,
                },
            },
            &compile,
        )
        .expect("compile")];

        compute_all(&mut world);
        assert!(world.objects[a].tags.contains(9));
        assert!(world.objects[b].tags.contains(9));
        assert_eq!(world.tag_index.count(9), 2.0);

        recompute(&mut world, 9);
        recompute(&mut world, 9);
        assert_eq!(world.tag_index.count(9), 2.0);
        assert!(world.objects[a].tags.contains(9));
    }
}
