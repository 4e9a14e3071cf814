//! Reward helpers: typed game-value references resolved once at setup and
//! read per tick through dense stat slots.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use swarmgrid_core::{
    CollectiveId, CompileCtx, CompileError, GameValueConfig, GameValueScope, ObjectKey, Query,
    ResourceId, StatId, TagId, WorldCore,
};

/// One reward term: `numerator * weight / denominators`, optionally capped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardEntryConfig {
    pub numerator: GameValueConfig,
    #[serde(default)]
    pub denominators: Vec<GameValueConfig>,
    #[serde(default = "one")]
    pub weight: f32,
    #[serde(default)]
    pub max_value: Option<f32>,
    /// With `false` (the default) the entry contributes per-tick deltas of
    /// its value; with `true` it contributes the value itself every tick.
    #[serde(default)]
    pub accumulate: bool,
    /// Role gating: 255 applies to all roles, otherwise the entry's weight
    /// is scaled by the agent's soft weight for this role.
    #[serde(default = "all_roles")]
    pub role: u8,
}

fn one() -> f32 {
    1.0
}

const fn all_roles() -> u8 {
    255
}

/// Per-agent reward configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewardConfig {
    #[serde(default)]
    pub entries: Vec<RewardEntryConfig>,
}

/// Which tracker a resolved stat slot lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackerScope {
    Agent,
    Collective(CollectiveId),
    Game,
}

/// A game value resolved to something readable without string lookups.
#[derive(Debug, Clone)]
enum ResolvedValue {
    /// Dense slot in a stats tracker (fast path).
    Stat { scope: TrackerScope, id: StatId },
    /// Stable tag-count slot in the tag index.
    TagCount(TagId),
    /// Constant.
    Const(f32),
    /// Query evaluation summing a resource (slow path).
    QueryInventory {
        query: Arc<Query>,
        resource: ResourceId,
    },
}

/// A resolved value plus the per-step snapshot for `delta` semantics.
#[derive(Debug, Clone)]
struct ValueReader {
    value: ResolvedValue,
    delta: bool,
    prev_raw: f32,
}

impl ValueReader {
    fn read(&mut self, world: &mut WorldCore, agent: ObjectKey) -> f32 {
        let raw = match &self.value {
            ResolvedValue::Stat { scope, id } => match scope {
                TrackerScope::Agent => world
                    .objects
                    .get(agent)
                    .and_then(|o| o.agent.as_ref())
                    .map_or(0.0, |a| a.stats.value(*id)),
                TrackerScope::Collective(cid) => world
                    .collectives
                    .get(*cid as usize)
                    .map_or(0.0, |c| c.stats.value(*id)),
                TrackerScope::Game => world.stats.value(*id),
            },
            ResolvedValue::TagCount(tag) => world.tag_index.count(*tag),
            ResolvedValue::Const(value) => *value,
            ResolvedValue::QueryInventory { query, resource } => {
                let query = Arc::clone(query);
                let resource = *resource;
                let results = query.evaluate(world);
                results
                    .iter()
                    .map(|key| {
                        world
                            .objects
                            .get(*key)
                            .map_or(0.0, |o| f32::from(o.inventory.amount(resource)))
                    })
                    .sum()
            }
        };
        if self.delta {
            let step = raw - self.prev_raw;
            self.prev_raw = raw;
            step
        } else {
            raw
        }
    }
}

#[derive(Debug, Clone)]
struct ResolvedEntry {
    numerator: ValueReader,
    denominators: Vec<ValueReader>,
    weight: f32,
    max_value: Option<f32>,
    accumulate: bool,
    role: u8,
    prev_value: f32,
}

/// Per-agent reward evaluator. Entries are resolved once at engine init;
/// per tick the helper reads current values, applies weights and caps, and
/// returns the delta to add to the agent's reward slot.
#[derive(Debug, Clone, Default)]
pub struct RewardHelper {
    entries: Vec<ResolvedEntry>,
}

impl RewardHelper {
    /// Resolve every entry of `config` for the agent at `agent`.
    pub fn resolve(
        config: &RewardConfig,
        world: &mut WorldCore,
        agent: ObjectKey,
        setup: &CompileCtx,
    ) -> Result<Self, CompileError> {
        let collective = world.collective_of(agent);
        let mut entries = Vec::with_capacity(config.entries.len());
        for entry in &config.entries {
            let numerator = resolve_value(&entry.numerator, world, agent, collective, setup)?;
            let denominators = entry
                .denominators
                .iter()
                .map(|d| resolve_value(d, world, agent, collective, setup))
                .collect::<Result<Vec<_>, _>>()?;
            entries.push(ResolvedEntry {
                numerator,
                denominators,
                weight: entry.weight,
                max_value: entry.max_value,
                accumulate: entry.accumulate,
                role: entry.role,
                prev_value: 0.0,
            });
        }
        Ok(Self { entries })
    }

    /// Sum of the most recent per-entry values.
    #[must_use]
    pub fn current_reward(&self) -> f32 {
        self.entries.iter().map(|e| e.prev_value).sum()
    }

    /// Evaluate every entry and return the tick's total contribution.
    pub fn compute(&mut self, world: &mut WorldCore, agent: ObjectKey) -> f32 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let role_weights = world
            .objects
            .get(agent)
            .and_then(|o| o.agent.as_ref())
            .map_or([0u8; 4], |a| a.role_weights);

        let mut total = 0.0f32;
        for entry in &mut self.entries {
            let mut weight = entry.weight;
            if entry.role != 255 {
                let soft = role_weights
                    .get(entry.role as usize)
                    .copied()
                    .unwrap_or(0);
                weight *= f32::from(soft) / 255.0;
            }

            let mut value = entry.numerator.read(world, agent) * weight;
            for denominator in &mut entry.denominators {
                let d = denominator.read(world, agent);
                if d > 0.0 {
                    value /= d;
                }
            }
            if let Some(max_value) = entry.max_value {
                value = value.min(max_value);
            }

            if entry.accumulate {
                total += value;
            } else {
                total += value - entry.prev_value;
            }
            entry.prev_value = value;
        }
        total
    }

    /// Resources referenced by inventory-valued numerators, for goal tokens.
    pub fn goal_resources(config: &RewardConfig) -> Vec<ResourceId> {
        let mut resources = Vec::new();
        for entry in &config.entries {
            if let GameValueConfig::Inventory { resource, .. } = &entry.numerator {
                if !resources.contains(resource) {
                    resources.push(*resource);
                }
            }
        }
        resources
    }
}

fn resolve_value(
    config: &GameValueConfig,
    world: &mut WorldCore,
    agent: ObjectKey,
    collective: Option<CollectiveId>,
    setup: &CompileCtx,
) -> Result<ValueReader, CompileError> {
    let reader = |value, delta| ValueReader {
        value,
        delta,
        prev_raw: 0.0,
    };
    Ok(match config {
        GameValueConfig::Inventory { scope, resource } => {
            setup.check_resource(*resource)?;
            let name = world
                .resource_names
                .get(*resource as usize)
                .cloned()
                .unwrap_or_default();
            let stat_name = format!("{name}.amount");
            let (scope, id) = resolve_stat_slot(world, *scope, agent, collective, &stat_name);
            reader(ResolvedValue::Stat { scope, id }, false)
        }
        GameValueConfig::Stat {
            scope,
            stat_name,
            delta,
        } => {
            let (scope, id) = resolve_stat_slot(world, *scope, agent, collective, stat_name);
            reader(ResolvedValue::Stat { scope, id }, *delta)
        }
        GameValueConfig::TagCount { tag } => {
            reader(ResolvedValue::TagCount(setup.check_tag(*tag)?), false)
        }
        GameValueConfig::Const { value } => reader(ResolvedValue::Const(*value), false),
        GameValueConfig::QueryInventory { resource, query } => reader(
            ResolvedValue::QueryInventory {
                query: Arc::new(Query::compile(query, setup)?),
                resource: setup.check_resource(*resource)?,
            },
            false,
        ),
    })
}

/// Allocate (or find) the stat slot a scoped reference reads.
fn resolve_stat_slot(
    world: &mut WorldCore,
    scope: GameValueScope,
    agent: ObjectKey,
    collective: Option<CollectiveId>,
    stat_name: &str,
) -> (TrackerScope, StatId) {
    match scope {
        GameValueScope::Agent => {
            let id = world
                .objects
                .get_mut(agent)
                .and_then(|o| o.agent.as_mut())
                .map_or(StatId(0), |a| a.stats.id(stat_name));
            (TrackerScope::Agent, id)
        }
        GameValueScope::Collective => match collective {
            Some(cid) => {
                let id = world
                    .collectives
                    .get_mut(cid as usize)
                    .map_or(StatId(0), |c| c.stats.id(stat_name));
                (TrackerScope::Collective(cid), id)
            }
            // Unaligned agents read a zeroed game-stats slot.
            None => {
                let id = world.stats.id(stat_name);
                (TrackerScope::Game, id)
            }
        },
        GameValueScope::Game => {
            let id = world.stats.id(stat_name);
            (TrackerScope::Game, id)
        }
    }
}
