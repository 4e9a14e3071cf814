//! Area-of-effect tracking: static cell registration, mobile sources,
//! presence deltas, and per-tick application with strict ordering.

use crate::compile::{CompileCtx, CompileError};
use crate::filter::{Filter, FilterConfig};
use crate::handler::{DeferredDeltas, EffectCtx};
use crate::mutation::{Mutation, MutationConfig};
use crate::object::ObjectKey;
use crate::types::{GridCoord, GridLocation, ResourceId};
use crate::world::{Owner, WorldCore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Resource change applied exactly once on entering (+) or leaving (-) an
/// AOE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceDelta {
    pub resource: ResourceId,
    pub delta: i32,
}

/// Configuration of one AOE source attached to a grid object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AoeConfig {
    /// Euclidean radius of the effect (inclusive, compared squared).
    #[serde(default)]
    pub radius: u16,
    /// Static sources pre-register their covered cells; mobile sources are
    /// re-evaluated against every agent each tick.
    #[serde(default = "yes")]
    pub is_static: bool,
    /// Whether the source object is affected by its own AOE.
    #[serde(default)]
    pub effect_self: bool,
    #[serde(default)]
    pub presence_deltas: Vec<PresenceDelta>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    #[serde(default)]
    pub mutations: Vec<MutationConfig>,
}

const fn yes() -> bool {
    true
}

/// Compiled filter and mutation chains of one source, shared so they can be
/// invoked while the world is being mutated.
#[derive(Debug)]
struct AoeProgram {
    filters: Vec<Filter>,
    mutations: Vec<Mutation>,
}

type SourceId = usize;

#[derive(Debug, Clone)]
struct AoeSource {
    owner: ObjectKey,
    radius: u16,
    effect_self: bool,
    is_static: bool,
    presence_deltas: Vec<PresenceDelta>,
    program: Arc<AoeProgram>,
    /// Observation-only sources: no mutations, no presence deltas, positive
    /// radius. They participate in territory arbitration and get the
    /// boundary-trimmed disc mask.
    territory: bool,
    removed: bool,
}

impl AoeSource {
    fn inert(&self) -> bool {
        self.program.mutations.is_empty() && self.presence_deltas.is_empty()
    }
}

/// Scale factor for the integer territory influence score.
const INFLUENCE_SCALE: u64 = 1024;

fn floor_sqrt(value: u64) -> u64 {
    if value == 0 {
        return 0;
    }
    let mut root = (value as f64).sqrt() as u64;
    // Float sqrt can be off by one near perfect squares; settle exactly.
    while root.saturating_mul(root) > value {
        root -= 1;
    }
    while (root + 1).saturating_mul(root + 1) <= value {
        root += 1;
    }
    root
}

/// Influence of a territory source at squared distance `dist_sq`:
/// `radius * SCALE - floor(sqrt(dist_sq * SCALE^2))`, floored at zero.
fn territory_influence_score(radius: u16, dist_sq: i64) -> i64 {
    debug_assert!(radius > 0 && dist_sq >= 0);
    let scaled = (dist_sq as u64) * INFLUENCE_SCALE * INFLUENCE_SCALE;
    let distance = floor_sqrt(scaled) as i64;
    let score = i64::from(radius) * INFLUENCE_SCALE as i64 - distance;
    score.max(0)
}

/// Which side controls a cell for an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerritoryControl {
    None,
    Friendly,
    Enemy,
}

impl TerritoryControl {
    /// Observation token value (0 none, 1 friendly, 2 enemy).
    #[must_use]
    pub const fn token_value(self) -> u8 {
        match self {
            TerritoryControl::None => 0,
            TerritoryControl::Friendly => 1,
            TerritoryControl::Enemy => 2,
        }
    }
}

/// Registry of AOE sources with a precomputed cell index for static sources
/// and a presence set per source.
#[derive(Debug, Default)]
pub struct AoeTracker {
    height: GridCoord,
    width: GridCoord,
    sources: Vec<AoeSource>,
    /// Static source ids covering each cell, in registration order.
    cell_effects: Vec<Vec<SourceId>>,
    /// Static sources per owning object.
    fixed_by_owner: HashMap<ObjectKey, Vec<SourceId>>,
    /// Mobile source ids in registration order.
    mobile: Vec<SourceId>,
    /// Targets currently inside each source.
    inside: Vec<Vec<ObjectKey>>,
    /// Reverse lookup: fixed sources each target is currently inside.
    target_fixed_inside: HashMap<ObjectKey, Vec<SourceId>>,
}

impl AoeTracker {
    /// Create a tracker for a `height x width` grid.
    #[must_use]
    pub fn new(height: GridCoord, width: GridCoord) -> Self {
        Self {
            height,
            width,
            sources: Vec::new(),
            cell_effects: vec![Vec::new(); usize::from(height) * usize::from(width)],
            fixed_by_owner: HashMap::new(),
            mobile: Vec::new(),
            inside: Vec::new(),
            target_fixed_inside: HashMap::new(),
        }
    }

    #[inline]
    fn cell(&self, loc: GridLocation) -> usize {
        usize::from(loc.r) * usize::from(self.width) + usize::from(loc.c)
    }

    /// Compile and register one AOE config for `owner` at `origin`.
    pub fn register_source(
        &mut self,
        owner: ObjectKey,
        origin: GridLocation,
        config: &AoeConfig,
        setup: &CompileCtx,
    ) -> Result<(), CompileError> {
        let filters = config
            .filters
            .iter()
            .map(|f| Filter::compile(f, setup))
            .collect::<Result<Vec<_>, _>>()?;
        let mutations = config
            .mutations
            .iter()
            .map(|m| Mutation::compile(m, setup))
            .collect::<Result<Vec<_>, _>>()?;
        for delta in &config.presence_deltas {
            setup.check_resource(delta.resource)?;
        }
        let territory = config.mutations.is_empty()
            && config.presence_deltas.is_empty()
            && config.radius > 0;
        let source = AoeSource {
            owner,
            radius: config.radius,
            effect_self: config.effect_self,
            is_static: config.is_static,
            presence_deltas: config.presence_deltas.clone(),
            program: Arc::new(AoeProgram { filters, mutations }),
            territory,
            removed: false,
        };
        let id = self.sources.len();
        self.sources.push(source);
        self.inside.push(Vec::new());

        if config.is_static {
            self.fixed_by_owner.entry(owner).or_default().push(id);
            self.register_cells(id, origin, config.radius, territory);
        } else {
            self.mobile.push(id);
        }
        Ok(())
    }

    /// Append `id` to every covered cell within the L2 disc around `origin`.
    ///
    /// Territory circles exclude the exact cardinal boundary points so the
    /// mask shape stays a smooth disc; radii 0 and 1 keep full coverage,
    /// where trimming would collapse the footprint.
    fn register_cells(&mut self, id: SourceId, origin: GridLocation, radius: u16, territory: bool) {
        let range = i32::from(radius);
        let range_sq = i64::from(range) * i64::from(range);
        for dr in -range..=range {
            let r = i32::from(origin.r) + dr;
            if r < 0 || r >= i32::from(self.height) {
                continue;
            }
            for dc in -range..=range {
                let c = i32::from(origin.c) + dc;
                if c < 0 || c >= i32::from(self.width) {
                    continue;
                }
                let dist_sq = i64::from(dr) * i64::from(dr) + i64::from(dc) * i64::from(dc);
                if dist_sq > range_sq {
                    continue;
                }
                if territory && range >= 2 && dist_sq == range_sq && (dr == 0 || dc == 0) {
                    continue;
                }
                let loc = GridLocation::new(r as GridCoord, c as GridCoord);
                let slot = self.cell(loc);
                self.cell_effects[slot].push(id);
            }
        }
    }

    /// Remove every source emitted by `owner`, applying exit presence deltas
    /// to targets currently inside.
    pub fn unregister_owner(&mut self, world: &mut WorldCore, owner: ObjectKey) {
        if let Some(ids) = self.fixed_by_owner.remove(&owner) {
            let origin = world.objects.get(owner).map(|o| o.location);
            for id in &ids {
                self.sources[*id].removed = true;
            }
            if let Some(origin) = origin {
                let max_range = ids
                    .iter()
                    .map(|id| i32::from(self.sources[*id].radius))
                    .max()
                    .unwrap_or(0);
                for dr in -max_range..=max_range {
                    let r = i32::from(origin.r) + dr;
                    if r < 0 || r >= i32::from(self.height) {
                        continue;
                    }
                    for dc in -max_range..=max_range {
                        let c = i32::from(origin.c) + dc;
                        if c < 0 || c >= i32::from(self.width) {
                            continue;
                        }
                        let slot = self.cell(GridLocation::new(r as GridCoord, c as GridCoord));
                        self.cell_effects[slot].retain(|id| !ids.contains(id));
                    }
                }
            }
            for id in ids {
                let targets = std::mem::take(&mut self.inside[id]);
                for target in targets {
                    self.apply_presence_deltas(world, id, target, -1);
                    if let Some(list) = self.target_fixed_inside.get_mut(&target) {
                        list.retain(|s| *s != id);
                    }
                }
            }
        }

        let mobile_ids: Vec<SourceId> = self
            .mobile
            .iter()
            .copied()
            .filter(|id| self.sources[*id].owner == owner)
            .collect();
        let sources = &self.sources;
        self.mobile.retain(|id| sources[*id].owner != owner);
        for id in mobile_ids {
            self.sources[id].removed = true;
            let targets = std::mem::take(&mut self.inside[id]);
            for target in targets {
                self.apply_presence_deltas(world, id, target, -1);
            }
        }
    }

    fn apply_presence_deltas(
        &self,
        world: &mut WorldCore,
        id: SourceId,
        target: ObjectKey,
        multiplier: i32,
    ) {
        let deltas = self.sources[id].presence_deltas.clone();
        for delta in &deltas {
            world.update_inventory(Owner::Object(target), delta.resource, delta.delta * multiplier);
        }
    }

    fn passes_filters(&self, world: &mut WorldCore, id: SourceId, target: ObjectKey) -> bool {
        let source = &self.sources[id];
        let program = Arc::clone(&source.program);
        let ctx = EffectCtx::acting(source.owner, target);
        program.filters.iter().all(|f| f.passes(world, &ctx))
    }

    /// Apply the fixed AOE sources at the target's current cell.
    ///
    /// Sources are processed enemy first, then unaffiliated, then friendly,
    /// so a heal clamped at max HP cannot mask incoming damage. Resource
    /// deltas on the target are accumulated and applied once as a net change.
    pub fn apply_fixed(&mut self, world: &mut WorldCore, target: ObjectKey) {
        let Some(location) = world
            .objects
            .get(target)
            .filter(|o| o.in_grid)
            .map(|o| o.location)
        else {
            return;
        };
        let target_collective = world.collective_of(target);

        let cell_sources: Vec<SourceId> = self.cell_effects[self.cell(location)].clone();

        // Partition by side relative to the target's collective.
        let mut enemy: Vec<SourceId> = Vec::new();
        let mut friendly: Vec<SourceId> = Vec::new();
        let mut other: Vec<SourceId> = Vec::new();
        for id in &cell_sources {
            let source_collective = world.collective_of(self.sources[*id].owner);
            match (target_collective, source_collective) {
                (Some(t), Some(s)) if t == s => friendly.push(*id),
                (Some(_), Some(_)) => enemy.push(*id),
                _ => other.push(*id),
            }
        }

        // Exit sources the target left since last tick.
        let mut prev_inside = self.target_fixed_inside.remove(&target).unwrap_or_default();
        let mut still_inside: Vec<SourceId> = Vec::with_capacity(prev_inside.len());
        for id in prev_inside.drain(..) {
            if cell_sources.contains(&id) {
                still_inside.push(id);
            } else {
                self.inside[id].retain(|t| *t != target);
                self.apply_presence_deltas(world, id, target, -1);
            }
        }
        let mut prev_inside = still_inside;

        let mut deferred = DeferredDeltas::default();
        for id in enemy.iter().chain(other.iter()).chain(friendly.iter()) {
            self.process_fixed_source(world, *id, target, &mut prev_inside, &mut deferred);
        }

        // Apply net resource deltas once, in first-seen order, so clamping
        // happens on the net rather than on intermediate values.
        for (resource, delta) in deferred.drain() {
            if delta != 0 {
                world.update_inventory(Owner::Object(target), resource, delta);
            }
        }

        if !prev_inside.is_empty() {
            self.target_fixed_inside.insert(target, prev_inside);
        }
    }

    fn process_fixed_source(
        &mut self,
        world: &mut WorldCore,
        id: SourceId,
        target: ObjectKey,
        prev_inside: &mut Vec<SourceId>,
        deferred: &mut DeferredDeltas,
    ) {
        let source = &self.sources[id];
        if source.removed || source.inert() {
            return;
        }
        let skip_self = !source.effect_self && source.owner == target;
        let owner = source.owner;
        let has_mutations = !source.program.mutations.is_empty();
        let program = Arc::clone(&source.program);

        let now_passes = !skip_self && self.passes_filters(world, id, target);
        let was_inside = prev_inside.contains(&id);

        if now_passes && !was_inside {
            self.inside[id].push(target);
            self.apply_presence_deltas(world, id, target, 1);
            prev_inside.push(id);
        } else if !now_passes && was_inside {
            self.inside[id].retain(|t| *t != target);
            self.apply_presence_deltas(world, id, target, -1);
            prev_inside.retain(|s| *s != id);
        }

        if now_passes && has_mutations {
            let ctx = EffectCtx::acting(owner, target);
            for mutation in &program.mutations {
                mutation.apply(world, &ctx, Some(&mut *deferred));
            }
        }
    }

    /// Apply every mobile source against every agent: range test, enter/exit
    /// presence deltas, then the mutation chain on targets passing filters.
    pub fn apply_mobile(&mut self, world: &mut WorldCore, agents: &[ObjectKey]) {
        let mobile = self.mobile.clone();
        for id in mobile {
            if self.sources[id].removed {
                continue;
            }
            let owner = self.sources[id].owner;
            let Some(source_loc) = world
                .objects
                .get(owner)
                .filter(|o| o.in_grid)
                .map(|o| o.location)
            else {
                continue;
            };
            let radius = i64::from(self.sources[id].radius);
            let effect_self = self.sources[id].effect_self;
            let has_mutations = !self.sources[id].program.mutations.is_empty();
            let program = Arc::clone(&self.sources[id].program);

            for agent in agents {
                let agent = *agent;
                if !effect_self && owner == agent {
                    continue;
                }
                let was_in = self.inside[id].contains(&agent);
                let in_range = world.objects.get(agent).is_some_and(|o| {
                    o.in_grid && o.location.distance_sq(&source_loc) <= radius * radius
                });
                if !in_range {
                    if was_in {
                        self.inside[id].retain(|t| *t != agent);
                        self.apply_presence_deltas(world, id, agent, -1);
                    }
                    continue;
                }

                let now_passes = self.passes_filters(world, id, agent);
                if now_passes {
                    if !was_in {
                        self.inside[id].push(agent);
                        self.apply_presence_deltas(world, id, agent, 1);
                    }
                    if has_mutations {
                        let ctx = EffectCtx::acting(owner, agent);
                        for mutation in &program.mutations {
                            mutation.apply(world, &ctx, None);
                        }
                    }
                } else if was_in {
                    self.inside[id].retain(|t| *t != agent);
                    self.apply_presence_deltas(world, id, agent, -1);
                }
            }
        }
    }

    /// Which side would control `loc` for `observer`, for the territory
    /// observation token. Only territory sources participate; each side sums
    /// integer influence scores and the greater side wins.
    pub fn fixed_observability_at(
        &self,
        world: &mut WorldCore,
        loc: GridLocation,
        observer: ObjectKey,
    ) -> TerritoryControl {
        if loc.r >= self.height || loc.c >= self.width {
            return TerritoryControl::None;
        }
        let Some(observer_collective) = world.collective_of(observer) else {
            return TerritoryControl::None;
        };
        let cell_sources = self.cell_effects[self.cell(loc)].clone();
        if cell_sources.is_empty() {
            return TerritoryControl::None;
        }

        let mut friendly_score: i64 = 0;
        let mut enemy_score: i64 = 0;
        for id in cell_sources {
            let source = &self.sources[id];
            if source.removed || !source.territory {
                continue;
            }
            let Some(source_collective) = world.collective_of(source.owner) else {
                continue;
            };
            let Some(source_loc) = world.objects.get(source.owner).map(|o| o.location) else {
                continue;
            };
            if !self.passes_filters(world, id, observer) {
                continue;
            }
            let score = territory_influence_score(source.radius, source_loc.distance_sq(&loc));
            if source_collective == observer_collective {
                friendly_score += score;
            } else {
                enemy_score += score;
            }
        }

        if friendly_score > enemy_score {
            TerritoryControl::Friendly
        } else if enemy_score > friendly_score {
            TerritoryControl::Enemy
        } else {
            TerritoryControl::None
        }
    }

    /// Number of fixed sources registered at `loc`.
    #[must_use]
    pub fn fixed_effect_count_at(&self, loc: GridLocation) -> usize {
        if loc.r >= self.height || loc.c >= self.width {
            return 0;
        }
        self.cell_effects[self.cell(loc)]
            .iter()
            .filter(|id| !self.sources[**id].removed)
            .count()
    }

    /// Whether `target` is currently inside any source owned by `owner`.
    #[must_use]
    pub fn is_inside_any_of(&self, owner: ObjectKey, target: ObjectKey) -> bool {
        self.sources
            .iter()
            .enumerate()
            .any(|(id, s)| s.owner == owner && !s.removed && self.inside[id].contains(&target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EntityRef;
    use crate::object::GridObject;

    fn setup() -> (WorldCore, AoeTracker, CompileCtx) {
        let world = WorldCore::new(
            9,
            9,
            3,
            Arc::new(vec!["health".into(), "shield".into()]),
        );
        let tracker = AoeTracker::new(9, 9);
        let compile = CompileCtx {
            collective_ids: Default::default(),
            num_resources: 2,
            num_vibes: 1,
        };
        (world, tracker, compile)
    }

    fn object_at(world: &mut WorldCore, r: u16, c: u16) -> ObjectKey {
        world
            .insert_object(GridObject::new(0, "node", GridLocation::new(r, c)))
            .expect("insert")
    }

    fn heal_config(radius: u16, delta: i32) -> AoeConfig {
        AoeConfig {
            radius,
            is_static: true,
            effect_self: false,
            presence_deltas: vec![],
            filters: vec![],
            mutations: vec![MutationConfig::ResourceDelta {
                entity: EntityRef::Target,
                resource: 0,
                delta,
            }],
        }
    }

    #[test]
    fn static_registration_covers_the_l2_disc() {
        let (mut world, mut tracker, compile) = setup();
        let source = object_at(&mut world, 4, 4);
        tracker
            .register_source(source, GridLocation::new(4, 4), &heal_config(2, 1), &compile)
            .expect("register");

        assert_eq!(tracker.fixed_effect_count_at(GridLocation::new(4, 4)), 1);
        assert_eq!(tracker.fixed_effect_count_at(GridLocation::new(4, 6)), 1);
        assert_eq!(tracker.fixed_effect_count_at(GridLocation::new(2, 4)), 1);
        // (3, 6) is at distance sqrt(5) > 2.
        assert_eq!(tracker.fixed_effect_count_at(GridLocation::new(3, 6)), 0);
    }

    #[test]
    fn territory_disc_trims_cardinal_boundary_cells() {
        let (mut world, mut tracker, compile) = setup();
        let source = object_at(&mut world, 4, 4);
        let config = AoeConfig {
            radius: 2,
            is_static: true,
            ..AoeConfig::default()
        };
        tracker
            .register_source(source, GridLocation::new(4, 4), &config, &compile)
            .expect("register");

        // Cardinal boundary points at exactly the radius are excluded.
        assert_eq!(tracker.fixed_effect_count_at(GridLocation::new(4, 6)), 0);
        assert_eq!(tracker.fixed_effect_count_at(GridLocation::new(2, 4)), 0);
        // Interior cells keep coverage.
        assert_eq!(tracker.fixed_effect_count_at(GridLocation::new(4, 5)), 1);
        assert_eq!(tracker.fixed_effect_count_at(GridLocation::new(3, 3)), 1);
    }

    #[test]
    fn radius_zero_applies_only_at_the_source_cell() {
        let (mut world, mut tracker, compile) = setup();
        let source = object_at(&mut world, 1, 1);
        tracker
            .register_source(source, GridLocation::new(1, 1), &heal_config(0, 2), &compile)
            .expect("register");
        assert_eq!(tracker.fixed_effect_count_at(GridLocation::new(1, 1)), 1);
        assert_eq!(tracker.fixed_effect_count_at(GridLocation::new(1, 2)), 0);
    }

    fn collective(world: &WorldCore, id: u16, name: &str) -> crate::collective::Collective {
        crate::collective::Collective::new(
            id,
            &crate::collective::CollectiveConfig {
                name: name.into(),
                ..Default::default()
            },
            Arc::clone(&world.resource_names),
        )
    }

    #[test]
    fn opposing_sources_apply_the_net_delta_once() {
        let (mut world, mut tracker, compile) = setup();
        world.collectives = vec![collective(&world, 0, "blue"), collective(&world, 1, "red")];

        let mut healer_obj = GridObject::new(0, "shrine", GridLocation::new(2, 2));
        healer_obj.collective = Some(0);
        let healer = world.insert_object(healer_obj).expect("healer");
        let mut damager_obj = GridObject::new(0, "spikes", GridLocation::new(2, 3));
        damager_obj.collective = Some(1);
        let damager = world.insert_object(damager_obj).expect("damager");

        // Agent with health capped at 10, standing inside both discs.
        let mut agent_obj = GridObject::new(1, "agent", GridLocation::new(2, 4));
        agent_obj.collective = Some(0);
        let mut inv_config = crate::inventory::InventoryConfig::unbounded();
        inv_config.limits.insert(0, 10);
        agent_obj.inventory_config = Arc::new(inv_config);
        agent_obj.agent = Some(crate::object::AgentState::new(
            0,
            0,
            GridLocation::new(2, 4),
            crate::stats::StatsTracker::new(Arc::clone(&world.resource_names)),
        ));
        let agent = world.insert_object(agent_obj).expect("agent");
        world.update_inventory(Owner::Object(agent), 0, 5);

        tracker
            .register_source(healer, GridLocation::new(2, 2), &heal_config(2, 5), &compile)
            .expect("heal");
        tracker
            .register_source(
                damager,
                GridLocation::new(2, 3),
                &heal_config(2, -3),
                &compile,
            )
            .expect("damage");

        tracker.apply_fixed(&mut world, agent);

        // The +5 heal and -3 damage fold into one +2 net update, so the heal
        // never clamps on its own and `gained` records 2, not 5.
        assert_eq!(world.inventory_amount(Owner::Object(agent), 0), 7);
        let stats = &world.objects[agent].agent.as_ref().expect("agent").stats;
        assert_eq!(stats.get("health.gained"), 2.0);
        assert_eq!(stats.get("health.lost"), 0.0);

        // Near the cap the net still clamps once: 9 + 2 -> 10.
        world.update_inventory(Owner::Object(agent), 0, 2);
        assert_eq!(world.inventory_amount(Owner::Object(agent), 0), 9);
        tracker.apply_fixed(&mut world, agent);
        assert_eq!(world.inventory_amount(Owner::Object(agent), 0), 10);
    }

    #[test]
    fn presence_deltas_apply_on_enter_and_exit() {
        let (mut world, mut tracker, compile) = setup();
        let source = object_at(&mut world, 0, 0);
        let target = object_at(&mut world, 0, 1);
        let config = AoeConfig {
            radius: 1,
            is_static: true,
            effect_self: false,
            presence_deltas: vec![PresenceDelta {
                resource: 1,
                delta: 2,
            }],
            filters: vec![],
            mutations: vec![MutationConfig::Stats {
                stat: "aura.ticks".into(),
                delta: 1.0,
                target: crate::mutation::StatsTarget::Game,
                entity: crate::mutation::StatsEntity::Target,
            }],
        };
        tracker
            .register_source(source, GridLocation::new(0, 0), &config, &compile)
            .expect("register");

        tracker.apply_fixed(&mut world, target);
        assert_eq!(world.inventory_amount(Owner::Object(target), 1), 2);
        assert!(tracker.is_inside_any_of(source, target));

        // Move the target out of range; the next application exits it.
        world
            .move_object(target, GridLocation::new(4, 4))
            .expect("move");
        tracker.apply_fixed(&mut world, target);
        assert_eq!(world.inventory_amount(Owner::Object(target), 1), 0);
        assert!(!tracker.is_inside_any_of(source, target));
    }

    #[test]
    fn unregister_applies_exit_deltas_to_current_occupants() {
        let (mut world, mut tracker, compile) = setup();
        let source = object_at(&mut world, 0, 0);
        let target = object_at(&mut world, 0, 1);
        let config = AoeConfig {
            radius: 1,
            is_static: true,
            effect_self: false,
            presence_deltas: vec![PresenceDelta {
                resource: 1,
                delta: 3,
            }],
            filters: vec![],
            mutations: vec![],
        };
        // A presence-delta-only source is not territory (deltas present).
        tracker
            .register_source(source, GridLocation::new(0, 0), &config, &compile)
            .expect("register");
        tracker.apply_fixed(&mut world, target);
        assert_eq!(world.inventory_amount(Owner::Object(target), 1), 3);

        tracker.unregister_owner(&mut world, source);
        assert_eq!(world.inventory_amount(Owner::Object(target), 1), 0);
        assert_eq!(tracker.fixed_effect_count_at(GridLocation::new(0, 0)), 0);
    }
}
