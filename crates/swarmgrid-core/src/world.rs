//! World state shared by the effect algebra: arena, grid, indices, RNG.

use crate::collective::Collective;
use crate::grid::{Grid, GridError};
use crate::handler::{EffectCtx, EntityRef};
use crate::inventory::{self, Delta};
use crate::object::{GridObject, ObjectKey};
use crate::query::QueryTagDef;
use crate::stats::StatsTracker;
use crate::tag_index::TagIndex;
use crate::types::{CollectiveId, GridCoord, GridLocation, ResourceId, TagId};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;

/// An entity that owns an inventory: a grid object or a collective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Object(ObjectKey),
    Collective(CollectiveId),
}

/// Mutable simulation state below the engine: the object arena, the cell
/// grid, the tag index, collectives, game-level stats, and the episode RNG.
///
/// Everything the filter/mutation/query algebra touches lives here, so a
/// single `&mut WorldCore` is the capability handlers run against.
#[derive(Debug)]
pub struct WorldCore {
    pub grid: Grid,
    pub objects: slotmap::SlotMap<ObjectKey, GridObject>,
    pub tag_index: TagIndex,
    pub collectives: Vec<Collective>,
    pub stats: StatsTracker,
    pub rng: SmallRng,
    pub resource_names: Arc<Vec<String>>,
    pub query_tags: Vec<QueryTagDef>,
}

impl WorldCore {
    /// Create an empty world.
    #[must_use]
    pub fn new(
        height: GridCoord,
        width: GridCoord,
        seed: u64,
        resource_names: Arc<Vec<String>>,
    ) -> Self {
        Self {
            grid: Grid::new(height, width),
            objects: slotmap::SlotMap::with_key(),
            tag_index: TagIndex::new(),
            collectives: Vec::new(),
            stats: StatsTracker::new(Arc::clone(&resource_names)),
            rng: SmallRng::seed_from_u64(seed),
            resource_names,
            query_tags: Vec::new(),
        }
    }

    /// Insert `object` into the arena and, when `in_grid`, onto its cell.
    /// Registers its tags and collective membership.
    pub fn insert_object(&mut self, object: GridObject) -> Result<ObjectKey, GridError> {
        let location = object.location;
        let in_grid = object.in_grid;
        let collective = object.collective;
        let key = self.objects.insert(object);
        if in_grid {
            if let Err(err) = self.grid.place(key, location) {
                self.objects.remove(key);
                return Err(err);
            }
        }
        let object = &self.objects[key];
        self.tag_index.register_object(key, object);
        if let Some(cid) = collective {
            if let Some(coll) = self.collectives.get_mut(cid as usize) {
                coll.add_member(key);
            }
        }
        Ok(key)
    }

    /// Clear the object's cell; the object stays in the arena, off-grid.
    pub fn remove_from_grid(&mut self, key: ObjectKey) {
        let Some(object) = self.objects.get_mut(key) else {
            return;
        };
        if !object.in_grid {
            return;
        }
        object.in_grid = false;
        let location = object.location;
        self.grid.clear(location);
    }

    /// Move `key` to `to`, keeping the grid and the object's location in sync.
    pub fn move_object(&mut self, key: ObjectKey, to: GridLocation) -> Result<(), GridError> {
        let from = match self.objects.get(key) {
            Some(object) if object.in_grid => object.location,
            _ => return Err(GridError::OutOfBounds(to)),
        };
        self.grid.relocate(from, to)?;
        self.objects[key].location = to;
        Ok(())
    }

    /// The collective of `key`, if any.
    #[must_use]
    pub fn collective_of(&self, key: ObjectKey) -> Option<CollectiveId> {
        self.objects.get(key).and_then(|o| o.collective)
    }

    /// Re-align `key` to `collective` (or clear alignment), keeping member
    /// lists in sync.
    pub fn set_collective(&mut self, key: ObjectKey, collective: Option<CollectiveId>) {
        let Some(object) = self.objects.get_mut(key) else {
            return;
        };
        let previous = object.collective;
        if previous == collective {
            return;
        }
        object.collective = collective;
        if let Some(prev) = previous {
            if let Some(coll) = self.collectives.get_mut(prev as usize) {
                coll.remove_member(key);
            }
        }
        if let Some(next) = collective {
            if let Some(coll) = self.collectives.get_mut(next as usize) {
                coll.add_member(key);
            }
        }
    }

    /// Resolve an [`EntityRef`] to a grid object. Collective refs resolve to
    /// `None`; use [`WorldCore::resolve_owner`] for inventory access.
    #[must_use]
    pub fn resolve_entity(&self, ctx: &EffectCtx, entity: EntityRef) -> Option<ObjectKey> {
        match entity {
            EntityRef::Actor => ctx.actor,
            EntityRef::Target => ctx.target,
            EntityRef::ActorCollective | EntityRef::TargetCollective => None,
        }
    }

    /// Resolve an [`EntityRef`] to an inventory owner.
    #[must_use]
    pub fn resolve_owner(&self, ctx: &EffectCtx, entity: EntityRef) -> Option<Owner> {
        match entity {
            EntityRef::Actor => ctx.actor.map(Owner::Object),
            EntityRef::Target => ctx.target.map(Owner::Object),
            EntityRef::ActorCollective => ctx
                .actor
                .and_then(|k| self.collective_of(k))
                .map(Owner::Collective),
            EntityRef::TargetCollective => ctx
                .target
                .and_then(|k| self.collective_of(k))
                .map(Owner::Collective),
        }
    }

    /// Current inventory amount for an owner.
    #[must_use]
    pub fn inventory_amount(&self, owner: Owner, resource: ResourceId) -> u16 {
        match owner {
            Owner::Object(key) => self
                .objects
                .get(key)
                .map_or(0, |o| o.inventory.amount(resource)),
            Owner::Collective(cid) => self
                .collectives
                .get(cid as usize)
                .map_or(0, |c| c.inventory.amount(resource)),
        }
    }

    fn raw_update(&mut self, owner: Owner, resource: ResourceId, delta: Delta) -> Delta {
        match owner {
            Owner::Object(key) => {
                let Some(object) = self.objects.get_mut(key) else {
                    return 0;
                };
                let config = Arc::clone(&object.inventory_config);
                object.inventory.update(&config, resource, delta)
            }
            Owner::Collective(cid) => {
                let Some(collective) = self.collectives.get_mut(cid as usize) else {
                    return 0;
                };
                let config = Arc::clone(&collective.inventory_config);
                collective.inventory.update(&config, resource, delta)
            }
        }
    }

    /// Record `<resource>.gained` / `.lost` / `.amount` on the owner's stats
    /// tracker after a change of `applied` units.
    fn note_inventory_change(&mut self, owner: Owner, resource: ResourceId, applied: Delta) {
        if applied == 0 {
            return;
        }
        let name = self
            .resource_names
            .get(resource as usize)
            .cloned()
            .unwrap_or_default();
        match owner {
            Owner::Object(key) => {
                let amount = self.inventory_amount(owner, resource);
                let Some(agent) = self.objects.get_mut(key).and_then(|o| o.agent.as_mut()) else {
                    return;
                };
                if applied > 0 {
                    agent.stats.add(&format!("{name}.gained"), applied as f32);
                } else {
                    agent.stats.add(&format!("{name}.lost"), -applied as f32);
                }
                agent.stats.set(&format!("{name}.amount"), f32::from(amount));
            }
            Owner::Collective(cid) => {
                let amount = self.inventory_amount(owner, resource);
                let Some(collective) = self.collectives.get_mut(cid as usize) else {
                    return;
                };
                if applied > 0 {
                    collective
                        .stats
                        .add(&format!("{name}.gained"), applied as f32);
                } else {
                    collective
                        .stats
                        .add(&format!("{name}.lost"), -applied as f32);
                }
                collective
                    .stats
                    .set(&format!("{name}.amount"), f32::from(amount));
            }
        }
    }

    /// Apply a clamped inventory delta with stats bookkeeping; returns the
    /// delta actually applied.
    pub fn update_inventory(&mut self, owner: Owner, resource: ResourceId, delta: Delta) -> Delta {
        let applied = self.raw_update(owner, resource, delta);
        self.note_inventory_change(owner, resource, applied);
        applied
    }

    /// Move up to `amount` units between owners, bounded by the source's
    /// holdings and the destination's capacity. Returns the amount moved.
    pub fn transfer(
        &mut self,
        src: Owner,
        dst: Owner,
        resource: ResourceId,
        amount: Delta,
    ) -> Delta {
        if src == dst || amount <= 0 {
            return 0;
        }
        let moved = match (src, dst) {
            (Owner::Object(a), Owner::Object(b)) => {
                let Some([src_obj, dst_obj]) = self.objects.get_disjoint_mut([a, b]) else {
                    return 0;
                };
                let src_cfg = Arc::clone(&src_obj.inventory_config);
                let dst_cfg = Arc::clone(&dst_obj.inventory_config);
                inventory::transfer(
                    &mut src_obj.inventory,
                    &src_cfg,
                    &mut dst_obj.inventory,
                    &dst_cfg,
                    resource,
                    amount,
                )
            }
            (Owner::Object(a), Owner::Collective(c)) => {
                let (Some(src_obj), Some(dst_coll)) =
                    (self.objects.get_mut(a), self.collectives.get_mut(c as usize))
                else {
                    return 0;
                };
                let src_cfg = Arc::clone(&src_obj.inventory_config);
                let dst_cfg = Arc::clone(&dst_coll.inventory_config);
                inventory::transfer(
                    &mut src_obj.inventory,
                    &src_cfg,
                    &mut dst_coll.inventory,
                    &dst_cfg,
                    resource,
                    amount,
                )
            }
            (Owner::Collective(c), Owner::Object(b)) => {
                let (Some(src_coll), Some(dst_obj)) =
                    (self.collectives.get_mut(c as usize), self.objects.get_mut(b))
                else {
                    return 0;
                };
                let src_cfg = Arc::clone(&src_coll.inventory_config);
                let dst_cfg = Arc::clone(&dst_obj.inventory_config);
                inventory::transfer(
                    &mut src_coll.inventory,
                    &src_cfg,
                    &mut dst_obj.inventory,
                    &dst_cfg,
                    resource,
                    amount,
                )
            }
            (Owner::Collective(a), Owner::Collective(b)) => {
                if a as usize >= self.collectives.len() || b as usize >= self.collectives.len() {
                    return 0;
                }
                let (low, high) = if a < b { (a, b) } else { (b, a) };
                let (head, tail) = self.collectives.split_at_mut(high as usize);
                let (first, second) = (&mut head[low as usize], &mut tail[0]);
                let (src_coll, dst_coll) = if a < b {
                    (first, second)
                } else {
                    (second, first)
                };
                let src_cfg = Arc::clone(&src_coll.inventory_config);
                let dst_cfg = Arc::clone(&dst_coll.inventory_config);
                inventory::transfer(
                    &mut src_coll.inventory,
                    &src_cfg,
                    &mut dst_coll.inventory,
                    &dst_cfg,
                    resource,
                    amount,
                )
            }
        };
        if moved > 0 {
            self.note_inventory_change(src, resource, -moved);
            self.note_inventory_change(dst, resource, moved);
        }
        moved
    }

    /// Add `tag` to `key`, updating the index and firing `on_tag_add`
    /// handlers unless the context suppresses them. Idempotent.
    pub fn add_tag(&mut self, key: ObjectKey, tag: TagId, ctx: &EffectCtx) {
        let Some(object) = self.objects.get_mut(key) else {
            return;
        };
        if !object.tags.insert(tag) {
            return;
        }
        self.tag_index.on_tag_added(key, tag);
        if !ctx.skip_tag_triggers {
            self.fire_tag_added_handlers(key, tag);
        }
    }

    /// Remove `tag` from `key`, updating the index and firing
    /// `on_tag_remove` handlers unless the context suppresses them.
    pub fn remove_tag(&mut self, key: ObjectKey, tag: TagId, ctx: &EffectCtx) {
        let Some(object) = self.objects.get_mut(key) else {
            return;
        };
        if !object.tags.remove(tag) {
            return;
        }
        self.tag_index.on_tag_removed(key, tag);
        if !ctx.skip_tag_triggers {
            self.fire_tag_removed_handlers(key, tag);
        }
    }

    /// Fire the `on_tag_add` lifecycle chain for `tag` on `key`.
    pub fn fire_tag_added_handlers(&mut self, key: ObjectKey, tag: TagId) {
        let chain = self
            .objects
            .get(key)
            .and_then(|o| o.on_tag_add.get(&tag).cloned());
        if let Some(chain) = chain {
            let ctx = EffectCtx::on_self(key);
            for handler in chain.iter() {
                handler.try_apply(self, &ctx, None);
            }
        }
    }

    /// Fire the `on_tag_remove` lifecycle chain for `tag` on `key`.
    pub fn fire_tag_removed_handlers(&mut self, key: ObjectKey, tag: TagId) {
        let chain = self
            .objects
            .get(key)
            .and_then(|o| o.on_tag_remove.get(&tag).cloned());
        if let Some(chain) = chain {
            let ctx = EffectCtx::on_self(key);
            for handler in chain.iter() {
                handler.try_apply(self, &ctx, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GridLocation;

    fn world() -> WorldCore {
        WorldCore::new(4, 4, 7, Arc::new(vec!["ore".into(), "heart".into()]))
    }

    #[test]
    fn insert_rejects_double_occupancy() {
        let mut world = world();
        let loc = GridLocation::new(1, 1);
        world
            .insert_object(GridObject::new(0, "wall", loc))
            .expect("first insert");
        let err = world.insert_object(GridObject::new(0, "wall", loc));
        assert!(err.is_err());
        // The failed insert left no orphan in the arena.
        assert_eq!(world.objects.len(), 1);
    }

    #[test]
    fn move_object_keeps_location_in_sync() {
        let mut world = world();
        let key = world
            .insert_object(GridObject::new(0, "agent", GridLocation::new(0, 0)))
            .expect("insert");
        world
            .move_object(key, GridLocation::new(2, 3))
            .expect("move");
        assert_eq!(world.objects[key].location, GridLocation::new(2, 3));
        assert_eq!(world.grid.object_at(GridLocation::new(2, 3)), Some(key));
        assert_eq!(world.grid.object_at(GridLocation::new(0, 0)), None);
    }

    #[test]
    fn tag_round_trip_restores_index_state() {
        let mut world = world();
        let key = world
            .insert_object(GridObject::new(0, "mine", GridLocation::new(0, 0)))
            .expect("insert");
        let ctx = EffectCtx::on_self(key);

        world.add_tag(key, 9, &ctx);
        world.add_tag(key, 9, &ctx); // repeated adds are no-ops
        assert!(world.objects[key].tags.contains(9));
        assert_eq!(world.tag_index.count(9), 1.0);

        world.remove_tag(key, 9, &ctx);
        assert!(!world.objects[key].tags.contains(9));
        assert_eq!(world.tag_index.count(9), 0.0);
        assert!(world.tag_index.objects_with_tag(9).is_empty());
    }

    #[test]
    fn transfer_between_objects_moves_and_records() {
        let mut world = world();
        let giver = world
            .insert_object(GridObject::new(0, "mine", GridLocation::new(0, 0)))
            .expect("giver");
        let mut taker_obj = GridObject::new(1, "agent", GridLocation::new(0, 1));
        taker_obj.agent = Some(crate::object::AgentState::new(
            0,
            0,
            GridLocation::new(0, 1),
            StatsTracker::new(Arc::clone(&world.resource_names)),
        ));
        let taker = world.insert_object(taker_obj).expect("taker");

        world.update_inventory(Owner::Object(giver), 0, 3);
        let moved = world.transfer(Owner::Object(giver), Owner::Object(taker), 0, 2);
        assert_eq!(moved, 2);
        assert_eq!(world.inventory_amount(Owner::Object(giver), 0), 1);
        assert_eq!(world.inventory_amount(Owner::Object(taker), 0), 2);
        let agent = world.objects[taker].agent.as_ref().expect("agent");
        assert_eq!(agent.stats.get("ore.gained"), 2.0);
        assert_eq!(agent.stats.get("ore.amount"), 2.0);
    }
}
