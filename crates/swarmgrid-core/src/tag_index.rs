//! Reverse index from tag id to the objects carrying that tag.

use crate::object::{GridObject, ObjectKey};
use crate::types::{TagId, MAX_TAGS};
use std::collections::HashMap;

/// Per-tag object list plus a float member count.
///
/// The index mirrors each object's tag bitset and is updated exclusively
/// through [`TagIndex::on_tag_added`] / [`TagIndex::on_tag_removed`], which
/// the world calls from its tag mutators. Counts are stored as floats so
/// reward references can read them through a stable [`TagId`] slot. All
/// operations are amortized constant time: membership lists are dense
/// vectors with swap-removal driven by a position map.
#[derive(Debug, Clone)]
pub struct TagIndex {
    objects: Vec<Vec<ObjectKey>>,
    positions: Vec<HashMap<ObjectKey, usize>>,
    counts: Vec<f32>,
}

impl Default for TagIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl TagIndex {
    /// Create an empty index covering every representable tag.
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: vec![Vec::new(); MAX_TAGS],
            positions: vec![HashMap::new(); MAX_TAGS],
            counts: vec![0.0; MAX_TAGS],
        }
    }

    /// Record that `key` gained `tag`. No-op if already recorded.
    pub fn on_tag_added(&mut self, key: ObjectKey, tag: TagId) {
        let slot = tag as usize;
        if self.positions[slot].contains_key(&key) {
            return;
        }
        self.positions[slot].insert(key, self.objects[slot].len());
        self.objects[slot].push(key);
        self.counts[slot] += 1.0;
    }

    /// Record that `key` lost `tag`. No-op if not recorded.
    pub fn on_tag_removed(&mut self, key: ObjectKey, tag: TagId) {
        let slot = tag as usize;
        let Some(index) = self.positions[slot].remove(&key) else {
            return;
        };
        self.objects[slot].swap_remove(index);
        if let Some(moved) = self.objects[slot].get(index) {
            self.positions[slot].insert(*moved, index);
        }
        self.counts[slot] -= 1.0;
    }

    /// Register every tag currently set on `object`.
    pub fn register_object(&mut self, key: ObjectKey, object: &GridObject) {
        for tag in object.tags.iter() {
            self.on_tag_added(key, tag);
        }
    }

    /// Remove every tag association for `object`.
    pub fn unregister_object(&mut self, key: ObjectKey, object: &GridObject) {
        for tag in object.tags.iter() {
            self.on_tag_removed(key, tag);
        }
    }

    /// Objects carrying `tag`, in registration order (modulo swap-removal).
    #[must_use]
    pub fn objects_with_tag(&self, tag: TagId) -> &[ObjectKey] {
        &self.objects[tag as usize]
    }

    /// Number of objects carrying `tag`.
    #[must_use]
    pub fn count(&self, tag: TagId) -> f32 {
        self.counts[tag as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GridLocation;
    use slotmap::SlotMap;

    #[test]
    fn index_mirrors_membership_and_counts() {
        let mut arena: SlotMap<ObjectKey, GridObject> = SlotMap::with_key();
        let a = arena.insert(GridObject::new(0, "wall", GridLocation::new(0, 0)));
        let b = arena.insert(GridObject::new(0, "wall", GridLocation::new(0, 1)));

        let mut index = TagIndex::new();
        index.on_tag_added(a, 3);
        index.on_tag_added(b, 3);
        index.on_tag_added(a, 3); // idempotent
        assert_eq!(index.objects_with_tag(3), &[a, b]);
        assert_eq!(index.count(3), 2.0);

        index.on_tag_removed(a, 3);
        index.on_tag_removed(a, 3); // idempotent
        assert_eq!(index.objects_with_tag(3), &[b]);
        assert_eq!(index.count(3), 1.0);
    }

    #[test]
    fn register_object_covers_all_set_tags() {
        let mut arena: SlotMap<ObjectKey, GridObject> = SlotMap::with_key();
        let mut object = GridObject::new(1, "mine", GridLocation::new(2, 2));
        object.tags.insert(5);
        object.tags.insert(250);
        let key = arena.insert(object);

        let mut index = TagIndex::new();
        index.register_object(key, &arena[key]);
        assert_eq!(index.count(5), 1.0);
        assert_eq!(index.count(250), 1.0);

        index.unregister_object(key, &arena[key]);
        assert_eq!(index.count(5), 0.0);
        assert_eq!(index.count(250), 0.0);
    }
}
