//! Stats tracking with a dual string-name / dense-id API.
//!
//! Cold paths address stats by name; hot paths resolve a [`StatId`] once at
//! setup and then read or write the dense float slot directly. Ids are
//! assigned on first use and never recycled within an episode.

use crate::types::ResourceId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Dense identifier of a stat slot within one [`StatsTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatId(pub u16);

/// String-name registry backed by a dense float vector.
#[derive(Debug, Clone, Default)]
pub struct StatsTracker {
    resource_names: Arc<Vec<String>>,
    ids: HashMap<String, StatId>,
    names: Vec<String>,
    values: Vec<f32>,
}

impl StatsTracker {
    /// Create a tracker that can render resource stat names.
    #[must_use]
    pub fn new(resource_names: Arc<Vec<String>>) -> Self {
        Self {
            resource_names,
            ids: HashMap::new(),
            names: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Resolve `name` to its id, allocating a zeroed slot on first use.
    pub fn id(&mut self, name: &str) -> StatId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = StatId(self.values.len() as u16);
        self.ids.insert(name.to_owned(), id);
        self.names.push(name.to_owned());
        self.values.push(0.0);
        id
    }

    /// Current value of a slot.
    #[must_use]
    pub fn value(&self, id: StatId) -> f32 {
        self.values.get(id.0 as usize).copied().unwrap_or(0.0)
    }

    /// Add `delta` to a slot.
    pub fn add_by_id(&mut self, id: StatId, delta: f32) {
        if let Some(slot) = self.values.get_mut(id.0 as usize) {
            *slot += delta;
        }
    }

    /// Overwrite a slot.
    pub fn set_by_id(&mut self, id: StatId, value: f32) {
        if let Some(slot) = self.values.get_mut(id.0 as usize) {
            *slot = value;
        }
    }

    /// Add `delta` to the named stat.
    pub fn add(&mut self, name: &str, delta: f32) {
        let id = self.id(name);
        self.add_by_id(id, delta);
    }

    /// Increment the named stat by one.
    pub fn incr(&mut self, name: &str) {
        self.add(name, 1.0);
    }

    /// Overwrite the named stat.
    pub fn set(&mut self, name: &str, value: f32) {
        let id = self.id(name);
        self.set_by_id(id, value);
    }

    /// Read the named stat without allocating a slot.
    #[must_use]
    pub fn get(&self, name: &str) -> f32 {
        self.ids.get(name).map_or(0.0, |id| self.value(*id))
    }

    /// Render the configured name of a resource (empty string if unknown).
    #[must_use]
    pub fn resource_name(&self, resource: ResourceId) -> &str {
        self.resource_names
            .get(resource as usize)
            .map_or("", String::as_str)
    }

    /// Iterate over `(name, value)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> + '_ {
        self.names
            .iter()
            .zip(self.values.iter())
            .map(|(name, value)| (name.as_str(), *value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> StatsTracker {
        StatsTracker::new(Arc::new(vec!["ore".into(), "heart".into()]))
    }

    #[test]
    fn ids_are_stable_and_never_recycled() {
        let mut stats = tracker();
        let a = stats.id("tokens_written");
        let b = stats.id("tokens_dropped");
        assert_ne!(a, b);
        assert_eq!(stats.id("tokens_written"), a);
        stats.add_by_id(a, 3.0);
        stats.add_by_id(a, 2.0);
        assert_eq!(stats.value(a), 5.0);
        assert_eq!(stats.get("tokens_written"), 5.0);
    }

    #[test]
    fn get_does_not_allocate_slots() {
        let mut stats = tracker();
        assert_eq!(stats.get("missing"), 0.0);
        assert_eq!(stats.iter().count(), 0);
        stats.incr("present");
        assert_eq!(stats.iter().count(), 1);
    }

    #[test]
    fn resource_names_resolve() {
        let stats = tracker();
        assert_eq!(stats.resource_name(1), "heart");
        assert_eq!(stats.resource_name(9), "");
    }
}
