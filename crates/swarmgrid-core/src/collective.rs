//! Collectives: named groups with shared stats and inventory.

use crate::inventory::{Inventory, InventoryConfig};
use crate::object::ObjectKey;
use crate::stats::StatsTracker;
use crate::types::{CollectiveId, ResourceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Static configuration for one collective.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectiveConfig {
    pub name: String,
    #[serde(default)]
    pub inventory_config: InventoryConfig,
    #[serde(default)]
    pub initial_inventory: BTreeMap<ResourceId, u16>,
}

/// A named group of grid objects with shared stats and inventory.
///
/// Ids are assigned in sorted order of configured names so they are stable
/// across runs. Membership is mirrored from each member's `collective` field.
#[derive(Debug, Clone)]
pub struct Collective {
    pub id: CollectiveId,
    pub name: String,
    pub stats: StatsTracker,
    pub inventory: Inventory,
    pub inventory_config: Arc<InventoryConfig>,
    members: Vec<ObjectKey>,
}

impl Collective {
    /// Build a collective from its config.
    #[must_use]
    pub fn new(id: CollectiveId, config: &CollectiveConfig, resource_names: Arc<Vec<String>>) -> Self {
        let inventory_config = Arc::new(config.inventory_config.clone());
        let mut collective = Self {
            id,
            name: config.name.clone(),
            stats: StatsTracker::new(resource_names),
            inventory: Inventory::new(),
            inventory_config,
            members: Vec::new(),
        };
        for (resource, amount) in &config.initial_inventory {
            let config = Arc::clone(&collective.inventory_config);
            collective
                .inventory
                .update(&config, *resource, i32::from(*amount));
        }
        collective
    }

    /// Current members, in join order.
    #[must_use]
    pub fn members(&self) -> &[ObjectKey] {
        &self.members
    }

    /// Record `key` as a member. No-op if already present.
    pub fn add_member(&mut self, key: ObjectKey) {
        if !self.members.contains(&key) {
            self.members.push(key);
        }
    }

    /// Drop `key` from the member list.
    pub fn remove_member(&mut self, key: ObjectKey) {
        self.members.retain(|member| *member != key);
    }

    /// Per-tick housekeeping: refresh the member-count stat and accumulate
    /// how long objects have stayed aligned.
    pub fn update_held_stats(&mut self) {
        let count = self.members.len() as f32;
        self.stats.set("members", count);
        self.stats.add("held.ticks", count);
    }
}
