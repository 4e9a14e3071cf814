//! Bounded inventories with per-resource limits and limit-modifier resources.

use crate::types::ResourceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Quantity of one resource held in an inventory.
pub type Quantity = u16;

/// Signed inventory change.
pub type Delta = i32;

/// A modifier resource contribution: each held unit of the modifier shifts
/// the effective limit of `resource` by `per_unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitModifier {
    pub resource: ResourceId,
    pub per_unit: i32,
}

/// Static limits for one inventory.
///
/// Resources without an explicit limit are capped at `default_limit`.
/// Resources listed in `modifiers` are "modifier" resources: holding them
/// shifts the effective limits of other resources, so their own deltas must
/// never be folded into deferred net-delta accumulators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryConfig {
    pub limits: BTreeMap<ResourceId, Quantity>,
    pub modifiers: BTreeMap<ResourceId, Vec<LimitModifier>>,
    #[serde(default = "InventoryConfig::unlimited")]
    pub default_limit: Quantity,
}

impl InventoryConfig {
    const fn unlimited() -> Quantity {
        Quantity::MAX
    }

    /// A config with no limits and no modifiers.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            limits: BTreeMap::new(),
            modifiers: BTreeMap::new(),
            default_limit: Quantity::MAX,
        }
    }

    /// Whether `resource` adjusts other resources' limits.
    #[must_use]
    pub fn is_modifier(&self, resource: ResourceId) -> bool {
        self.modifiers.contains_key(&resource)
    }

    fn base_limit(&self, resource: ResourceId) -> Quantity {
        self.limits
            .get(&resource)
            .copied()
            .unwrap_or(self.default_limit)
    }
}

/// A mapping of resource id to non-negative quantity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    amounts: BTreeMap<ResourceId, Quantity>,
}

impl Inventory {
    /// Empty inventory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Quantity currently held of `resource`.
    #[must_use]
    pub fn amount(&self, resource: ResourceId) -> Quantity {
        self.amounts.get(&resource).copied().unwrap_or(0)
    }

    /// Whether nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.amounts.values().all(|q| *q == 0)
    }

    /// Iterate `(resource, quantity)` pairs in ascending resource order,
    /// skipping zero rows.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, Quantity)> + '_ {
        self.amounts
            .iter()
            .filter(|(_, q)| **q > 0)
            .map(|(r, q)| (*r, *q))
    }

    /// The effective limit of `resource` under `config`, including modifier
    /// contributions from currently held modifier resources.
    #[must_use]
    pub fn effective_limit(&self, config: &InventoryConfig, resource: ResourceId) -> Quantity {
        let mut limit = i64::from(config.base_limit(resource));
        for (modifier, entries) in &config.modifiers {
            let held = i64::from(self.amount(*modifier));
            if held == 0 {
                continue;
            }
            for entry in entries {
                if entry.resource == resource {
                    limit += held * i64::from(entry.per_unit);
                }
            }
        }
        limit.clamp(0, i64::from(Quantity::MAX)) as Quantity
    }

    /// Remaining capacity for `resource`.
    #[must_use]
    pub fn capacity(&self, config: &InventoryConfig, resource: ResourceId) -> Quantity {
        self.effective_limit(config, resource)
            .saturating_sub(self.amount(resource))
    }

    /// Apply `delta`, clamping the result to `[0, effective_limit]`.
    ///
    /// Returns the delta actually applied, which callers use for stats
    /// bookkeeping and transfer accounting.
    pub fn update(&mut self, config: &InventoryConfig, resource: ResourceId, delta: Delta) -> Delta {
        let current = i64::from(self.amount(resource));
        let limit = i64::from(self.effective_limit(config, resource));
        let next = (current + i64::from(delta)).clamp(0, limit);
        let applied = next - current;
        if next == 0 {
            self.amounts.remove(&resource);
        } else {
            self.amounts.insert(resource, next as Quantity);
        }
        applied as Delta
    }
}

/// Move up to `amount` units of `resource` from `src` to `dst`, bounded by
/// the source's holdings and the destination's remaining capacity. Returns
/// the number of units moved.
pub fn transfer(
    src: &mut Inventory,
    src_config: &InventoryConfig,
    dst: &mut Inventory,
    dst_config: &InventoryConfig,
    resource: ResourceId,
    amount: Delta,
) -> Delta {
    if amount <= 0 {
        return 0;
    }
    let available = Delta::from(src.amount(resource));
    let capacity = Delta::from(dst.capacity(dst_config, resource));
    let moved = amount.min(available).min(capacity);
    if moved > 0 {
        src.update(src_config, resource, -moved);
        dst.update(dst_config, resource, moved);
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capped(resource: ResourceId, limit: Quantity) -> InventoryConfig {
        let mut config = InventoryConfig::unbounded();
        config.limits.insert(resource, limit);
        config
    }

    #[test]
    fn update_clamps_against_limits() {
        let config = capped(0, 10);
        let mut inv = Inventory::new();
        assert_eq!(inv.update(&config, 0, 15), 10);
        assert_eq!(inv.amount(0), 10);
        assert_eq!(inv.update(&config, 0, -25), -10);
        assert_eq!(inv.amount(0), 0);
        assert!(inv.is_empty());
    }

    #[test]
    fn modifier_resource_raises_effective_limit() {
        // Resource 1 grants +5 capacity of resource 0 per unit held.
        let mut config = capped(0, 10);
        config.modifiers.insert(
            1,
            vec![LimitModifier {
                resource: 0,
                per_unit: 5,
            }],
        );
        let mut inv = Inventory::new();
        inv.update(&config, 1, 2);
        assert!(config.is_modifier(1));
        assert_eq!(inv.effective_limit(&config, 0), 20);
        assert_eq!(inv.update(&config, 0, 30), 20);
    }

    #[test]
    fn transfer_moves_min_of_amount_supply_and_capacity() {
        let src_config = InventoryConfig::unbounded();
        let dst_config = capped(0, 3);
        let mut src = Inventory::new();
        let mut dst = Inventory::new();
        src.update(&src_config, 0, 5);

        let moved = transfer(&mut src, &src_config, &mut dst, &dst_config, 0, 100);
        assert_eq!(moved, 3);
        assert_eq!(src.amount(0), 2);
        assert_eq!(dst.amount(0), 3);

        // Destination is full, nothing more moves.
        let moved = transfer(&mut src, &src_config, &mut dst, &dst_config, 0, 1);
        assert_eq!(moved, 0);
    }
}
