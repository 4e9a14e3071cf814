//! Action dispatch: the catalog of built-in action behaviors.

use crate::config::{ActionConfig, ActionKind};
use std::sync::Arc;
use swarmgrid_core::{
    CompileCtx, CompileError, EffectCtx, GridCoord, GridLocation, Handler, HandlerMode,
    MultiHandler, ObjectKey, WorldCore,
};

/// Fixed 8-neighborhood scan order for `UseNearby`: cardinals first, then
/// diagonals, row-major within each group.
const NEIGHBOR_SCAN: [(i32, i32); 8] = [
    (-1, 0),
    (1, 0),
    (0, -1),
    (0, 1),
    (-1, -1),
    (-1, 1),
    (1, -1),
    (1, 1),
];

/// One compiled action-table entry.
#[derive(Debug, Clone)]
pub struct ActionRuntime {
    name: String,
    priority: u8,
    kind: ActionKind,
    handlers: Arc<[Handler]>,
}

impl ActionRuntime {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Execute this action for `agent`. Returns whether it succeeded.
    pub fn execute(&self, world: &mut WorldCore, agent: ObjectKey) -> bool {
        match &self.kind {
            ActionKind::Noop => true,
            ActionKind::Move { dr, dc } => {
                let Some(from) = world
                    .objects
                    .get(agent)
                    .filter(|o| o.in_grid)
                    .map(|o| o.location)
                else {
                    return false;
                };
                let r = i32::from(from.r) + dr;
                let c = i32::from(from.c) + dc;
                if r < 0 || c < 0 {
                    return false;
                }
                let to = GridLocation::new(r as GridCoord, c as GridCoord);
                if !world.grid.is_empty_cell(to) {
                    return false;
                }
                world.move_object(agent, to).is_ok()
            }
            ActionKind::UseNearby => {
                let Some(center) = world
                    .objects
                    .get(agent)
                    .filter(|o| o.in_grid)
                    .map(|o| o.location)
                else {
                    return false;
                };
                for (dr, dc) in NEIGHBOR_SCAN {
                    let r = i32::from(center.r) + dr;
                    let c = i32::from(center.c) + dc;
                    if r < 0 || c < 0 {
                        continue;
                    }
                    let loc = GridLocation::new(r as GridCoord, c as GridCoord);
                    let Some(target) = world.grid.object_at(loc) else {
                        continue;
                    };
                    let ctx = EffectCtx::acting(agent, target);
                    let chain = if self.handlers.is_empty() {
                        world
                            .objects
                            .get(target)
                            .map(|o| Arc::clone(&o.on_use))
                            .unwrap_or_else(|| Arc::from([]))
                    } else {
                        Arc::clone(&self.handlers)
                    };
                    if chain.is_empty() {
                        continue;
                    }
                    let dispatch = MultiHandler::new(chain, HandlerMode::FirstMatch);
                    if dispatch.try_apply(world, &ctx, None) {
                        return true;
                    }
                }
                false
            }
            ActionKind::ChangeVibe { vibe } => {
                let Some(object) = world.objects.get_mut(agent) else {
                    return false;
                };
                object.vibe = *vibe;
                true
            }
        }
    }
}

/// The compiled action catalog.
#[derive(Debug, Clone, Default)]
pub struct ActionSet {
    actions: Vec<ActionRuntime>,
    max_priority: u8,
}

impl ActionSet {
    /// Compile the catalog.
    pub fn compile(configs: &[ActionConfig], setup: &CompileCtx) -> Result<Self, CompileError> {
        let mut actions = Vec::with_capacity(configs.len());
        let mut max_priority = 0;
        for config in configs {
            max_priority = max_priority.max(config.priority);
            actions.push(ActionRuntime {
                name: config.name.clone(),
                priority: config.priority,
                kind: config.kind.clone(),
                handlers: Handler::compile_chain(&config.handlers, setup)?,
            });
        }
        Ok(Self {
            actions,
            max_priority,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    #[must_use]
    pub fn max_priority(&self) -> u8 {
        self.max_priority
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ActionRuntime> {
        self.actions.get(index)
    }
}
