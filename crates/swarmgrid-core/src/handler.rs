//! Handlers: an ordered filter chain followed by an ordered mutation chain.

use crate::compile::{CompileCtx, CompileError};
use crate::filter::{Filter, FilterConfig};
use crate::inventory::Delta;
use crate::mutation::{Mutation, MutationConfig};
use crate::object::ObjectKey;
use crate::types::ResourceId;
use crate::world::WorldCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Which entity of the context a filter or mutation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EntityRef {
    /// The object performing the action (or the AOE source).
    Actor,
    /// The object being affected.
    #[default]
    Target,
    /// The actor's collective.
    ActorCollective,
    /// The target's collective.
    TargetCollective,
}

/// Entities involved in one handler execution.
///
/// Bindings vary by call site: `on_use` binds actor = acting agent and
/// target = used object; AOE binds actor = source and target = affected
/// object; events and query recomputation bind actor = target = the object
/// being affected.
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectCtx {
    pub actor: Option<ObjectKey>,
    pub target: Option<ObjectKey>,
    /// Suppress tag lifecycle handlers while membership is in flux.
    pub skip_tag_triggers: bool,
}

impl EffectCtx {
    /// Context with both roles bound to the same object.
    #[must_use]
    pub fn on_self(key: ObjectKey) -> Self {
        Self {
            actor: Some(key),
            target: Some(key),
            skip_tag_triggers: false,
        }
    }

    /// Context with distinct actor and target.
    #[must_use]
    pub fn acting(actor: ObjectKey, target: ObjectKey) -> Self {
        Self {
            actor: Some(actor),
            target: Some(target),
            skip_tag_triggers: false,
        }
    }
}

/// Accumulator for target resource deltas deferred to the end of fixed AOE
/// application, so clamping happens on the net change rather than on each
/// intermediate value. Application order is first-seen resource order.
#[derive(Debug, Default)]
pub struct DeferredDeltas {
    order: Vec<ResourceId>,
    deltas: HashMap<ResourceId, Delta>,
}

impl DeferredDeltas {
    /// Fold `delta` for `resource` into the accumulator.
    pub fn accumulate(&mut self, resource: ResourceId, delta: Delta) {
        if let Some(slot) = self.deltas.get_mut(&resource) {
            *slot += delta;
        } else {
            self.order.push(resource);
            self.deltas.insert(resource, delta);
        }
    }

    /// Drain accumulated `(resource, net delta)` pairs in first-seen order.
    pub fn drain(&mut self) -> impl Iterator<Item = (ResourceId, Delta)> + '_ {
        let deltas = std::mem::take(&mut self.deltas);
        self.order
            .drain(..)
            .filter_map(move |resource| deltas.get(&resource).map(|delta| (resource, *delta)))
    }

    /// Whether anything was accumulated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Serialized form of a handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerConfig {
    pub name: String,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    #[serde(default)]
    pub mutations: Vec<MutationConfig>,
}

impl HandlerConfig {
    /// Convenience constructor for a named handler.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filters: Vec::new(),
            mutations: Vec::new(),
        }
    }
}

/// Dispatch mode for [`MultiHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerMode {
    /// Stop at the first handler that applied (action `on_use` dispatch).
    FirstMatch,
    /// Apply every handler whose filters pass (AOE effect bundles).
    All,
}

/// An ordered filter chain followed by an ordered mutation chain.
#[derive(Debug, Clone)]
pub struct Handler {
    name: String,
    filters: Vec<Filter>,
    mutations: Vec<Mutation>,
}

fn debug_handlers_enabled() -> bool {
    static FLAG: OnceLock<bool> = OnceLock::new();
    *FLAG.get_or_init(|| std::env::var("DEBUG_HANDLERS").is_ok_and(|v| v == "1"))
}

fn entity_label(world: &WorldCore, key: Option<ObjectKey>) -> String {
    match key.and_then(|k| world.objects.get(k)) {
        Some(obj) => format!("{}:{}({:?})", obj.type_name, obj.name, key.unwrap_or_default()),
        None => "none".to_owned(),
    }
}

impl Handler {
    /// Compile a handler config.
    pub fn compile(config: &HandlerConfig, setup: &CompileCtx) -> Result<Self, CompileError> {
        if config.name.is_empty() {
            return Err(CompileError::UnnamedHandler);
        }
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
        Ok(Self {
            name: config.name.clone(),
            filters,
            mutations,
        })
    }

    /// Compile a list of handler configs into an immutable chain.
    pub fn compile_chain(
        configs: &[HandlerConfig],
        setup: &CompileCtx,
    ) -> Result<std::sync::Arc<[Handler]>, CompileError> {
        let handlers = configs
            .iter()
            .map(|c| Handler::compile(c, setup))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(std::sync::Arc::from(handlers))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether every filter passes for `ctx`.
    pub fn check_filters(&self, world: &mut WorldCore, ctx: &EffectCtx) -> bool {
        self.filters.iter().all(|f| f.passes(world, ctx))
    }

    /// Run the handler: returns `true` iff every filter passed and every
    /// mutation ran. Mutations do not fail; they may be no-ops.
    pub fn try_apply(
        &self,
        world: &mut WorldCore,
        ctx: &EffectCtx,
        mut deferred: Option<&mut DeferredDeltas>,
    ) -> bool {
        let passed = self.check_filters(world, ctx);
        if passed {
            for mutation in &self.mutations {
                mutation.apply(world, ctx, deferred.as_deref_mut());
            }
        }
        if debug_handlers_enabled() {
            tracing::debug!(
                "[DEBUG_HANDLERS] {}({} -> {}) = {}",
                if self.name.is_empty() {
                    "<unnamed>"
                } else {
                    self.name.as_str()
                },
                entity_label(world, ctx.actor),
                entity_label(world, ctx.target),
                if passed { "success" } else { "fail" }
            );
        }
        passed
    }
}

/// Composes an ordered list of handlers under a [`HandlerMode`].
#[derive(Debug, Clone)]
pub struct MultiHandler {
    handlers: std::sync::Arc<[Handler]>,
    mode: HandlerMode,
}

impl MultiHandler {
    #[must_use]
    pub fn new(handlers: std::sync::Arc<[Handler]>, mode: HandlerMode) -> Self {
        Self { handlers, mode }
    }

    /// Apply the composed handlers; returns whether any applied.
    pub fn try_apply(
        &self,
        world: &mut WorldCore,
        ctx: &EffectCtx,
        mut deferred: Option<&mut DeferredDeltas>,
    ) -> bool {
        let mut any = false;
        for handler in self.handlers.iter() {
            if handler.try_apply(world, ctx, deferred.as_deref_mut()) {
                any = true;
                if self.mode == HandlerMode::FirstMatch {
                    return true;
                }
            }
        }
        any
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deferred_deltas_sum_and_keep_first_seen_order() {
        let mut deferred = DeferredDeltas::default();
        deferred.accumulate(3, 5);
        deferred.accumulate(1, -2);
        deferred.accumulate(3, -3);
        let drained: Vec<_> = deferred.drain().collect();
        assert_eq!(drained, vec![(3, 2), (1, -2)]);
        assert!(deferred.is_empty());
    }

    #[test]
    fn unnamed_handler_is_rejected() {
        let setup = CompileCtx::default();
        let err = Handler::compile(&HandlerConfig::default(), &setup);
        assert_eq!(err.unwrap_err(), CompileError::UnnamedHandler);
    }
}
