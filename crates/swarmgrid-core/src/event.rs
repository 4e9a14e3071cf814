//! Timestep-scheduled events.

use crate::compile::{CompileCtx, CompileError};
use crate::filter::{Filter, FilterConfig};
use crate::handler::EffectCtx;
use crate::mutation::{Mutation, MutationConfig};
use crate::query::{Query, QueryConfig};
use crate::world::WorldCore;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Serialized form of one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    pub name: String,
    /// Query selecting candidate targets.
    pub target_query: QueryConfig,
    /// Timesteps at which this event fires.
    pub timesteps: Vec<u32>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    #[serde(default)]
    pub mutations: Vec<MutationConfig>,
    /// Maximum targets to apply to (0 = unlimited). Excess candidates are
    /// sampled by shuffling with the engine RNG.
    #[serde(default)]
    pub max_targets: usize,
    /// Event fired instead when no candidate produced a successful
    /// application.
    #[serde(default)]
    pub fallback: Option<String>,
}

/// A compiled event: target query plus a filter and mutation chain.
#[derive(Debug, Clone)]
pub struct Event {
    name: String,
    query: Arc<Query>,
    filters: Vec<Filter>,
    mutations: Vec<Mutation>,
    max_targets: usize,
    fallback: Option<usize>,
}

impl Event {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run this event once: select targets, apply mutations to those passing
    /// the filters (actor = target = candidate), and return how many targets
    /// were affected.
    fn execute(&self, world: &mut WorldCore) -> usize {
        let mut candidates = self.query.evaluate(world);
        if self.max_targets > 0 && candidates.len() > self.max_targets {
            candidates.shuffle(&mut world.rng);
        }

        let mut applied = 0;
        for candidate in candidates {
            if self.max_targets > 0 && applied >= self.max_targets {
                break;
            }
            let ctx = EffectCtx::on_self(candidate);
            if !self.filters.iter().all(|f| f.passes(world, &ctx)) {
                continue;
            }
            for mutation in &self.mutations {
                mutation.apply(world, &ctx, None);
            }
            applied += 1;
        }
        applied
    }
}

/// Maps timesteps to the events due at them.
///
/// The schedule is sorted by timestep with a monotonic cursor, so each entry
/// fires at most once per episode; entries sharing a timestep execute in
/// catalog order.
#[derive(Debug, Clone, Default)]
pub struct EventScheduler {
    events: Vec<Event>,
    schedule: Vec<(u32, usize)>,
    next: usize,
}

impl EventScheduler {
    /// Compile the event catalog and build the schedule.
    pub fn compile(configs: &[EventConfig], setup: &CompileCtx) -> Result<Self, CompileError> {
        let mut events = Vec::with_capacity(configs.len());
        for config in configs {
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
            events.push(Event {
                name: config.name.clone(),
                query: Arc::new(Query::compile(&config.target_query, setup)?),
                filters,
                mutations,
                max_targets: config.max_targets,
                fallback: None,
            });
        }

        // Resolve fallback names to indices after all events exist.
        for (index, config) in configs.iter().enumerate() {
            if let Some(fallback) = &config.fallback {
                let target = events.iter().position(|e| e.name == *fallback).ok_or_else(
                    || CompileError::UnknownFallback(config.name.clone(), fallback.clone()),
                )?;
                events[index].fallback = Some(target);
            }
        }

        let mut schedule: Vec<(u32, usize)> = Vec::new();
        for (index, config) in configs.iter().enumerate() {
            for timestep in &config.timesteps {
                schedule.push((*timestep, index));
            }
        }
        // Stable sort keeps catalog order within one timestep.
        schedule.sort_by_key(|(timestep, _)| *timestep);

        Ok(Self {
            events,
            schedule,
            next: 0,
        })
    }

    /// Fire every event scheduled at or before `timestep`. Events whose
    /// candidate set yields no successful application fall back along their
    /// fallback chain. Returns the number of events that affected at least
    /// one target.
    pub fn process_timestep(&mut self, world: &mut WorldCore, timestep: u32) -> usize {
        let mut fired = 0;
        while self.next < self.schedule.len() && self.schedule[self.next].0 <= timestep {
            let index = self.schedule[self.next].1;
            self.next += 1;
            if self.run_with_fallback(world, index) > 0 {
                fired += 1;
            }
        }
        fired
    }

    fn run_with_fallback(&self, world: &mut WorldCore, index: usize) -> usize {
        let mut visited = vec![false; self.events.len()];
        let mut current = index;
        loop {
            if visited[current] {
                return 0;
            }
            visited[current] = true;
            let applied = self.events[current].execute(world);
            if applied > 0 {
                return applied;
            }
            match self.events[current].fallback {
                Some(next) => current = next,
                None => return 0,
            }
        }
    }
}
