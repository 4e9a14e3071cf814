//! The engine: construction from config + map, and the tick pipeline.

use crate::actions::ActionSet;
use crate::config::{ConfigError, EngineOptions, GameConfig, ObjectConfig};
use crate::obs::manhattan_offsets;
use crate::reward::RewardHelper;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use swarmgrid_core::{
    query, AgentState, AoeTracker, CompileCtx, EffectCtx, EventScheduler, GameValue, GridLocation,
    GridObject, Handler, ObjectKey, QueryTagDef, StatId, StatsTracker, WorldCore,
};
use thiserror::Error;

/// Errors surfaced by [`Engine::step`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("actions buffer holds {got} entries but the engine drives {expected} agents")]
    ActionShape { expected: usize, got: usize },
}

/// Per-phase timing of the most recent tick, in nanoseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepTiming {
    pub reset_ns: u64,
    pub events_ns: u64,
    pub actions_ns: u64,
    pub on_tick_ns: u64,
    pub aoe_ns: u64,
    pub collectives_ns: u64,
    pub observations_ns: u64,
    pub rewards_ns: u64,
    pub truncation_ns: u64,
    pub total_ns: u64,
}

/// Counters kept by the observation shadow-validation harness.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObsValidationStats {
    pub comparisons: u64,
    pub mismatches: u64,
}

/// The deterministic simulation engine.
///
/// Owns the world, the AOE tracker, the event scheduler, the action catalog,
/// per-agent reward helpers, and the per-tick output buffers.
pub struct Engine {
    pub(crate) world: WorldCore,
    pub(crate) aoe: AoeTracker,
    pub(crate) scheduler: Option<EventScheduler>,
    pub(crate) actions: ActionSet,

    pub(crate) agents: Vec<ObjectKey>,
    pub(crate) reward_helpers: Vec<RewardHelper>,
    pub(crate) prev_locations: Vec<GridLocation>,
    /// Precomputed goal tokens per agent: `(feature, value)` pairs.
    pub(crate) goal_tokens: Vec<Vec<(u8, u8)>>,
    /// Compiled agent-scope observation values: `(value, feature)` pairs.
    pub(crate) obs_values: Vec<(GameValue, u8)>,

    pub(crate) config: GameConfig,
    pub(crate) options: EngineOptions,
    pub(crate) current_step: u32,

    // Output buffers.
    pub(crate) observations: Vec<u8>,
    pub(crate) rewards: Vec<f32>,
    pub(crate) episode_rewards: Vec<f32>,
    pub(crate) terminals: Vec<bool>,
    pub(crate) truncations: Vec<bool>,
    pub(crate) action_success: Vec<bool>,

    // Observation plumbing.
    pub(crate) obs_offsets: Vec<(i32, i32)>,
    pub(crate) scratch_pairs: Vec<(u8, u8)>,
    pub(crate) global_scratch: Vec<(u8, u8)>,
    pub(crate) shadow_buf: Vec<u8>,
    pub(crate) obs_validation: ObsValidationStats,

    // Hot-path stat slots.
    pub(crate) stat_tokens_written: StatId,
    pub(crate) stat_tokens_dropped: StatId,
    pub(crate) stat_tokens_free_space: StatId,

    pub(crate) timing: StepTiming,
}

impl Engine {
    /// Build an engine from its immutable config, a rectangular map of cell
    /// strings, and an RNG seed.
    pub fn new(
        config: GameConfig,
        map: &[Vec<String>],
        seed: u64,
        options: EngineOptions,
    ) -> Result<Self, ConfigError> {
        let (height, width) = config.validate_map(map)?;

        let resource_names = Arc::new(config.resource_names.clone());
        let mut world = WorldCore::new(height, width, seed, Arc::clone(&resource_names));

        // Collectives get ids in sorted-name order so ids are stable.
        let mut collective_configs = config.collectives.clone();
        collective_configs.sort_by(|a, b| a.name.cmp(&b.name));
        let mut collective_ids = HashMap::new();
        for (id, collective_config) in collective_configs.iter().enumerate() {
            collective_ids.insert(collective_config.name.clone(), id as u16);
            world.collectives.push(swarmgrid_core::Collective::new(
                id as u16,
                collective_config,
                Arc::clone(&resource_names),
            ));
        }

        let setup = CompileCtx {
            collective_ids,
            num_resources: config.resource_names.len(),
            num_vibes: config.vibe_names.len().max(1),
        };

        let actions = ActionSet::compile(&config.actions, &setup)?;
        let mut aoe = AoeTracker::new(height, width);

        // Detect conflicting type-id assignments up front.
        let mut type_names: HashMap<u16, String> = HashMap::new();
        for object_config in config.objects.values() {
            if let Some(existing) = type_names.get(&object_config.type_id) {
                if *existing != object_config.type_name {
                    return Err(ConfigError::TypeIdConflict {
                        type_id: object_config.type_id,
                        existing: existing.clone(),
                        new: object_config.type_name.clone(),
                    });
                }
            } else {
                type_names.insert(object_config.type_id, object_config.type_name.clone());
            }
        }

        // Instantiate the map.
        let mut agents: Vec<ObjectKey> = Vec::new();
        let mut agent_rewards = Vec::new();
        for (r, row) in map.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                if matches!(cell.as_str(), "empty" | "." | " " | "") {
                    continue;
                }
                let Some(object_config) = config.objects.get(cell) else {
                    return Err(ConfigError::UnknownCell(cell.clone()));
                };
                let location = GridLocation::new(r as u16, c as u16);
                let object = build_object(
                    object_config,
                    location,
                    agents.len(),
                    &setup,
                    &resource_names,
                )?;
                let is_agent = object.agent.is_some();
                let key = world.insert_object(object)?;
                world.stats.incr(&format!("objects.{cell}"));

                for aoe_config in &object_config.aoe {
                    aoe.register_source(key, location, aoe_config, &setup)?;
                }

                if is_agent {
                    if agents.len() >= usize::from(u16::MAX) {
                        return Err(ConfigError::TooManyAgents(agents.len() + 1));
                    }
                    agents.push(key);
                    agent_rewards.push(
                        object_config
                            .agent
                            .as_ref()
                            .map(|a| a.reward.clone())
                            .unwrap_or_default(),
                    );
                }
            }
        }

        if agents.len() != config.num_agents {
            return Err(ConfigError::AgentCountMismatch {
                configured: config.num_agents,
                found: agents.len(),
            });
        }

        // Materialized query tags.
        world.query_tags = config
            .query_tags
            .iter()
            .map(|qt| QueryTagDef::compile(qt, &setup))
            .collect::<Result<Vec<_>, _>>()?;
        query::compute_all(&mut world);

        let scheduler = if config.events.is_empty() {
            None
        } else {
            Some(EventScheduler::compile(&config.events, &setup)?)
        };

        // Reward helpers and goal tokens.
        let mut reward_helpers = Vec::with_capacity(agents.len());
        let mut goal_tokens = Vec::with_capacity(agents.len());
        for (agent_key, reward_config) in agents.iter().zip(agent_rewards.iter()) {
            reward_helpers.push(RewardHelper::resolve(
                reward_config,
                &mut world,
                *agent_key,
                &setup,
            )?);
            let mut tokens = Vec::new();
            if config.global_obs.goal_obs {
                for resource in RewardHelper::goal_resources(reward_config) {
                    let feature = config.feature_ids.inventory_feature(resource);
                    if feature != 0 {
                        tokens.push((config.feature_ids.goal, feature));
                    }
                }
            }
            goal_tokens.push(tokens);
        }

        let obs_values = config
            .global_obs
            .obs
            .iter()
            .map(|obs| {
                GameValue::compile(&obs.value, &setup).map(|value| (value, obs.feature_id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let num_agents = agents.len();
        let num_tokens = config.num_observation_tokens;
        let prev_locations = agents
            .iter()
            .map(|key| world.objects[*key].location)
            .collect();

        let stat_tokens_written = world.stats.id("tokens_written");
        let stat_tokens_dropped = world.stats.id("tokens_dropped");
        let stat_tokens_free_space = world.stats.id("tokens_free_space");

        let obs_offsets = manhattan_offsets(config.obs_height, config.obs_width);

        let mut engine = Self {
            world,
            aoe,
            scheduler,
            actions,
            agents,
            reward_helpers,
            prev_locations,
            goal_tokens,
            obs_values,
            config,
            options,
            current_step: 0,
            observations: vec![0xFF; num_agents * num_tokens * 3],
            rewards: vec![0.0; num_agents],
            episode_rewards: vec![0.0; num_agents],
            terminals: vec![false; num_agents],
            truncations: vec![false; num_agents],
            action_success: vec![false; num_agents],
            obs_offsets,
            scratch_pairs: Vec::new(),
            global_scratch: Vec::new(),
            shadow_buf: Vec::new(),
            obs_validation: ObsValidationStats::default(),
            stat_tokens_written,
            stat_tokens_dropped,
            stat_tokens_free_space,
            timing: StepTiming::default(),
        };

        // Initial observations: every agent starts with a noop.
        let initial_actions = vec![0i32; num_agents];
        engine.compute_observations(&initial_actions);
        Ok(engine)
    }

    /// Advance the simulation one tick.
    pub fn step(&mut self, actions: &[i32]) -> Result<(), EngineError> {
        if actions.len() != self.agents.len() {
            return Err(EngineError::ActionShape {
                expected: self.agents.len(),
                got: actions.len(),
            });
        }
        let profiling = self.options.profiling;
        let step_start = Instant::now();
        let mut phase = Instant::now();
        let mut lap = |timing_slot: &mut u64| {
            if profiling {
                *timing_slot = phase.elapsed().as_nanos() as u64;
            }
            phase = Instant::now();
        };
        let mut timing = StepTiming::default();

        // Save previous locations for the moved flag.
        for (slot, key) in self.prev_locations.iter_mut().zip(self.agents.iter()) {
            *slot = self.world.objects[*key].location;
        }

        // Reset per-tick outputs.
        self.rewards.fill(0.0);
        self.observations.fill(0xFF);
        self.action_success.fill(false);
        lap(&mut timing.reset_ns);

        // Advance the clock and run due events.
        self.current_step += 1;
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.process_timestep(&mut self.world, self.current_step);
        }
        lap(&mut timing.events_ns);

        // Prioritized action dispatch over a fresh shuffle of agent indices.
        let mut agent_order: Vec<usize> = (0..self.agents.len()).collect();
        agent_order.shuffle(&mut self.world.rng);

        let mut executed: Vec<i32> = vec![0; self.agents.len()];
        let max_priority = self.actions.max_priority();
        for offset in 0..=max_priority {
            let current_priority = max_priority - offset;
            for agent_idx in &agent_order {
                let agent_idx = *agent_idx;
                let action_id = actions[agent_idx];
                if action_id < 0 || action_id as usize >= self.actions.len() {
                    // Record once, on the highest-priority pass.
                    if offset == 0 {
                        self.record_invalid_action(agent_idx, action_id);
                    }
                    continue;
                }
                let action_index = action_id as usize;
                let Some(action) = self.actions.get(action_index) else {
                    continue;
                };
                if action.priority() != current_priority {
                    continue;
                }
                let action = action.clone();
                let agent_key = self.agents[agent_idx];
                if self.agent_is_frozen(agent_key) {
                    self.action_success[agent_idx] = false;
                    continue;
                }
                let success = action.execute(&mut self.world, agent_key);
                self.record_action_outcome(agent_key, action.name(), success);
                self.action_success[agent_idx] = success;
                if success {
                    executed[agent_idx] = action_id;
                }
            }
        }
        lap(&mut timing.actions_ns);

        // Per-agent on-tick handler chains.
        for agent_key in self.agents.clone() {
            let chain = self
                .world
                .objects
                .get(agent_key)
                .and_then(|o| o.agent.as_ref())
                .map(|a| Arc::clone(&a.on_tick));
            if let Some(chain) = chain {
                let ctx = EffectCtx::on_self(agent_key);
                for handler in chain.iter() {
                    handler.try_apply(&mut self.world, &ctx, None);
                }
            }
        }
        lap(&mut timing.on_tick_ns);

        // Fixed AOEs per agent, then mobile AOEs over all agents.
        for agent_key in self.agents.clone() {
            self.aoe.apply_fixed(&mut self.world, agent_key);
        }
        let agents = self.agents.clone();
        self.aoe.apply_mobile(&mut self.world, &agents);
        lap(&mut timing.aoe_ns);

        // Collective housekeeping.
        for collective in &mut self.world.collectives {
            collective.update_held_stats();
        }
        lap(&mut timing.collectives_ns);

        // Observations.
        self.compute_observations(&executed);
        lap(&mut timing.observations_ns);

        // Rewards.
        let mut helpers = std::mem::take(&mut self.reward_helpers);
        for (agent_idx, helper) in helpers.iter_mut().enumerate() {
            let delta = helper.compute(&mut self.world, self.agents[agent_idx]);
            if delta != 0.0 {
                self.rewards[agent_idx] += delta;
            }
        }
        self.reward_helpers = helpers;
        for (episode, reward) in self.episode_rewards.iter_mut().zip(self.rewards.iter()) {
            *episode += reward;
        }
        lap(&mut timing.rewards_ns);

        // Truncation / termination.
        if self.config.max_steps > 0 && self.current_step >= self.config.max_steps {
            if self.config.episode_truncates {
                self.truncations.fill(true);
            } else {
                self.terminals.fill(true);
            }
        }
        lap(&mut timing.truncation_ns);

        if profiling {
            timing.total_ns = step_start.elapsed().as_nanos() as u64;
            self.timing = timing;
            tracing::debug!(
                step = self.current_step,
                total_ns = timing.total_ns,
                reset_ns = timing.reset_ns,
                events_ns = timing.events_ns,
                actions_ns = timing.actions_ns,
                on_tick_ns = timing.on_tick_ns,
                aoe_ns = timing.aoe_ns,
                collectives_ns = timing.collectives_ns,
                observations_ns = timing.observations_ns,
                rewards_ns = timing.rewards_ns,
                truncation_ns = timing.truncation_ns,
                "tick phase timings"
            );
        }
        Ok(())
    }

    fn agent_is_frozen(&mut self, agent_key: ObjectKey) -> bool {
        let Some(agent) = self
            .world
            .objects
            .get_mut(agent_key)
            .and_then(|o| o.agent.as_mut())
        else {
            return false;
        };
        if agent.frozen > 0 {
            agent.frozen -= 1;
            agent.stats.incr("status.frozen.ticks");
            return true;
        }
        false
    }

    fn record_invalid_action(&mut self, agent_idx: usize, action_id: i32) {
        let agent_key = self.agents[agent_idx];
        if let Some(agent) = self
            .world
            .objects
            .get_mut(agent_key)
            .and_then(|o| o.agent.as_mut())
        {
            agent.stats.incr("action.invalid_index");
            agent
                .stats
                .incr(&format!("action.invalid_index.{action_id}"));
        }
        self.action_success[agent_idx] = false;
    }

    fn record_action_outcome(&mut self, agent_key: ObjectKey, name: &str, success: bool) {
        if let Some(agent) = self
            .world
            .objects
            .get_mut(agent_key)
            .and_then(|o| o.agent.as_mut())
        {
            if success {
                agent.stats.incr(&format!("action.{name}"));
            } else {
                agent.stats.incr(&format!("action.{name}.failed"));
            }
        }
    }

    // Accessors over the output buffers.

    /// Flat observation buffer: `num_agents x num_tokens x 3` bytes.
    #[must_use]
    pub fn observations(&self) -> &[u8] {
        &self.observations
    }

    /// One agent's observation tokens as `(location, feature, value)` rows.
    #[must_use]
    pub fn agent_observation(&self, agent_idx: usize) -> &[u8] {
        let stride = self.config.num_observation_tokens * 3;
        &self.observations[agent_idx * stride..(agent_idx + 1) * stride]
    }

    #[must_use]
    pub fn rewards(&self) -> &[f32] {
        &self.rewards
    }

    #[must_use]
    pub fn episode_rewards(&self) -> &[f32] {
        &self.episode_rewards
    }

    #[must_use]
    pub fn terminals(&self) -> &[bool] {
        &self.terminals
    }

    #[must_use]
    pub fn truncations(&self) -> &[bool] {
        &self.truncations
    }

    #[must_use]
    pub fn action_success(&self) -> &[bool] {
        &self.action_success
    }

    #[must_use]
    pub fn current_step(&self) -> u32 {
        self.current_step
    }

    #[must_use]
    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    /// Keys of the engine's agents in dense agent-id order.
    #[must_use]
    pub fn agent_keys(&self) -> &[ObjectKey] {
        &self.agents
    }

    /// The immutable configuration the engine was built from.
    #[must_use]
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Borrow the world (tests and tooling).
    #[must_use]
    pub fn world(&self) -> &WorldCore {
        &self.world
    }

    /// Mutably borrow the world (scenario setup in tests and tooling).
    #[must_use]
    pub fn world_mut(&mut self) -> &mut WorldCore {
        &mut self.world
    }

    /// Timing of the most recent tick (zeroed unless profiling is enabled).
    #[must_use]
    pub fn step_timing(&self) -> StepTiming {
        self.timing
    }

    /// Shadow-validation counters.
    #[must_use]
    pub fn obs_validation_stats(&self) -> ObsValidationStats {
        self.obs_validation
    }
}

/// Instantiate one grid object from its catalog entry.
fn build_object(
    config: &ObjectConfig,
    location: GridLocation,
    next_agent_id: usize,
    setup: &CompileCtx,
    resource_names: &Arc<Vec<String>>,
) -> Result<GridObject, ConfigError> {
    let mut object = GridObject::new(config.type_id, config.type_name.clone(), location);
    if let Some(name) = &config.name {
        object.name = name.clone();
    }
    object.vibe = config.vibe;
    for tag in &config.tags {
        object.tags.insert(setup.check_tag(*tag)?);
    }
    if let Some(name) = &config.collective {
        object.collective = Some(setup.collective(name)?);
    }
    object.inventory_config = Arc::new(config.inventory_config.clone());
    {
        let inventory_config = Arc::clone(&object.inventory_config);
        for (resource, amount) in &config.initial_inventory {
            setup.check_resource(*resource)?;
            object
                .inventory
                .update(&inventory_config, *resource, i32::from(*amount));
        }
    }
    object.on_use = Handler::compile_chain(&config.on_use, setup)?;
    for (tag, handlers) in &config.on_tag_add {
        object
            .on_tag_add
            .insert(setup.check_tag(*tag)?, Handler::compile_chain(handlers, setup)?);
    }
    for (tag, handlers) in &config.on_tag_remove {
        object
            .on_tag_remove
            .insert(setup.check_tag(*tag)?, Handler::compile_chain(handlers, setup)?);
    }
    object.aoe_configs = config.aoe.clone();

    if let Some(agent_config) = &config.agent {
        let mut agent = AgentState::new(
            next_agent_id as u16,
            agent_config.group,
            location,
            StatsTracker::new(Arc::clone(resource_names)),
        );
        agent.role = agent_config.role;
        agent.role_weights = agent_config.role_weights;
        agent.on_tick = Handler::compile_chain(&agent_config.on_tick, setup)?;
        // Initial inventory lands in `.amount` stats for reward references.
        let amounts: Vec<(u16, u16)> = object.inventory.iter().collect();
        for (resource, amount) in amounts {
            let name = resource_names
                .get(resource as usize)
                .cloned()
                .unwrap_or_default();
            agent.stats.set(&format!("{name}.amount"), f32::from(amount));
        }
        object.agent = Some(agent);
    }
    Ok(object)
}
