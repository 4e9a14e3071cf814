//! Token observation encoding.
//!
//! Two behaviorally identical encoders are maintained: a reference path that
//! recomputes its traversal per call, and an optimized path built on
//! precomputed offsets and reused scratch buffers. A shadow-validation mode
//! runs both and compares outputs byte-for-byte.

use crate::config::FeatureIds;
use crate::engine::Engine;
use swarmgrid_core::{
    value::resolve_game_value, EffectCtx, EntityRef, GridLocation, ObjectKey, PackedCoord,
    TerritoryControl, WorldCore,
};

/// Window offsets in ascending Manhattan distance; within one distance,
/// ascending row offset with the negative column offset first.
#[must_use]
pub fn manhattan_offsets(obs_height: u8, obs_width: u8) -> Vec<(i32, i32)> {
    let hr = i32::from(obs_height) / 2;
    let wr = i32::from(obs_width) / 2;
    let mut offsets = Vec::with_capacity(usize::from(obs_height) * usize::from(obs_width));
    for dist in 0..=(hr + wr) {
        for dr in -hr..=hr {
            let rem = dist - dr.abs();
            if rem < 0 || rem > wr {
                continue;
            }
            if rem == 0 {
                offsets.push((dr, 0));
            } else {
                offsets.push((dr, -rem));
                offsets.push((dr, rem));
            }
        }
    }
    offsets
}

/// Append the base-`base` digits of `value`, most significant first, with
/// leading zeros omitted (a zero value still yields one digit).
fn encode_value_digits(mut value: u32, base: u32, out: &mut Vec<u8>) {
    debug_assert!((2..=256).contains(&base));
    let start = out.len();
    loop {
        out.push((value % base) as u8);
        value /= base;
        if value == 0 {
            break;
        }
    }
    out[start..].reverse();
}

/// Sequential token writer over one agent's observation slice.
///
/// Every push is counted toward `attempted`; pushes past capacity are
/// dropped but still counted, so `tokens_dropped` stays exact.
struct TokenWriter<'a> {
    buf: &'a mut [u8],
    capacity: usize,
    written: usize,
    attempted: usize,
}

impl<'a> TokenWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        let capacity = buf.len() / 3;
        Self {
            buf,
            capacity,
            written: 0,
            attempted: 0,
        }
    }

    fn push(&mut self, location: u8, feature: u8, value: u8) {
        self.attempted += 1;
        if self.written < self.capacity {
            let at = self.written * 3;
            self.buf[at] = location;
            self.buf[at + 1] = feature;
            self.buf[at + 2] = value;
            self.written += 1;
        }
    }
}

/// Collect one object's `(feature, value)` pairs in emission order:
/// collective, tags, vibe, inventory, then agent-specific tokens.
fn collect_object_pairs(
    world: &WorldCore,
    key: ObjectKey,
    features: &FeatureIds,
    base: u32,
    out: &mut Vec<(u8, u8)>,
) {
    let Some(object) = world.objects.get(key) else {
        return;
    };
    if features.collective != 0 {
        if let Some(cid) = object.collective {
            out.push((features.collective, (cid + 1) as u8));
        }
    }
    if features.tag != 0 {
        for tag in object.tags.iter() {
            out.push((features.tag, tag as u8));
        }
    }
    if features.vibe != 0 && object.vibe != 0 {
        out.push((features.vibe, object.vibe));
    }
    let mut digits = Vec::new();
    for (resource, amount) in object.inventory.iter() {
        let feature = features.inventory_feature(resource);
        if feature == 0 {
            continue;
        }
        digits.clear();
        encode_value_digits(u32::from(amount), base, &mut digits);
        for digit in &digits {
            out.push((feature, *digit));
        }
    }
    if let Some(agent) = &object.agent {
        if features.group != 0 {
            out.push((features.group, agent.group));
        }
        if features.frozen != 0 {
            out.push((features.frozen, u8::from(agent.frozen > 0)));
        }
        if features.agent_id != 0 {
            out.push((features.agent_id, agent.agent_id as u8));
        }
    }
}

impl Engine {
    /// Encode observations for every agent from the executed action ids.
    pub(crate) fn compute_observations(&mut self, executed: &[i32]) {
        let stride = self.config.num_observation_tokens * 3;
        let mut observations = std::mem::take(&mut self.observations);
        for agent_idx in 0..self.agents.len() {
            let buf = &mut observations[agent_idx * stride..(agent_idx + 1) * stride];
            let action = executed[agent_idx];
            if self.options.obs_validation {
                self.encode_agent(buf, agent_idx, action, self.options.use_optimized_obs);
                self.shadow_validate(buf, agent_idx, action);
            } else {
                self.encode_agent(buf, agent_idx, action, self.options.use_optimized_obs);
            }
        }
        self.observations = observations;
    }

    /// Run the secondary encoder over a scratch copy and compare.
    fn shadow_validate(&mut self, buf: &mut [u8], agent_idx: usize, action: i32) {
        self.shadow_buf.clear();
        self.shadow_buf.extend_from_slice(buf);
        buf.fill(PackedCoord::EMPTY);
        self.encode_agent(buf, agent_idx, action, !self.options.use_optimized_obs);

        self.obs_validation.comparisons += 1;
        if let Some(first_diff) = self
            .shadow_buf
            .iter()
            .zip(buf.iter())
            .position(|(a, b)| a != b)
        {
            self.obs_validation.mismatches += 1;
            if self.obs_validation.mismatches <= 10 {
                let token = first_diff / 3;
                let component = ["location", "feature_id", "value"][first_diff % 3];
                tracing::warn!(
                    agent = agent_idx,
                    token,
                    component,
                    primary = self.shadow_buf[first_diff],
                    secondary = buf[first_diff],
                    "observation encoder mismatch"
                );
            }
        }

        // Keep the primary encoder's output.
        buf.copy_from_slice(&self.shadow_buf);
    }

    fn encode_agent(&mut self, buf: &mut [u8], agent_idx: usize, action: i32, optimized: bool) {
        let agent_key = self.agents[agent_idx];
        let agent_loc = self.world.objects[agent_key].location;
        let hr = i32::from(self.config.obs_height) / 2;
        let wr = i32::from(self.config.obs_width) / 2;
        let base = self.config.token_value_base;
        let mut writer = TokenWriter::new(buf);

        // Agent-scope tokens under the dedicated global location marker.
        let mut global_pairs = if optimized {
            std::mem::take(&mut self.global_scratch)
        } else {
            Vec::new()
        };
        global_pairs.clear();
        self.build_global_pairs(agent_idx, action, &mut global_pairs);
        for (feature, value) in &global_pairs {
            writer.push(PackedCoord::GLOBAL, *feature, *value);
        }
        if optimized {
            self.global_scratch = global_pairs;
        }

        // Agent-scope observation values, resolved inline.
        let obs_values = std::mem::take(&mut self.obs_values);
        let mut digits = Vec::new();
        for (value, feature) in &obs_values {
            let ctx = EffectCtx::on_self(agent_key);
            let raw = resolve_game_value(&mut self.world, &ctx, value, EntityRef::Actor);
            digits.clear();
            encode_value_digits(raw.max(0.0) as u32, base, &mut digits);
            for digit in &digits {
                writer.push(PackedCoord::GLOBAL, *feature, *digit);
            }
        }
        self.obs_values = obs_values;

        // Spatial tokens in ascending Manhattan distance.
        let offsets = if optimized {
            std::mem::take(&mut self.obs_offsets)
        } else {
            manhattan_offsets(self.config.obs_height, self.config.obs_width)
        };
        let mut pairs = if optimized {
            std::mem::take(&mut self.scratch_pairs)
        } else {
            Vec::new()
        };

        for (dr, dc) in &offsets {
            let r = i32::from(agent_loc.r) + dr;
            let c = i32::from(agent_loc.c) + dc;
            if r < 0
                || c < 0
                || r >= i32::from(self.world.grid.height())
                || c >= i32::from(self.world.grid.width())
            {
                continue;
            }
            let cell = GridLocation::new(r as u16, c as u16);
            let location = PackedCoord::pack((dr + hr) as u8, (dc + wr) as u8).0;

            if self.config.feature_ids.territory != 0 {
                let control = self
                    .aoe
                    .fixed_observability_at(&mut self.world, cell, agent_key);
                if control != TerritoryControl::None {
                    writer.push(location, self.config.feature_ids.territory, control.token_value());
                }
            }

            let Some(object_key) = self.world.grid.object_at(cell) else {
                continue;
            };

            // Exploration signal: staleness of the observed cell.
            let staleness = {
                let object = &mut self.world.objects[object_key];
                if object.last_seen_step < self.current_step {
                    let staleness = self.current_step - object.last_seen_step;
                    object.last_seen_step = self.current_step;
                    staleness
                } else {
                    0
                }
            };
            if staleness > 0 {
                if let Some(agent) = self
                    .world
                    .objects
                    .get_mut(agent_key)
                    .and_then(|o| o.agent.as_mut())
                {
                    agent.stats.add("cell.visited", staleness as f32);
                }
            }

            pairs.clear();
            collect_object_pairs(
                &self.world,
                object_key,
                &self.config.feature_ids,
                base,
                &mut pairs,
            );
            for (feature, value) in &pairs {
                writer.push(location, *feature, *value);
            }
        }

        if optimized {
            self.obs_offsets = offsets;
            self.scratch_pairs = pairs;
        }

        let written = writer.written;
        let attempted = writer.attempted;
        let capacity = writer.capacity;
        self.world
            .stats
            .add_by_id(self.stat_tokens_written, written as f32);
        self.world
            .stats
            .add_by_id(self.stat_tokens_dropped, (attempted - written) as f32);
        self.world
            .stats
            .add_by_id(self.stat_tokens_free_space, (capacity - written) as f32);
    }

    /// Assemble the agent-scope `(feature, value)` pairs in emission order.
    fn build_global_pairs(&mut self, agent_idx: usize, action: i32, out: &mut Vec<(u8, u8)>) {
        let features = &self.config.feature_ids;
        let global = &self.config.global_obs;
        let agent_key = self.agents[agent_idx];

        if global.episode_completion_pct {
            let pct = if self.config.max_steps == 0 {
                0
            } else if self.current_step >= self.config.max_steps {
                u8::MAX
            } else {
                ((256 * u64::from(self.current_step)) / u64::from(self.config.max_steps)) as u8
            };
            out.push((features.episode_completion_pct, pct));
        }

        if global.last_action {
            out.push((features.last_action, action as u8));
        }

        if features.last_action_move != 0 {
            let moved = self.world.objects[agent_key].location != self.prev_locations[agent_idx];
            out.push((features.last_action_move, u8::from(moved)));
        }

        if global.last_reward {
            let reward_pct = (self.rewards[agent_idx] * 100.0).round() as i32;
            out.push((features.last_reward, reward_pct as u8));
        }

        if global.goal_obs {
            out.extend_from_slice(&self.goal_tokens[agent_idx]);
        }

        if global.local_position {
            let (location, spawn) = {
                let object = &self.world.objects[agent_key];
                let spawn = object
                    .agent
                    .as_ref()
                    .map(|a| a.spawn_location)
                    .unwrap_or(object.location);
                (object.location, spawn)
            };
            let dc = i32::from(location.c) - i32::from(spawn.c);
            let dr = i32::from(spawn.r) - i32::from(location.r);
            if dc > 0 {
                out.push((features.lp_east, dc.min(255) as u8));
            } else if dc < 0 {
                out.push((features.lp_west, (-dc).min(255) as u8));
            }
            if dr > 0 {
                out.push((features.lp_north, dr.min(255) as u8));
            } else if dr < 0 {
                out.push((features.lp_south, (-dr).min(255) as u8));
            }
        }
    }
}
