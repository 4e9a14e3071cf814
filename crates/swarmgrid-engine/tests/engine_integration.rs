use std::collections::BTreeMap;
use swarmgrid_core::{
    query, AoeConfig, CollectiveConfig, EffectCtx, EntityRef, FilterConfig, GameValueConfig,
    GameValueScope, HandlerConfig, MutationConfig, PackedCoord, QueryConfig, QueryOrderBy,
    QueryTagConfig, StatsTarget,
};
use swarmgrid_engine::{
    ActionConfig, ActionKind, AgentConfig, Engine, EngineOptions, FeatureIds, GameConfig,
    ObjectConfig, RewardConfig, RewardEntryConfig,
};

fn grid_map(rows: &[&[&str]]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|row| row.iter().map(|cell| (*cell).to_string()).collect())
        .collect()
}

fn noop_action() -> ActionConfig {
    ActionConfig {
        name: "noop".into(),
        priority: 0,
        kind: ActionKind::Noop,
        handlers: vec![],
    }
}

fn agent_object(type_id: u16) -> ObjectConfig {
    ObjectConfig {
        type_id,
        type_name: "agent".into(),
        agent: Some(AgentConfig::default()),
        ..ObjectConfig::default()
    }
}

fn base_config(num_agents: usize, resources: &[&str]) -> GameConfig {
    GameConfig {
        num_agents,
        obs_width: 3,
        obs_height: 3,
        max_steps: 0,
        episode_truncates: false,
        resource_names: resources.iter().map(|r| (*r).to_string()).collect(),
        vibe_names: vec!["calm".into(), "alert".into()],
        num_observation_tokens: 64,
        global_obs: Default::default(),
        feature_ids: FeatureIds::standard(resources.len()),
        actions: vec![noop_action()],
        objects: BTreeMap::new(),
        tag_names: BTreeMap::new(),
        collectives: vec![],
        reward_estimates: BTreeMap::new(),
        token_value_base: 256,
        events: vec![],
        query_tags: vec![],
    }
}

fn count_tokens(obs: &[u8]) -> usize {
    obs.chunks_exact(3)
        .filter(|token| token[0] != PackedCoord::EMPTY)
        .count()
}

#[test]
fn noop_step_emits_globals_and_self_tokens_only() {
    let mut config = base_config(2, &["ore"]);
    config.objects.insert("agent".into(), agent_object(1));

    let map = grid_map(&[
        &["agent", ".", "."],
        &[".", ".", "."],
        &[".", ".", "agent"],
    ]);
    let mut engine = Engine::new(config, &map, 7, EngineOptions::default()).expect("engine");

    engine.step(&[0, 0]).expect("step");

    assert_eq!(engine.rewards(), &[0.0, 0.0]);
    assert_eq!(engine.episode_rewards(), &[0.0, 0.0]);
    assert!(engine.terminals().iter().all(|t| !t));
    assert!(engine.truncations().iter().all(|t| !t));
    assert_eq!(engine.action_success(), &[true, true]);

    for agent_idx in 0..2 {
        let obs = engine.agent_observation(agent_idx);
        // Global tokens: episode completion, last action, moved flag, last
        // reward. Own-object tokens: group, frozen, agent id.
        assert_eq!(count_tokens(obs), 7);
        assert_eq!(obs[0], PackedCoord::GLOBAL);
        // The spatial tokens sit at the window center.
        let center = PackedCoord::pack(1, 1).0;
        let spatial: Vec<_> = obs
            .chunks_exact(3)
            .filter(|token| token[0] != PackedCoord::GLOBAL && token[0] != PackedCoord::EMPTY)
            .collect();
        assert_eq!(spatial.len(), 3);
        assert!(spatial.iter().all(|token| token[0] == center));
    }
}

fn pickup_config() -> GameConfig {
    let mut config = base_config(1, &["ore"]);
    config.objects.insert("agent".into(), agent_object(1));
    config.objects.insert(
        "giver".into(),
        ObjectConfig {
            type_id: 2,
            type_name: "giver".into(),
            tags: vec![4],
            initial_inventory: [(0u16, 5u16)].into_iter().collect(),
            ..ObjectConfig::default()
        },
    );
    config.actions.push(ActionConfig {
        name: "pickup".into(),
        priority: 0,
        kind: ActionKind::UseNearby,
        handlers: vec![HandlerConfig {
            name: "pickup".into(),
            filters: vec![FilterConfig::Tag {
                entity: EntityRef::Target,
                tag: 4,
            }],
            mutations: vec![MutationConfig::ResourceTransfer {
                source: EntityRef::Target,
                destination: EntityRef::Actor,
                resource: 0,
                amount: 1,
                remove_source_when_empty: false,
            }],
        }],
    });
    config
}

#[test]
fn pickup_succeeds_only_when_adjacent() {
    // Adjacent: giver directly above the agent.
    let map = grid_map(&[&["giver"], &["agent"], &["."]]);
    let mut engine = Engine::new(pickup_config(), &map, 3, EngineOptions::default()).expect("engine");
    engine.step(&[1]).expect("step");
    assert_eq!(engine.action_success(), &[true]);
    let agent = engine.agent_keys()[0];
    assert_eq!(engine.world().objects[agent].inventory.amount(0), 1);

    // Two cells away: the pickup finds no target and fails.
    let map = grid_map(&[&["giver"], &["."], &["agent"]]);
    let mut engine = Engine::new(pickup_config(), &map, 3, EngineOptions::default()).expect("engine");
    engine.step(&[1]).expect("step");
    assert_eq!(engine.action_success(), &[false]);
    let agent = engine.agent_keys()[0];
    assert_eq!(engine.world().objects[agent].inventory.amount(0), 0);
}

#[test]
fn opposing_aoe_tiles_apply_net_healing_through_the_cap() {
    let mut config = base_config(1, &["health"]);
    config.collectives = vec![
        CollectiveConfig {
            name: "blue".into(),
            ..Default::default()
        },
        CollectiveConfig {
            name: "red".into(),
            ..Default::default()
        },
    ];

    let mut agent = agent_object(1);
    agent.collective = Some("blue".into());
    agent.inventory_config.limits.insert(0, 10);
    agent.initial_inventory.insert(0, 5);
    config.objects.insert("agent".into(), agent);

    let heal = AoeConfig {
        radius: 2,
        is_static: true,
        effect_self: false,
        presence_deltas: vec![],
        filters: vec![],
        mutations: vec![MutationConfig::ResourceDelta {
            entity: EntityRef::Target,
            resource: 0,
            delta: 5,
        }],
    };
    let mut damage = heal.clone();
    damage.mutations = vec![MutationConfig::ResourceDelta {
        entity: EntityRef::Target,
        resource: 0,
        delta: -3,
    }];

    config.objects.insert(
        "shrine".into(),
        ObjectConfig {
            type_id: 2,
            type_name: "shrine".into(),
            collective: Some("blue".into()),
            aoe: vec![heal],
            ..ObjectConfig::default()
        },
    );
    config.objects.insert(
        "spikes".into(),
        ObjectConfig {
            type_id: 3,
            type_name: "spikes".into(),
            collective: Some("red".into()),
            aoe: vec![damage],
            ..ObjectConfig::default()
        },
    );

    let map = grid_map(&[&["shrine", "agent", "spikes"]]);
    let mut engine = Engine::new(config, &map, 5, EngineOptions::default()).expect("engine");
    engine.step(&[0]).expect("step");

    let agent = engine.agent_keys()[0];
    // Net +2 from 5, well under the cap of 10; the heal never clamps alone.
    assert_eq!(engine.world().objects[agent].inventory.amount(0), 7);
    let stats = &engine.world().objects[agent].agent.as_ref().expect("agent").stats;
    assert_eq!(stats.get("health.gained"), 2.0);
    assert_eq!(stats.get("health.lost"), 0.0);

    // Two more ticks pin the value at the cap with a single net clamp.
    engine.step(&[0]).expect("step");
    engine.step(&[0]).expect("step");
    let agent = engine.agent_keys()[0];
    assert_eq!(engine.world().objects[agent].inventory.amount(0), 10);
}

#[test]
fn connectivity_recompute_fires_remove_handlers_exactly_once() {
    const SEED_TAG: u16 = 1;
    const TEAM_TAG: u16 = 2;
    const CONNECTED_TAG: u16 = 3;

    let mut config = base_config(1, &["ore"]);
    config.objects.insert("agent".into(), agent_object(1));

    let lost_handler = HandlerConfig {
        name: "note_connectivity_lost".into(),
        filters: vec![],
        mutations: vec![MutationConfig::Stats {
            stat: "connectivity.lost".into(),
            delta: 1.0,
            target: StatsTarget::Game,
            entity: Default::default(),
        }],
    };
    let mut node = ObjectConfig {
        type_id: 2,
        type_name: "node".into(),
        tags: vec![TEAM_TAG],
        ..ObjectConfig::default()
    };
    node.on_tag_remove
        .insert(CONNECTED_TAG, vec![lost_handler]);
    config.objects.insert("node".into(), node);

    let mut seed_node = config.objects["node"].clone();
    seed_node.tags.push(SEED_TAG);
    config.objects.insert("seed".into(), seed_node);

    config.query_tags = vec![QueryTagConfig {
        tag: CONNECTED_TAG,
        query: QueryConfig::Closure {
            source: Box::new(QueryConfig::Tag {
                tag: SEED_TAG,
                filters: vec![],
                max_items: 0,
                order_by: QueryOrderBy::None,
            }),
            radius: 0,
            edge_filters: vec![FilterConfig::Tag {
                entity: EntityRef::Target,
                tag: TEAM_TAG,
            }],
            result_filters: vec![],
            max_items: 0,
            order_by: QueryOrderBy::None,
        },
    }];

    let map = grid_map(&[
        &["seed", "node", "node", "node", "node"],
        &["agent", ".", ".", ".", "."],
    ]);
    let mut engine = Engine::new(config, &map, 1, EngineOptions::default()).expect("engine");

    // All five chain members carry the materialized tag after init.
    assert_eq!(engine.world().tag_index.count(CONNECTED_TAG), 5.0);

    // Sever the chain at its middle node.
    let middle = engine
        .world()
        .grid
        .object_at(swarmgrid_core::GridLocation::new(0, 2))
        .expect("middle node");
    let world = engine.world_mut();
    world.remove_from_grid(middle);
    world.remove_tag(middle, TEAM_TAG, &EffectCtx::on_self(middle));
    query::recompute(world, CONNECTED_TAG);

    // The middle node and the two beyond it lost connectivity, each firing
    // its on-remove handler exactly once; the still-connected pair did not.
    assert_eq!(world.stats.get("connectivity.lost"), 3.0);
    assert_eq!(world.tag_index.count(CONNECTED_TAG), 2.0);

    // Recomputing an unchanged world fires nothing further.
    query::recompute(world, CONNECTED_TAG);
    assert_eq!(world.stats.get("connectivity.lost"), 3.0);
}

#[test]
fn observation_buffer_exhaustion_counts_dropped_tokens() {
    let mut config = base_config(1, &["ore"]);
    config.num_observation_tokens = 4;
    let mut agent = agent_object(1);
    // Plenty of tags so the agent's own cell overflows four tokens.
    agent.tags = vec![1, 2, 3, 4, 5];
    config.objects.insert("agent".into(), agent);

    let map = grid_map(&[&["agent"]]);
    let mut engine = Engine::new(config, &map, 2, EngineOptions::default()).expect("engine");

    let written_before = engine.world().stats.get("tokens_written");
    let dropped_before = engine.world().stats.get("tokens_dropped");
    engine.step(&[0]).expect("step");

    let obs = engine.agent_observation(0);
    assert_eq!(count_tokens(obs), 4);
    assert!(obs.chunks_exact(3).skip(4).all(|t| t == [0xFF, 0xFF, 0xFF]));

    let written = engine.world().stats.get("tokens_written") - written_before;
    let dropped = engine.world().stats.get("tokens_dropped") - dropped_before;
    let free = engine.world().stats.get("tokens_free_space");
    assert_eq!(written, 4.0);
    assert!(dropped > 0.0);
    // The buffer is full, so this tick contributed no free space.
    assert_eq!(free, 0.0);
}

fn deterministic_config() -> (GameConfig, Vec<Vec<String>>) {
    let mut config = base_config(2, &["ore", "heart"]);
    config.max_steps = 50;
    config.episode_truncates = true;
    config.collectives = vec![CollectiveConfig {
        name: "blue".into(),
        ..Default::default()
    }];

    let mut agent = agent_object(1);
    agent.collective = Some("blue".into());
    agent.agent = Some(AgentConfig {
        reward: RewardConfig {
            entries: vec![RewardEntryConfig {
                numerator: GameValueConfig::Inventory {
                    scope: GameValueScope::Agent,
                    resource: 0,
                },
                denominators: vec![],
                weight: 1.0,
                max_value: None,
                accumulate: false,
                role: 255,
            }],
        },
        ..AgentConfig::default()
    });
    config.objects.insert("agent".into(), agent);

    config.objects.insert(
        "mine".into(),
        ObjectConfig {
            type_id: 2,
            type_name: "mine".into(),
            tags: vec![4],
            initial_inventory: [(0u16, 30u16)].into_iter().collect(),
            aoe: vec![AoeConfig {
                radius: 1,
                is_static: true,
                effect_self: false,
                presence_deltas: vec![],
                filters: vec![],
                mutations: vec![MutationConfig::ResourceDelta {
                    entity: EntityRef::Target,
                    resource: 1,
                    delta: 1,
                }],
            }],
            ..ObjectConfig::default()
        },
    );

    config.actions = vec![
        noop_action(),
        ActionConfig {
            name: "move_east".into(),
            priority: 1,
            kind: ActionKind::Move { dr: 0, dc: 1 },
            handlers: vec![],
        },
        ActionConfig {
            name: "move_west".into(),
            priority: 1,
            kind: ActionKind::Move { dr: 0, dc: -1 },
            handlers: vec![],
        },
        ActionConfig {
            name: "pickup".into(),
            priority: 0,
            kind: ActionKind::UseNearby,
            handlers: vec![HandlerConfig {
                name: "pickup".into(),
                filters: vec![FilterConfig::Tag {
                    entity: EntityRef::Target,
                    tag: 4,
                }],
                mutations: vec![MutationConfig::ResourceTransfer {
                    source: EntityRef::Target,
                    destination: EntityRef::Actor,
                    resource: 0,
                    amount: 1,
                    remove_source_when_empty: false,
                }],
            }],
        },
    ];

    let map = grid_map(&[
        &["agent", ".", "mine"],
        &[".", ".", "."],
        &["agent", ".", "."],
    ]);
    (config, map)
}

#[test]
fn identically_seeded_runs_are_bytewise_identical() {
    let (config, map) = deterministic_config();
    let mut a = Engine::new(config.clone(), &map, 0xDEADBEEF, EngineOptions::default())
        .expect("engine a");
    let mut b =
        Engine::new(config, &map, 0xDEADBEEF, EngineOptions::default()).expect("engine b");

    // A fixed, mildly adversarial action tape.
    for step in 0..50u32 {
        let actions = [
            (step % 4) as i32,
            ((step + 1) % 4) as i32,
        ];
        a.step(&actions).expect("step a");
        b.step(&actions).expect("step b");
        assert_eq!(a.observations(), b.observations(), "step {step}");
        assert_eq!(a.rewards(), b.rewards(), "step {step}");
        assert_eq!(a.episode_rewards(), b.episode_rewards(), "step {step}");
        assert_eq!(a.terminals(), b.terminals(), "step {step}");
        assert_eq!(a.truncations(), b.truncations(), "step {step}");
    }

    // max_steps = 50 with episode_truncates: both runs truncate together.
    assert!(a.truncations().iter().all(|t| *t));
    assert!(b.truncations().iter().all(|t| *t));
    assert!(a.terminals().iter().all(|t| !t));
}

#[test]
fn reference_and_optimized_encoders_agree_bytewise() {
    let (config, map) = deterministic_config();
    let options = EngineOptions {
        obs_validation: true,
        ..EngineOptions::default()
    };
    let mut engine = Engine::new(config, &map, 17, options).expect("engine");
    for step in 0..30u32 {
        let actions = [(step % 4) as i32, ((step + 2) % 4) as i32];
        engine.step(&actions).expect("step");
    }
    let stats = engine.obs_validation_stats();
    assert!(stats.comparisons > 0);
    assert_eq!(stats.mismatches, 0);
}

#[test]
fn episode_rewards_accumulate_per_tick_rewards() {
    let (config, map) = deterministic_config();
    let mut engine = Engine::new(config, &map, 4, EngineOptions::default()).expect("engine");
    let mut summed = vec![0.0f32; 2];
    for step in 0..20u32 {
        let actions = [3, (step % 4) as i32];
        engine.step(&actions).expect("step");
        for (sum, reward) in summed.iter_mut().zip(engine.rewards()) {
            *sum += reward;
        }
    }
    assert_eq!(engine.episode_rewards(), summed.as_slice());
}
