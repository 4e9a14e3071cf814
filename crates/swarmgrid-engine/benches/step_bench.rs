use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::collections::BTreeMap;
use std::time::Duration;
use swarmgrid_core::{AoeConfig, EntityRef, FilterConfig, HandlerConfig, MutationConfig};
use swarmgrid_engine::{
    ActionConfig, ActionKind, AgentConfig, Engine, EngineOptions, FeatureIds, GameConfig,
    ObjectConfig,
};

fn bench_config(side: usize) -> (GameConfig, Vec<Vec<String>>) {
    let mut objects = BTreeMap::new();
    objects.insert(
        "agent".to_string(),
        ObjectConfig {
            type_id: 1,
            type_name: "agent".into(),
            agent: Some(AgentConfig::default()),
            ..ObjectConfig::default()
        },
    );
    objects.insert(
        "mine".to_string(),
        ObjectConfig {
            type_id: 2,
            type_name: "mine".into(),
            tags: vec![4],
            initial_inventory: [(0u16, 1000u16)].into_iter().collect(),
            aoe: vec![AoeConfig {
                radius: 2,
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

    let actions = vec![
        ActionConfig {
            name: "noop".into(),
            priority: 0,
            kind: ActionKind::Noop,
            handlers: vec![],
        },
        ActionConfig {
            name: "move_east".into(),
            priority: 1,
            kind: ActionKind::Move { dr: 0, dc: 1 },
            handlers: vec![],
        },
        ActionConfig {
            name: "move_south".into(),
            priority: 1,
            kind: ActionKind::Move { dr: 1, dc: 0 },
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

    // Agents down the left edge, mines along the diagonal.
    let mut map = vec![vec![".".to_string(); side]; side];
    let mut num_agents = 0;
    for r in 0..side {
        if r % 2 == 0 {
            map[r][0] = "agent".into();
            num_agents += 1;
        }
        if r > 0 {
            map[r][r] = "mine".into();
        }
    }

    let config = GameConfig {
        num_agents,
        obs_width: 11,
        obs_height: 11,
        max_steps: 0,
        episode_truncates: false,
        resource_names: vec!["ore".into(), "heart".into()],
        vibe_names: vec!["calm".into()],
        num_observation_tokens: 128,
        global_obs: Default::default(),
        feature_ids: FeatureIds::standard(2),
        actions,
        objects,
        tag_names: BTreeMap::new(),
        collectives: vec![],
        reward_estimates: BTreeMap::new(),
        token_value_base: 256,
        events: vec![],
        query_tags: vec![],
    };
    (config, map)
}

fn bench_engine_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_step");
    group.sample_size(30);
    group.warm_up_time(Duration::from_secs(2));
    group.measurement_time(Duration::from_secs(8));
    let steps: usize = std::env::var("SG_BENCH_STEPS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64);

    for &side in &[16_usize, 32, 64] {
        group.bench_function(format!("steps{steps}_side{side}"), |b| {
            b.iter_batched(
                || {
                    let (config, map) = bench_config(side);
                    let num_agents = config.num_agents;
                    let engine = Engine::new(config, &map, 0xBEEF, EngineOptions::default())
                        .expect("engine");
                    (engine, num_agents)
                },
                |(mut engine, num_agents)| {
                    for step in 0..steps {
                        let actions: Vec<i32> = (0..num_agents)
                            .map(|idx| ((step + idx) % 4) as i32)
                            .collect();
                        engine.step(&actions).expect("step");
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_engine_steps);
criterion_main!(benches);
