// End-to-end forage scenarios against the live snapshot worker.
//
// Each test builds a small world, gives orders, and drives the sim through
// `ScenarioHarness`, which settles every worker query after each tick. The
// assertions are on authoritative state (arena, agents, registry) and on
// the narrative events the run produced.

use forage_sim::agent::AiState;
use forage_sim::command::{SimAction, SimCommand};
use forage_sim::config::{ConfigError, ForageConfig};
use forage_sim::entity::DropOffStation;
use forage_sim::event::SimEventKind;
use forage_sim::navigation::StraightLineNavigator;
use forage_sim::query::rank_resources;
use forage_sim::types::{Goal, OwnerId, Point3, ResourceType};
use scenario_tests::{ScenarioHarness, quiet_config};

fn wood_station(position: Point3, max: u32) -> DropOffStation {
    DropOffStation::new(position, OwnerId(0)).with_capacity(ResourceType::Wood, 0, max)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// One harvester empties a node in two trips and everything lands in the
/// station.
#[test]
fn full_harvest_and_drop_off_loop() {
    let config = ForageConfig {
        cargo_capacity: 30,
        ..quiet_config()
    };
    let mut h = ScenarioHarness::new(config);
    let agent = h.sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);
    let node = h
        .sim
        .spawn_resource_node(Point3::new(5.0, 0.0, 0.0), ResourceType::Wood, 60, 10);
    let station = h.sim.spawn_drop_off_station(wood_station(Point3::new(-5.0, 0.0, 0.0), 100));
    h.assign(agent, node);

    let delivered = h.run_until(2_000, |sim| {
        sim.station(station)
            .and_then(|s| s.capacity(ResourceType::Wood))
            .is_some_and(|c| c.current == 60)
    });
    assert!(delivered, "station never received the full 60 wood");

    assert!(h.sim.node(node).unwrap().is_empty());
    assert_eq!(h.harvested_from(node), 60);
    assert_eq!(
        h.count(|k| matches!(k, SimEventKind::DroppedOff { accepted: 30, .. })),
        2
    );
    assert_eq!(h.count(|k| matches!(k, SimEventKind::NodeEmptied { .. })), 1);
    assert!(h.sim.agent(agent).unwrap().cargo.is_empty());

    // Nothing left of that type anywhere: the agent ends up idle.
    assert!(h.run_until(200, |sim| sim.agent(agent).unwrap().state == AiState::Idle));
}

/// Nine harvesters on an eight-slot node: eight get slots, the ninth
/// searches, finds nothing else and idles.
#[test]
fn ninth_harvester_is_turned_away() {
    let mut h = ScenarioHarness::new(quiet_config());
    let node = h
        .sim
        .spawn_resource_node(Point3::new(10.0, 0.0, 0.0), ResourceType::Stone, 1_000, 10);
    let agents: Vec<_> = (0..9)
        .map(|_| h.sim.spawn_harvester(OwnerId(0), Point3::ORIGIN))
        .collect();
    for &agent in &agents {
        h.assign(agent, node);
    }

    let n = h.sim.node(node).unwrap();
    assert!(n.is_fully_occupied());
    assert_eq!(n.occupied_slot_count(), 8);
    for &agent in &agents[..8] {
        let a = h.sim.agent(agent).unwrap();
        assert_eq!(a.state, AiState::MoveToResource);
        assert_eq!(a.claimed_slots.len(), 1);
    }
    let ninth = agents[8];
    assert_eq!(h.sim.agent(ninth).unwrap().state, AiState::AsyncFindResource);

    // The snapshot marks the node full, so ranking skips it.
    let snapshot = h.sim.registry.build_resource_snapshot(&h.sim.arena, h.sim.tick);
    assert_eq!(snapshot.rows.len(), 1);
    assert!(snapshot.rows[0].fully_occupied);
    assert!(rank_resources(&snapshot.rows, Point3::ORIGIN, 4, ResourceType::Stone).is_empty());

    h.step_tick();
    let a = h.sim.agent(ninth).unwrap();
    assert_eq!(a.state, AiState::Idle);
    assert!(a.claimed_slots.is_empty());
    assert_eq!(a.target_node, None);
}

/// A walled-off node costs one unstuck and one teleport, is blacklisted,
/// and the worker's next answer sends the agent to the reachable node.
#[test]
fn unreachable_node_falls_back_to_next_candidate() {
    let walled = Point3::new(20.0, 0.0, 0.0);
    let mut h = ScenarioHarness::new(quiet_config())
        .with_navigator(StraightLineNavigator::new(0.5).with_obstacle(walled, 6.0));
    let agent = h.sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);
    let blocked = h.sim.spawn_resource_node(walled, ResourceType::Metal, 100, 10);
    let open = h
        .sim
        .spawn_resource_node(Point3::new(-10.0, 0.0, 0.0), ResourceType::Metal, 100, 10);
    h.sim.publish_snapshots();
    h.assign(agent, blocked);

    let harvesting = h.run_until(500, |sim| {
        sim.agent(agent)
            .is_some_and(|a| a.cargo.amount(ResourceType::Metal) > 0)
    });
    assert!(harvesting, "agent never harvested anywhere");

    assert_eq!(h.count(|k| matches!(k, SimEventKind::UnstuckAttempted { .. })), 1);
    assert_eq!(h.count(|k| matches!(k, SimEventKind::Teleported { .. })), 1);
    assert_eq!(
        h.count(|k| *k == SimEventKind::GoalBlacklisted { agent, goal: Goal::Node(blocked) }),
        1
    );
    assert_eq!(h.harvested_from(blocked), 0);
    assert!(h.harvested_from(open) > 0);

    let a = h.sim.agent(agent).unwrap();
    assert_eq!(a.target_node, Some(open));
    assert!(a.is_blacklisted(Goal::Node(blocked)));
    assert_eq!(h.sim.node(blocked).unwrap().occupied_slot_count(), 0);
}

/// The drop-off leg climbs the same ladder: a walled-in station costs one
/// unstuck and one teleport, is blacklisted, and a fresh search finds the
/// open one.
#[test]
fn unreachable_station_falls_back_to_next_candidate() {
    let walled = Point3::new(12.0, 0.0, 0.0);
    let mut h = ScenarioHarness::new(quiet_config())
        .with_navigator(StraightLineNavigator::new(0.5).with_obstacle(walled, 5.0));
    let agent = h.sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);
    let blocked = h.sim.spawn_drop_off_station(wood_station(walled, 100));
    let open = h.sim.spawn_drop_off_station(wood_station(Point3::new(-20.0, 0.0, 0.0), 100));
    h.sim.publish_snapshots();
    h.sim.agents[agent].cargo.load(ResourceType::Wood, 10);

    h.return_cargo(agent);
    let unloaded = h.run_until(500, |sim| sim.agent(agent).unwrap().cargo.is_empty());
    assert!(unloaded, "cargo never reached the open station");

    let goal = Goal::Station(blocked);
    assert_eq!(
        h.count(|k| *k == SimEventKind::UnstuckAttempted { agent, goal }),
        1
    );
    assert_eq!(
        h.count(|k| matches!(
            k,
            SimEventKind::AgentStateChanged { to: AiState::UnstuckTowardsDropOff, .. }
        )),
        1
    );
    assert_eq!(
        h.count(|k| matches!(k, SimEventKind::Teleported { goal: g, .. } if *g == goal)),
        1
    );
    assert_eq!(h.count(|k| *k == SimEventKind::GoalBlacklisted { agent, goal }), 1);
    // The initial search plus the one after blacklisting.
    assert_eq!(
        h.count(|k| matches!(
            k,
            SimEventKind::AgentStateChanged { to: AiState::AsyncFindDropOff, .. }
        )),
        2
    );

    let wood = |h: &ScenarioHarness, station| {
        h.sim.station(station).unwrap().capacity(ResourceType::Wood).unwrap().current
    };
    assert_eq!(wood(&h, open), 10);
    assert_eq!(wood(&h, blocked), 0);
    assert!(h.sim.agent(agent).unwrap().is_blacklisted(goal));
}

/// A node spawned with a zero per-harvest amount still empties into cargo.
#[test]
fn zero_harvest_amount_node_still_makes_progress() {
    let mut h = ScenarioHarness::new(quiet_config());
    let agent = h.sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);
    let node = h
        .sim
        .spawn_resource_node(Point3::new(4.0, 0.0, 0.0), ResourceType::Food, 3, 0);
    let station = h.sim.spawn_drop_off_station(
        DropOffStation::new(Point3::new(-4.0, 0.0, 0.0), OwnerId(0))
            .with_capacity(ResourceType::Food, 0, 100),
    );
    h.assign(agent, node);

    let delivered = h.run_until(1_000, |sim| {
        sim.station(station)
            .and_then(|s| s.capacity(ResourceType::Food))
            .is_some_and(|c| c.current == 3)
    });
    assert!(delivered, "node with zero per-harvest amount never emptied");
    assert_eq!(h.count(|k| matches!(k, SimEventKind::Harvested { amount: 1, .. })), 3);
    assert!(h.sim.node(node).unwrap().is_empty());
}

/// The blacklist window closes on its timer and the goal is eligible again.
#[test]
fn blacklist_window_reopens_goal() {
    let walled = Point3::new(20.0, 0.0, 0.0);
    let config = ForageConfig {
        blacklist_clear_interval_ticks: 300,
        ..quiet_config()
    };
    let mut h = ScenarioHarness::new(config)
        .with_navigator(StraightLineNavigator::new(0.5).with_obstacle(walled, 6.0));
    let agent = h.sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);
    let blocked = h.sim.spawn_resource_node(walled, ResourceType::Food, 100, 10);
    h.assign(agent, blocked);

    h.run_ticks(100);
    assert!(h.sim.agent(agent).unwrap().is_blacklisted(Goal::Node(blocked)));
    h.run_ticks(250);
    let a = h.sim.agent(agent).unwrap();
    assert!(!a.is_blacklisted(Goal::Node(blocked)));
    assert!(a.teleports_used.is_empty());
}

/// Destroyed nodes drop out of the next snapshot and of worker answers.
#[test]
fn destroyed_node_leaves_the_candidate_set() {
    let mut h = ScenarioHarness::new(quiet_config());
    let near = h
        .sim
        .spawn_resource_node(Point3::new(3.0, 0.0, 0.0), ResourceType::Wood, 100, 10);
    let far = h
        .sim
        .spawn_resource_node(Point3::new(30.0, 0.0, 0.0), ResourceType::Wood, 100, 10);
    let agent = h.sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);

    assert!(h.sim.destroy_resource_node(near));
    let snapshot = h.sim.registry.build_resource_snapshot(&h.sim.arena, h.sim.tick);
    let handles: Vec<_> = snapshot.rows.iter().map(|r| r.handle).collect();
    assert_eq!(handles, vec![far]);

    // A search by type (idle with a remembered type) can only find `far`.
    h.sim.agents[agent].remembered_type = Some(ResourceType::Wood);
    h.sim.publish_snapshots();
    // The idle check's first firing at tick 0 issues the search.
    h.step_tick();
    let a = h.sim.agent(agent).unwrap();
    assert_eq!(a.target_node, Some(far));
    assert_eq!(a.state, AiState::MoveToResource);
}

/// A query in flight when the worker stops comes back empty exactly once,
/// and later queries are answered immediately.
#[test]
fn worker_shutdown_answers_pending_queries_empty() {
    let mut h = ScenarioHarness::new(quiet_config());
    let idle_check = h.sim.timers.idle_check;
    h.sim.cancel_timer(idle_check);
    let agent = h.sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);
    h.sim.spawn_drop_off_station(wood_station(Point3::new(4.0, 0.0, 0.0), 100));
    h.sim.agents[agent].cargo.load(ResourceType::Wood, 12);

    h.return_cargo(agent);
    assert_eq!(h.sim.agent(agent).unwrap().state, AiState::AsyncFindDropOff);
    assert_eq!(h.sim.registry.pending_count(), 1);

    h.sim.shutdown_worker();
    assert!(!h.sim.registry.is_worker_available());
    h.step_tick();

    assert_eq!(h.sim.registry.pending_count(), 0);
    let a = h.sim.agent(agent).unwrap();
    assert_eq!(a.state, AiState::Idle);
    assert_eq!(a.cargo.amount(ResourceType::Wood), 12);
    assert_eq!(h.count(|k| matches!(k, SimEventKind::CommandFinished { .. })), 1);

    // No worker: the next order resolves within the call.
    h.return_cargo(agent);
    assert_eq!(h.sim.agent(agent).unwrap().state, AiState::Idle);
    assert_eq!(h.sim.registry.pending_count(), 0);
}

/// A switched-off station is skipped in favor of a farther active one.
#[test]
fn inactive_station_is_skipped() {
    let mut h = ScenarioHarness::new(quiet_config());
    let agent = h.sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);
    let near = h.sim.spawn_drop_off_station(wood_station(Point3::new(2.0, 0.0, 0.0), 100));
    let far = h.sim.spawn_drop_off_station(wood_station(Point3::new(-8.0, 0.0, 0.0), 100));
    assert!(h.sim.set_station_active(near, false));
    h.sim.publish_snapshots();
    h.sim.agents[agent].cargo.load(ResourceType::Wood, 20);

    h.return_cargo(agent);
    let unloaded = h.run_until(500, |sim| sim.agent(agent).unwrap().cargo.is_empty());
    assert!(unloaded);
    assert_eq!(h.sim.station(far).unwrap().capacity(ResourceType::Wood).unwrap().current, 20);
    assert_eq!(h.sim.station(near).unwrap().capacity(ResourceType::Wood).unwrap().current, 0);
}

/// A scripted timeline survives a JSON round trip and drives the sim.
#[test]
fn scripted_timeline_from_json() {
    let script = vec![
        SimCommand {
            tick: 1,
            action: SimAction::SpawnResourceNode {
                position: Point3::new(6.0, 0.0, 0.0),
                resource_type: ResourceType::Food,
                amount: 40,
                amount_per_harvest: 5,
            },
        },
        SimCommand {
            tick: 2,
            action: SimAction::SpawnDropOffStation {
                position: Point3::new(-6.0, 0.0, 0.0),
                owner: OwnerId(0),
                capacities: vec![(ResourceType::Food, 100)],
            },
        },
        SimCommand {
            tick: 3,
            action: SimAction::SpawnHarvester {
                owner: OwnerId(0),
                position: Point3::ORIGIN,
            },
        },
    ];
    let json = serde_json::to_string(&script).unwrap();
    let restored: Vec<SimCommand> = serde_json::from_str(&json).unwrap();

    let mut h = ScenarioHarness::new(quiet_config());
    let result = h.sim.step(&restored, 10);
    h.events.extend(result.events);
    assert_eq!(h.sim.tick, 10);
    assert_eq!(h.sim.arena.node_count(), 1);
    assert_eq!(h.sim.arena.station_count(), 1);
    assert_eq!(h.sim.agents.len(), 1);
    assert_eq!(h.sim.registry.node_count(), 1);
    assert_eq!(h.sim.registry.station_count(), 1);
}

/// Config loads from a file, fills in defaults and repairs bad values.
#[test]
fn config_file_round_trip() {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("forage_config_{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{ "cargo_capacity": 45, "max_slots_per_node": 20, "acceptance_radius": -1.0 }"#,
    )
    .unwrap();

    let loaded = ForageConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded.cargo_capacity, 45);
    assert_eq!(loaded.resource_snapshot_interval_ticks, 50);

    let fixed = loaded.sanitized();
    assert_eq!(fixed.max_slots_per_node, 8);
    assert!(fixed.acceptance_radius > 0.0);

    let missing = ForageConfig::load(&dir.join("forage_config_does_not_exist.json"));
    assert!(matches!(missing, Err(ConfigError::Io { .. })));
}
