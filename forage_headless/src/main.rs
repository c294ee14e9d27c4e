// CLI entry point for a headless forage run.
//
// Builds a demo map (stations on an inner ring, resource nodes on an outer
// ring, harvesters at the origin), orders every harvester onto a node, and
// runs the sim against the live snapshot worker. By default each tick waits
// for outstanding queries to be answered, so runs are repeatable; with
// `--realtime` ticks are paced by `tick_duration_ms` and replies land
// whenever the worker gets to them.
//
// Diagnostics go through `tracing`; set `RUST_LOG` (default `info`) to see
// more, e.g. `RUST_LOG=forage_sim=debug`.
//
// Usage:
//   forage-headless [OPTIONS]
//     --harvesters <N>   Harvester count (default: 12)
//     --nodes <N>        Resource node count (default: 6)
//     --stations <N>     Drop-off station count (default: 2)
//     --ticks <N>        Ticks to run (default: 5000)
//     --obstacle         Wall off the first node so the escalation ladder runs
//     --config <PATH>    Load ForageConfig from a JSON file
//     --realtime         Pace ticks by wall clock instead of settling queries
//     --json             Print the summary as JSON

use forage_sim::config::ForageConfig;
use forage_sim::entity::DropOffStation;
use forage_sim::event::{SimEvent, SimEventKind};
use forage_sim::navigation::StraightLineNavigator;
use forage_sim::sim::ForageSim;
use forage_sim::types::{NodeHandle, OwnerId, Point3, ResourceType};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const NODE_RING_RADIUS: f32 = 40.0;
const STATION_RING_RADIUS: f32 = 10.0;
const NODE_AMOUNT: u32 = 2_000;
const NODE_AMOUNT_PER_HARVEST: u32 = 10;
const STATION_CAPACITY: u32 = 5_000;

struct HeadlessArgs {
    harvesters: usize,
    nodes: usize,
    stations: usize,
    ticks: u64,
    obstacle: bool,
    config: Option<PathBuf>,
    realtime: bool,
    json: bool,
}

impl Default for HeadlessArgs {
    fn default() -> Self {
        Self {
            harvesters: 12,
            nodes: 6,
            stations: 2,
            ticks: 5_000,
            obstacle: false,
            config: None,
            realtime: false,
            json: false,
        }
    }
}

/// What a run produced, tallied from the sim's narrative events.
#[derive(Debug, Default, Serialize)]
struct RunSummary {
    ticks: u64,
    harvested: BTreeMap<String, u64>,
    delivered: BTreeMap<String, u64>,
    nodes_emptied: u64,
    unstuck_attempts: u64,
    teleports: u64,
    blacklisted: u64,
    commands_finished: u64,
    unsettled_ticks: u64,
}

impl RunSummary {
    fn absorb(&mut self, events: &[SimEvent]) {
        for event in events {
            match &event.kind {
                SimEventKind::Harvested {
                    resource_type,
                    amount,
                    ..
                } => {
                    let key = format!("{resource_type:?}");
                    *self.harvested.entry(key).or_default() += u64::from(*amount);
                }
                SimEventKind::DroppedOff {
                    resource_type,
                    accepted,
                    ..
                } => {
                    let key = format!("{resource_type:?}");
                    *self.delivered.entry(key).or_default() += u64::from(*accepted);
                }
                SimEventKind::NodeEmptied { .. } => self.nodes_emptied += 1,
                SimEventKind::UnstuckAttempted { .. } => self.unstuck_attempts += 1,
                SimEventKind::Teleported { .. } => self.teleports += 1,
                SimEventKind::GoalBlacklisted { .. } => self.blacklisted += 1,
                SimEventKind::CommandFinished { .. } => self.commands_finished += 1,
                _ => {}
            }
        }
    }

    fn print(&self) {
        println!("Ran {} ticks", self.ticks);
        for (resource_type, amount) in &self.harvested {
            let delivered = self.delivered.get(resource_type).copied().unwrap_or(0);
            println!("  {resource_type:<6} harvested {amount:>6}  delivered {delivered:>6}");
        }
        println!("  nodes emptied:     {}", self.nodes_emptied);
        println!("  unstuck attempts:  {}", self.unstuck_attempts);
        println!("  teleports:         {}", self.teleports);
        println!("  goals blacklisted: {}", self.blacklisted);
        println!("  commands finished: {}", self.commands_finished);
        if self.unsettled_ticks > 0 {
            println!("  ticks with unanswered queries: {}", self.unsettled_ticks);
        }
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = parse_args();
    let config = match &args.config {
        Some(path) => match ForageConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => ForageConfig::default(),
    };

    let tick_duration = Duration::from_millis(config.tick_duration_ms);
    let settle_timeout = Duration::from_millis(config.worker_sleep_ms.saturating_mul(50));
    let mut sim = ForageSim::new(config);
    if !sim.registry.is_worker_available() {
        warn!("running without a snapshot worker; every search will come back empty");
    }

    let nodes = build_map(&mut sim, &args);
    let mut summary = RunSummary {
        ticks: args.ticks,
        ..RunSummary::default()
    };

    for i in 0..args.harvesters {
        let agent = sim.spawn_harvester(OwnerId(0), Point3::ORIGIN);
        if let Some(&node) = nodes.get(i % nodes.len().max(1)) {
            summary.absorb(&sim.assign_harvest_target(agent, node));
        }
    }
    info!(
        harvesters = args.harvesters,
        nodes = nodes.len(),
        stations = args.stations,
        ticks = args.ticks,
        "map built"
    );

    let started = Instant::now();
    for tick in 1..=args.ticks {
        let result = sim.step(&[], tick);
        summary.absorb(&result.events);
        if args.realtime {
            std::thread::sleep(tick_duration);
        } else {
            let settled = sim.settle_queries(settle_timeout);
            if !settled.settled {
                summary.unsettled_ticks += 1;
            }
            summary.absorb(&settled.events);
        }
    }
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "run finished");

    sim.shutdown_worker();

    if args.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Failed to serialize summary: {e}");
                std::process::exit(1);
            }
        }
    } else {
        summary.print();
    }
}

/// Place stations and nodes on two rings around the origin, then publish
/// snapshots so the first searches see them.
fn build_map(sim: &mut ForageSim, args: &HeadlessArgs) -> Vec<NodeHandle> {
    for i in 0..args.stations {
        let position = ring_point(i, args.stations, STATION_RING_RADIUS);
        let station = ResourceType::ALL.iter().fold(
            DropOffStation::new(position, OwnerId(0)),
            |station, &rt| station.with_capacity(rt, 0, STATION_CAPACITY),
        );
        sim.spawn_drop_off_station(station);
    }

    let nodes: Vec<NodeHandle> = (0..args.nodes)
        .map(|i| {
            let position = ring_point(i, args.nodes, NODE_RING_RADIUS);
            let resource_type = ResourceType::ALL[i % ResourceType::ALL.len()];
            sim.spawn_resource_node(position, resource_type, NODE_AMOUNT, NODE_AMOUNT_PER_HARVEST)
        })
        .collect();

    if args.obstacle {
        if let Some(first) = nodes.first().and_then(|&n| sim.node(n)) {
            let navigator = StraightLineNavigator::new(sim.config.agent_speed)
                .with_obstacle(first.position, sim.config.slot_radius * 3.0);
            sim.set_navigator(navigator);
        }
    }

    sim.publish_snapshots();
    nodes
}

fn ring_point(i: usize, n: usize, radius: f32) -> Point3 {
    let angle = std::f32::consts::TAU * i as f32 / n.max(1) as f32;
    Point3::new(radius * angle.cos(), 0.0, radius * angle.sin())
}

/// Parse command-line arguments. Uses simple `std::env::args()` matching.
fn parse_args() -> HeadlessArgs {
    let mut out = HeadlessArgs::default();
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--harvesters" => {
                i += 1;
                out.harvesters = parse_number(&args, i, "--harvesters");
            }
            "--nodes" => {
                i += 1;
                out.nodes = parse_number(&args, i, "--nodes");
            }
            "--stations" => {
                i += 1;
                out.stations = parse_number(&args, i, "--stations");
            }
            "--ticks" => {
                i += 1;
                out.ticks = parse_number(&args, i, "--ticks");
            }
            "--config" => {
                i += 1;
                out.config = Some(args.get(i).map(PathBuf::from).unwrap_or_else(|| {
                    eprintln!("--config requires a path");
                    std::process::exit(1);
                }));
            }
            "--obstacle" => out.obstacle = true,
            "--realtime" => out.realtime = true,
            "--json" => out.json = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    out
}

fn parse_number<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> T {
    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
        eprintln!("{flag} requires a valid number");
        std::process::exit(1);
    })
}

fn print_usage() {
    println!("Usage: forage-headless [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --harvesters <N>   Harvester count (default: 12)");
    println!("  --nodes <N>        Resource node count (default: 6)");
    println!("  --stations <N>     Drop-off station count (default: 2)");
    println!("  --ticks <N>        Ticks to run (default: 5000)");
    println!("  --obstacle         Wall off the first node so the escalation ladder runs");
    println!("  --config <PATH>    Load settings from a JSON file");
    println!("  --realtime         Pace ticks by wall clock instead of settling queries");
    println!("  --json             Print the summary as JSON");
    println!("  --help, -h         Show this help");
}
