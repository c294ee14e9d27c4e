// forage_sim: asynchronous spatial allocation for harvester agents.
//
// Many harvester agents share a map of resource nodes and drop-off
// stations. Instead of every agent scanning live world state each tick, a
// registry publishes periodic value-copy snapshots to one background worker
// thread, agents fire nearest-candidate queries at it, and the answers come
// back on the main thread as ranked handle lists. Mutation (harvesting,
// unloading, slot occupancy) only ever touches the authoritative entities.
//
// Module overview:
// - `sim.rs`:        ForageSim: owns everything, tick loop, reply pumping.
// - `harvester.rs`:  Harvester state machine and movement escalation ladder.
// - `agent.rs`:      HarvesterAgent record, AiState, cargo.
// - `registry.rs`:   ResourceRegistry: registration, snapshots, query API.
// - `worker.rs`:     SnapshotWorker: owned background ranking thread.
// - `query.rs`:      Query wire types + the pure ranking algorithm.
// - `snapshot.rs`:   Value-copy snapshot rows.
// - `entity.rs`:     ResourceNode, DropOffStation, EntityArena.
// - `capability.rs`: Closed Resource/Storage capability set.
// - `navigation.rs`: Navigator trait + straight-line navigator with obstacles.
// - `event.rs`:      EventQueue with periodic timers + narrative SimEvents.
// - `command.rs`:    SimCommand / SimAction.
// - `config.rs`:     ForageConfig: every tunable, JSON-loadable.
// - `types.rs`:      Point3, handles, resource/owner tags, slot directions.
//
// The crate never installs a tracing subscriber; binaries decide where
// diagnostics go.

pub mod agent;
pub mod capability;
pub mod command;
pub mod config;
pub mod entity;
pub mod event;
pub mod harvester;
pub mod navigation;
pub mod query;
pub mod registry;
pub mod sim;
pub mod snapshot;
pub mod types;
pub mod worker;
