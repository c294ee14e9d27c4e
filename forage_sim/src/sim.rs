// Core simulation state and tick loop.
//
// `ForageSim` owns everything on the main thread: the entity arena, the
// harvester agents, the resource registry (and through it the snapshot
// worker), the navigator and the event queue. Outside code drives it with
// `step(commands, target_tick)` and reads back narrative `SimEvent`s.
//
// ## Threads
//
// Exactly one other thread exists: the snapshot worker owned by the
// registry. The sim never blocks on it during `step`. Worker replies are
// pulled at every tick point of the step loop (`pump_replies`) and handed to
// the harvester state machine on this thread, so reply handling never races
// with entity mutation. `settle_queries` is the one blocking entry point,
// for drivers and tests that want every outstanding query answered before
// moving on.
//
// ## Timers
//
// Construction arms five periodic timers from the config: resource and
// drop-off snapshot publication (independent cadences), the registry prune
// sweep, the idle check and the blacklist/teleport-marker clear. All fire
// first at tick 0. Their ids live in `SimTimers` and any of them can be
// cancelled.
//
// ## Step loop
//
// Same shape as any discrete-event sim: jump to the next command or event,
// apply commands due at that tick, pump worker replies, then pop every event
// due at that tick. Empty ticks cost nothing.
//
// See also: `harvester.rs` for the agent state machine (an `impl ForageSim`
// block), `registry.rs` for the query API, `command.rs` for `SimAction`.

use crate::agent::HarvesterAgent;
use crate::command::{SimAction, SimCommand};
use crate::config::ForageConfig;
use crate::entity::{DropOffStation, EntityArena, ResourceNode};
use crate::event::{EventQueue, PeriodicTask, ScheduledEventKind, SimEvent, SimEventKind, TimerId};
use crate::navigation::{Navigator, StraightLineNavigator};
use crate::registry::{RegistrationOp, RegistrationOutcome, ResourceRegistry};
use crate::types::{AgentId, NodeHandle, OwnerId, Point3, ResourceType, StationHandle};
use slotmap::SlotMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Who a query reply belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryRoute {
    pub agent: AgentId,
}

/// Ids of the sim's periodic timers.
#[derive(Clone, Copy, Debug)]
pub struct SimTimers {
    pub resource_snapshot: TimerId,
    pub drop_off_snapshot: TimerId,
    pub registry_prune: TimerId,
    pub idle_check: TimerId,
    pub blacklist_clear: TimerId,
}

/// The result of processing commands and advancing the simulation.
pub struct StepResult {
    pub events: Vec<SimEvent>,
}

/// The result of `settle_queries`.
pub struct SettleResult {
    /// True if no query was left outstanding.
    pub settled: bool,
    pub events: Vec<SimEvent>,
}

pub struct ForageSim {
    pub tick: u64,
    pub config: ForageConfig,
    pub arena: EntityArena,
    pub agents: SlotMap<AgentId, HarvesterAgent>,
    pub registry: ResourceRegistry<QueryRoute>,
    pub timers: SimTimers,
    pub(crate) navigator: Box<dyn Navigator>,
    pub(crate) event_queue: EventQueue,
    next_ticket: u64,
}

impl ForageSim {
    /// A sim with a running snapshot worker.
    pub fn new(config: ForageConfig) -> Self {
        let config = config.sanitized();
        let registry = ResourceRegistry::new(
            config.supported_owner,
            Duration::from_millis(config.worker_sleep_ms),
        );
        Self::with_registry(config, registry)
    }

    /// A sim whose registry has no worker: every query is answered
    /// synchronously with an empty list.
    pub fn without_worker(config: ForageConfig) -> Self {
        let config = config.sanitized();
        let registry = ResourceRegistry::without_worker(config.supported_owner);
        Self::with_registry(config, registry)
    }

    fn with_registry(config: ForageConfig, registry: ResourceRegistry<QueryRoute>) -> Self {
        let mut event_queue = EventQueue::new();
        let timers = SimTimers {
            resource_snapshot: event_queue.schedule_periodic(
                0,
                config.resource_snapshot_interval_ticks,
                PeriodicTask::ResourceSnapshot,
            ),
            drop_off_snapshot: event_queue.schedule_periodic(
                0,
                config.dropoff_snapshot_interval_ticks,
                PeriodicTask::DropOffSnapshot,
            ),
            registry_prune: event_queue.schedule_periodic(
                0,
                config.registry_prune_interval_ticks,
                PeriodicTask::RegistryPrune,
            ),
            idle_check: event_queue.schedule_periodic(
                0,
                config.idle_check_interval_ticks,
                PeriodicTask::IdleCheck,
            ),
            blacklist_clear: event_queue.schedule_periodic(
                0,
                config.blacklist_clear_interval_ticks,
                PeriodicTask::BlacklistClear,
            ),
        };
        let navigator = Box::new(StraightLineNavigator::new(config.agent_speed));
        Self {
            tick: 0,
            config,
            arena: EntityArena::new(),
            agents: SlotMap::with_key(),
            registry,
            timers,
            navigator,
            event_queue,
            next_ticket: 0,
        }
    }

    /// Replace the movement capability.
    pub fn with_navigator(mut self, navigator: impl Navigator + 'static) -> Self {
        self.navigator = Box::new(navigator);
        self
    }

    pub fn set_navigator(&mut self, navigator: impl Navigator + 'static) {
        self.navigator = Box::new(navigator);
    }

    /// Stop a periodic timer (see `SimTimers`). Returns false if it was
    /// already stopped.
    pub fn cancel_timer(&mut self, timer: TimerId) -> bool {
        self.event_queue.cancel(timer)
    }

    pub(crate) fn next_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    // -----------------------------------------------------------------------
    // Tick loop
    // -----------------------------------------------------------------------

    /// Apply a batch of commands and advance the sim to the target tick,
    /// processing all scheduled events up to that point.
    ///
    /// Commands must be sorted by tick. Commands with tick > `target_tick`
    /// are ignored.
    pub fn step(&mut self, commands: &[SimCommand], target_tick: u64) -> StepResult {
        let mut events = Vec::new();
        let mut cmd_idx = 0;

        loop {
            let next_event_tick = self.event_queue.peek_tick();
            let next_cmd_tick = commands
                .get(cmd_idx)
                .filter(|c| c.tick <= target_tick)
                .map(|c| c.tick);

            let next_tick = match (next_event_tick, next_cmd_tick) {
                (Some(et), Some(ct)) => et.min(ct).min(target_tick),
                (Some(et), None) => et.min(target_tick),
                (None, Some(ct)) => ct.min(target_tick),
                (None, None) => target_tick,
            };
            self.tick = self.tick.max(next_tick);

            while cmd_idx < commands.len() && commands[cmd_idx].tick <= self.tick {
                let cmd = &commands[cmd_idx];
                cmd_idx += 1;
                self.apply_command(cmd, &mut events);
            }

            self.pump_replies(&mut events);

            while let Some(event) = self.event_queue.pop_if_ready(self.tick) {
                self.process_event(event.kind, &mut events);
            }

            if self.tick >= target_tick {
                break;
            }
        }

        StepResult { events }
    }

    fn apply_command(&mut self, cmd: &SimCommand, events: &mut Vec<SimEvent>) {
        match &cmd.action {
            SimAction::AssignHarvestTarget { agent, node } => {
                self.order_harvest(*agent, *node, events);
            }
            SimAction::ReturnCargo { agent } => self.order_return_cargo(*agent, events),
            SimAction::TerminateCommand { agent } => self.order_terminate(*agent, events),
            SimAction::SpawnHarvester { owner, position } => {
                self.spawn_harvester(*owner, *position);
            }
            SimAction::SpawnResourceNode {
                position,
                resource_type,
                amount,
                amount_per_harvest,
            } => {
                self.spawn_resource_node(*position, *resource_type, *amount, *amount_per_harvest);
            }
            SimAction::SpawnDropOffStation {
                position,
                owner,
                capacities,
            } => {
                let station = capacities.iter().fold(
                    DropOffStation::new(*position, *owner),
                    |station, &(rt, max)| station.with_capacity(rt, 0, max),
                );
                self.spawn_drop_off_station(station);
            }
            SimAction::DestroyResourceNode { node } => {
                self.destroy_resource_node(*node);
            }
            SimAction::DestroyDropOffStation { station } => {
                self.destroy_drop_off_station(*station);
            }
            SimAction::SetStationActive { station, active } => {
                self.set_station_active(*station, *active);
            }
            SimAction::RefillResourceNode { node, amount } => {
                self.refill_node(*node, *amount, events);
            }
        }
    }

    fn process_event(&mut self, kind: ScheduledEventKind, events: &mut Vec<SimEvent>) {
        match kind {
            ScheduledEventKind::Periodic { task, .. } => match task {
                PeriodicTask::ResourceSnapshot => {
                    self.registry.snapshot_resources(&self.arena, self.tick);
                }
                PeriodicTask::DropOffSnapshot => {
                    self.registry.snapshot_drop_offs(&self.arena, self.tick);
                }
                PeriodicTask::RegistryPrune => {
                    self.registry.prune(&self.arena);
                }
                PeriodicTask::IdleCheck => self.idle_check(events),
                PeriodicTask::BlacklistClear => self.clear_blacklists(),
            },
            ScheduledEventKind::MovementComplete {
                agent,
                ticket,
                end,
                arrived,
            } => self.handle_movement_complete(agent, ticket, end, arrived, events),
            ScheduledEventKind::ActionComplete { agent, ticket } => {
                self.handle_action_complete(agent, ticket, events);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Worker replies
    // -----------------------------------------------------------------------

    fn pump_replies(&mut self, events: &mut Vec<SimEvent>) {
        for reply in self.registry.poll_replies() {
            self.handle_query_reply(reply, events);
        }
    }

    /// Publish both snapshots now, outside their timers.
    pub fn publish_snapshots(&mut self) {
        self.registry.snapshot_resources(&self.arena, self.tick);
        self.registry.snapshot_drop_offs(&self.arena, self.tick);
    }

    /// Block until every outstanding query has been answered and handled,
    /// or `timeout` elapses. Handling a reply can issue new queries (an
    /// agent whose candidates all fail re-validation searches again); those
    /// are waited for too.
    pub fn settle_queries(&mut self, timeout: Duration) -> SettleResult {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        while self.registry.pending_count() > 0 {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            for reply in self.registry.wait_for_replies(deadline - now) {
                self.handle_query_reply(reply, &mut events);
            }
        }
        SettleResult {
            settled: self.registry.pending_count() == 0,
            events,
        }
    }

    /// Stop the snapshot worker. Outstanding queries come back empty on
    /// the next step; later ones are answered immediately.
    pub fn shutdown_worker(&mut self) {
        self.registry.shutdown_worker();
    }

    // -----------------------------------------------------------------------
    // World editing
    // -----------------------------------------------------------------------

    pub fn spawn_harvester(&mut self, owner: OwnerId, position: Point3) -> AgentId {
        let agent = HarvesterAgent::new(owner, position, self.config.cargo_capacity);
        self.agents.insert(agent)
    }

    /// Create and register a node with the configured slot count.
    pub fn spawn_resource_node(
        &mut self,
        position: Point3,
        resource_type: ResourceType,
        amount: u32,
        amount_per_harvest: u32,
    ) -> NodeHandle {
        let node = ResourceNode::new(
            position,
            resource_type,
            amount,
            amount_per_harvest,
            self.config.max_slots_per_node,
        );
        let handle = self.arena.insert_node(node);
        self.registry
            .register_resource_node(handle, RegistrationOp::Add, &self.arena);
        handle
    }

    /// Insert a station and try to register it. Stations of an unsupported
    /// owner exist in the world but never become query candidates.
    pub fn spawn_drop_off_station(&mut self, station: DropOffStation) -> StationHandle {
        let owner = station.owner;
        let handle = self.arena.insert_station(station);
        let outcome = self.registry.register_drop_off_station(
            handle,
            RegistrationOp::Add,
            owner,
            &self.arena,
        );
        if outcome != RegistrationOutcome::Added {
            debug!(?handle, ?outcome, "station spawned unregistered");
        }
        handle
    }

    pub fn destroy_resource_node(&mut self, node: NodeHandle) -> bool {
        self.registry
            .register_resource_node(node, RegistrationOp::Remove, &self.arena);
        self.arena.remove_node(node).is_some()
    }

    pub fn destroy_drop_off_station(&mut self, station: StationHandle) -> bool {
        if let Some(owner) = self.arena.station(station).map(|s| s.owner) {
            self.registry.register_drop_off_station(
                station,
                RegistrationOp::Remove,
                owner,
                &self.arena,
            );
        }
        self.arena.remove_station(station).is_some()
    }

    pub fn set_station_active(&mut self, station: StationHandle, active: bool) -> bool {
        match self.arena.station_mut(station) {
            Some(s) => {
                s.active = active;
                true
            }
            None => false,
        }
    }

    /// External refill of a node.
    pub fn refill_resource_node(&mut self, node: NodeHandle, amount: u32) -> Vec<SimEvent> {
        let mut events = Vec::new();
        self.refill_node(node, amount, &mut events);
        events
    }

    fn refill_node(&mut self, node: NodeHandle, amount: u32, events: &mut Vec<SimEvent>) {
        let Some(n) = self.arena.node_mut(node) else {
            return;
        };
        let fill_percent = n.refill(amount);
        let remaining = n.remaining();
        self.emit(
            events,
            SimEventKind::NodeFillChanged {
                node,
                remaining,
                fill_percent,
            },
        );
    }

    // -----------------------------------------------------------------------
    // Agent control surface
    // -----------------------------------------------------------------------

    /// Send `agent` to harvest `node`. Explicit orders ignore the agent's
    /// blacklist.
    pub fn assign_harvest_target(&mut self, agent: AgentId, node: NodeHandle) -> Vec<SimEvent> {
        let mut events = Vec::new();
        self.order_harvest(agent, node, &mut events);
        events
    }

    /// Abandon the current activity and take cargo to a drop-off.
    pub fn issue_return_cargo(&mut self, agent: AgentId) -> Vec<SimEvent> {
        let mut events = Vec::new();
        self.order_return_cargo(agent, &mut events);
        events
    }

    /// Abandon everything and go idle, forgetting the harvest order.
    pub fn terminate_command(&mut self, agent: AgentId) -> Vec<SimEvent> {
        let mut events = Vec::new();
        self.order_terminate(agent, &mut events);
        events
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn agent(&self, agent: AgentId) -> Option<&HarvesterAgent> {
        self.agents.get(agent)
    }

    pub fn node(&self, node: NodeHandle) -> Option<&ResourceNode> {
        self.arena.node(node)
    }

    pub fn station(&self, station: StationHandle) -> Option<&DropOffStation> {
        self.arena.station(station)
    }

    pub(crate) fn emit(&self, events: &mut Vec<SimEvent>, kind: SimEventKind) {
        events.push(SimEvent {
            tick: self.tick,
            kind,
        });
    }
}
