// Test-only driver for end-to-end forage scenarios.
//
// Wraps a real `ForageSim` (with its real snapshot worker thread) and gives
// tests a synchronous API: advance one tick, then block until every query
// the tick issued has been answered and handled. That makes worker-backed
// runs repeatable without touching any sim internals. Every narrative event
// from orders, steps and settles is kept in `events` for later assertions.
//
// See also: `tests/` for the scenarios.

use std::time::Duration;

use forage_sim::config::ForageConfig;
use forage_sim::event::{SimEvent, SimEventKind};
use forage_sim::navigation::Navigator;
use forage_sim::sim::ForageSim;
use forage_sim::types::{AgentId, NodeHandle};

/// Upper bound on how long one tick may wait for worker replies.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ScenarioHarness {
    pub sim: ForageSim,
    pub events: Vec<SimEvent>,
}

impl ScenarioHarness {
    /// A harness around a sim with a live snapshot worker.
    pub fn new(config: ForageConfig) -> Self {
        Self {
            sim: ForageSim::new(config),
            events: Vec::new(),
        }
    }

    /// A harness whose queries are answered synchronously and empty.
    pub fn without_worker(config: ForageConfig) -> Self {
        Self {
            sim: ForageSim::without_worker(config),
            events: Vec::new(),
        }
    }

    pub fn with_navigator(mut self, navigator: impl Navigator + 'static) -> Self {
        self.sim.set_navigator(navigator);
        self
    }

    pub fn assign(&mut self, agent: AgentId, node: NodeHandle) {
        let events = self.sim.assign_harvest_target(agent, node);
        self.events.extend(events);
    }

    pub fn return_cargo(&mut self, agent: AgentId) {
        let events = self.sim.issue_return_cargo(agent);
        self.events.extend(events);
    }

    /// Advance one tick, then wait out every query in flight.
    pub fn step_tick(&mut self) {
        let target = self.sim.tick + 1;
        let result = self.sim.step(&[], target);
        self.events.extend(result.events);
        let settled = self.sim.settle_queries(POLL_TIMEOUT);
        assert!(
            settled.settled,
            "queries still pending after {POLL_TIMEOUT:?} at tick {}",
            self.sim.tick
        );
        self.events.extend(settled.events);
    }

    pub fn run_ticks(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.step_tick();
        }
    }

    /// Step until `done` holds, up to `max_ticks`. Returns whether it held.
    pub fn run_until(&mut self, max_ticks: u64, mut done: impl FnMut(&ForageSim) -> bool) -> bool {
        for _ in 0..max_ticks {
            if done(&self.sim) {
                return true;
            }
            self.step_tick();
        }
        done(&self.sim)
    }

    pub fn count(&self, pred: impl Fn(&SimEventKind) -> bool) -> usize {
        self.events.iter().filter(|e| pred(&e.kind)).count()
    }

    /// Total amount harvested from `node` across all recorded events.
    pub fn harvested_from(&self, node: NodeHandle) -> u32 {
        self.events
            .iter()
            .filter_map(|e| match e.kind {
                SimEventKind::Harvested { node: n, amount, .. } if n == node => Some(amount),
                _ => None,
            })
            .sum()
    }
}

/// Config with periodic sweeps pushed far out, so scenarios only see the
/// tick-0 firing unless they opt in.
pub fn quiet_config() -> ForageConfig {
    ForageConfig {
        idle_check_interval_ticks: 1_000_000,
        blacklist_clear_interval_ticks: 1_000_000,
        ..ForageConfig::default()
    }
}
