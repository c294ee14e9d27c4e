// Simulation events: the cooperative scheduler's queue and the narrative
// events emitted as output.
//
// Everything on the main thread runs off one priority queue ordered by
// `(tick, sequence)`. The sim pops events in order and advances the clock to
// each one; empty ticks cost nothing. Two kinds of entry live in the queue:
//
// - One-shot events (`MovementComplete`, `ActionComplete`), scheduled by
//   the harvester state machine and carrying the ticket of the async
//   operation they complete.
// - Periodic timers (`schedule_periodic`), which re-arm themselves each time
//   they fire until cancelled. Snapshot cadences, the prune sweep, the idle
//   check and the blacklist clear are all periodic timers.
//
// `cancel` removes a timer from the active set; its already-queued firing is
// skipped when popped. `SimEvent` is the output side: what presentation and
// bookkeeping consumers (UI, treasury, audio) would react to.
//
// See also: `sim.rs` for the tick loop, `harvester.rs` for who schedules the
// one-shot events.

use crate::agent::AiState;
use crate::types::{AgentId, Goal, NodeHandle, Point3, ResourceType, StationHandle};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

// ---------------------------------------------------------------------------
// Internal scheduled events (priority queue)
// ---------------------------------------------------------------------------

/// Handle to a periodic timer, used to cancel it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(u64);

/// Work a periodic timer performs each time it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodicTask {
    ResourceSnapshot,
    DropOffSnapshot,
    RegistryPrune,
    IdleCheck,
    BlacklistClear,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ScheduledEventKind {
    /// A periodic timer fired.
    Periodic { timer: TimerId, task: PeriodicTask },
    /// A move requested by an agent has finished, successfully or not.
    MovementComplete {
        agent: AgentId,
        ticket: u64,
        end: Point3,
        arrived: bool,
    },
    /// A timed action (harvest animation, unloading) has finished.
    ActionComplete { agent: AgentId, ticket: u64 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub tick: u64,
    /// Tiebreak within a tick; lower fires first.
    pub sequence: u64,
    pub kind: ScheduledEventKind,
}

// Min-heap on (tick, sequence): reverse the ordering for BinaryHeap.
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick && self.sequence == other.sequence
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .tick
            .cmp(&self.tick)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Priority queue of scheduled events with self-re-arming periodic timers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
    next_sequence: u64,
    /// Active periodic timers and their intervals.
    timers: BTreeMap<TimerId, u64>,
    next_timer: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a one-shot event.
    pub fn schedule(&mut self, tick: u64, kind: ScheduledEventKind) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(ScheduledEvent {
            tick,
            sequence,
            kind,
        });
    }

    /// Start a timer that fires at `first_tick` and every `interval` ticks
    /// after that. An interval of zero is treated as one.
    pub fn schedule_periodic(
        &mut self,
        first_tick: u64,
        interval: u64,
        task: PeriodicTask,
    ) -> TimerId {
        let timer = TimerId(self.next_timer);
        self.next_timer += 1;
        self.timers.insert(timer, interval.max(1));
        self.schedule(first_tick, ScheduledEventKind::Periodic { timer, task });
        timer
    }

    /// Stop a periodic timer. Returns false if it was not active.
    pub fn cancel(&mut self, timer: TimerId) -> bool {
        self.timers.remove(&timer).is_some()
    }

    pub fn is_active(&self, timer: TimerId) -> bool {
        self.timers.contains_key(&timer)
    }

    /// Tick of the next live event, skipping cancelled timer firings.
    pub fn peek_tick(&mut self) -> Option<u64> {
        self.discard_cancelled();
        self.heap.peek().map(|e| e.tick)
    }

    /// Pop the next event if its tick is <= `up_to_tick`. Periodic timers
    /// are re-armed as they are popped; cancelled ones are skipped.
    pub fn pop_if_ready(&mut self, up_to_tick: u64) -> Option<ScheduledEvent> {
        self.discard_cancelled();
        if !self.heap.peek().is_some_and(|e| e.tick <= up_to_tick) {
            return None;
        }
        let event = self.heap.pop()?;
        if let ScheduledEventKind::Periodic { timer, task } = event.kind {
            if let Some(&interval) = self.timers.get(&timer) {
                self.schedule(
                    event.tick + interval,
                    ScheduledEventKind::Periodic { timer, task },
                );
            }
        }
        Some(event)
    }

    fn discard_cancelled(&mut self) {
        while let Some(ScheduledEvent {
            kind: ScheduledEventKind::Periodic { timer, .. },
            ..
        }) = self.heap.peek()
        {
            if self.timers.contains_key(timer) {
                break;
            }
            self.heap.pop();
        }
    }

    /// Number of queued events, including not-yet-skipped cancelled firings.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Narrative events (output)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimEvent {
    pub tick: u64,
    pub kind: SimEventKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SimEventKind {
    /// An agent took `amount` from a node.
    Harvested {
        agent: AgentId,
        node: NodeHandle,
        resource_type: ResourceType,
        amount: u32,
    },
    /// A node's remaining amount changed (harvest or refill).
    NodeFillChanged {
        node: NodeHandle,
        remaining: u32,
        fill_percent: f32,
    },
    NodeEmptied { node: NodeHandle },
    /// An agent unloaded at a station. `remainder` stayed in its cargo.
    DroppedOff {
        agent: AgentId,
        station: StationHandle,
        resource_type: ResourceType,
        accepted: u32,
        remainder: u32,
    },
    StationFillChanged {
        station: StationHandle,
        resource_type: ResourceType,
        fill_percent: f32,
    },
    CargoFillChanged {
        agent: AgentId,
        resource_type: ResourceType,
        current: u32,
        max: u32,
    },
    AgentStateChanged {
        agent: AgentId,
        from: AiState,
        to: AiState,
    },
    UnstuckAttempted { agent: AgentId, goal: Goal },
    Teleported {
        agent: AgentId,
        goal: Goal,
        from: Point3,
        to: Point3,
    },
    GoalBlacklisted { agent: AgentId, goal: Goal },
    CommandFinished { agent: AgentId },
}
