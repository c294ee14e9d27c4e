// Harvester agent data.
//
// `HarvesterAgent` is the per-agent record the state machine in
// `harvester.rs` drives. It holds handles, never references: target node and
// station are generation-checked handles that may stop resolving at any
// time. Alongside the AI state it carries cargo, the slots it currently
// holds, the per-goal blacklist and teleport markers (cleared together on
// the sim's blacklist timer), the current movement leg, and two guards for
// asynchronous replies:
//
// - `pending_query`: the one query reply this agent will accept.
// - `pending_action`: the ticket of the one movement or timed action whose
//   completion this agent will accept.
//
// Anything arriving with a different id or ticket is stale and dropped.

use crate::capability::Capability;
use crate::entity::CapacityRecord;
use crate::query::QueryId;
use crate::types::{Goal, NodeHandle, OwnerId, Point3, ResourceType, SlotDirection, StationHandle};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AiState {
    Idle,
    MoveToResource,
    PlayHarvestAnimation,
    HarvestResource,
    AsyncFindDropOff,
    MoveToDropOff,
    DropOff,
    AsyncFindResource,
    UnstuckTowardsResource,
    UnstuckTowardsDropOff,
    /// Transient: always followed by `Idle` in the same step.
    FinishCommand,
}

impl AiState {
    /// Direct or unstuck movement toward a node or station.
    pub fn is_moving(self) -> bool {
        matches!(
            self,
            AiState::MoveToResource
                | AiState::MoveToDropOff
                | AiState::UnstuckTowardsResource
                | AiState::UnstuckTowardsDropOff
        )
    }

    pub fn is_unstuck(self) -> bool {
        matches!(
            self,
            AiState::UnstuckTowardsResource | AiState::UnstuckTowardsDropOff
        )
    }
}

/// Per-resource-type cargo, each type bounded by the same maximum.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CargoHold {
    max_per_type: u32,
    holds: BTreeMap<ResourceType, CapacityRecord>,
}

impl CargoHold {
    pub fn new(max_per_type: u32) -> Self {
        Self {
            max_per_type,
            holds: BTreeMap::new(),
        }
    }

    pub fn max_per_type(&self) -> u32 {
        self.max_per_type
    }

    pub fn amount(&self, resource_type: ResourceType) -> u32 {
        self.holds.get(&resource_type).map_or(0, |r| r.current)
    }

    pub fn room_for(&self, resource_type: ResourceType) -> u32 {
        self.max_per_type - self.amount(resource_type)
    }

    pub fn is_full(&self, resource_type: ResourceType) -> bool {
        self.room_for(resource_type) == 0
    }

    pub fn is_empty(&self) -> bool {
        self.holds.values().all(|r| r.current == 0)
    }

    pub fn total(&self) -> u32 {
        self.holds.values().map(|r| r.current).sum()
    }

    /// Load up to `amount`, returning what did not fit.
    pub fn load(&mut self, resource_type: ResourceType, amount: u32) -> u32 {
        let max = self.max_per_type;
        self.holds
            .entry(resource_type)
            .or_insert_with(|| CapacityRecord::new(0, max))
            .fill(amount)
    }

    /// Remove up to `amount`, returning how much was removed.
    pub fn unload(&mut self, resource_type: ResourceType, amount: u32) -> u32 {
        match self.holds.get_mut(&resource_type) {
            Some(record) => {
                let taken = amount.min(record.current);
                record.current -= taken;
                taken
            }
            None => 0,
        }
    }

    /// The type with the most cargo aboard, ties broken by type order.
    pub fn heaviest(&self) -> Option<(ResourceType, u32)> {
        self.loaded()
            .fold(None, |best: Option<(ResourceType, u32)>, (rt, amount)| match best {
                Some((_, top)) if top >= amount => best,
                _ => Some((rt, amount)),
            })
    }

    /// Every type with a non-zero amount, in type order.
    pub fn loaded(&self) -> impl Iterator<Item = (ResourceType, u32)> {
        self.holds
            .iter()
            .filter(|(_, r)| r.current > 0)
            .map(|(&rt, r)| (rt, r.current))
    }
}

/// A harvesting slot this agent holds on a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedSlot {
    pub node: NodeHandle,
    pub direction: SlotDirection,
}

/// One trip toward a node slot or station, with its escalation state.
/// `target` is resolved once when the leg starts; it stops resolving if the
/// entity is destroyed mid-trip.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub target: Capability,
    pub destination: Point3,
    /// The single unstuck maneuver allowed on this leg has been spent.
    pub unstuck_used: bool,
}

impl Leg {
    pub fn new(target: Capability, destination: Point3) -> Self {
        Self {
            target,
            destination,
            unstuck_used: false,
        }
    }

    pub fn goal(&self) -> Goal {
        self.target.goal()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HarvesterAgent {
    pub owner: OwnerId,
    pub position: Point3,
    pub state: AiState,
    pub target_node: Option<NodeHandle>,
    pub target_station: Option<StationHandle>,
    /// Resource type of the last harvest order; drives idle re-search.
    pub remembered_type: Option<ResourceType>,
    pub cargo: CargoHold,
    pub claimed_slots: SmallVec<[ClaimedSlot; 1]>,
    pub blacklist: FxHashSet<Goal>,
    pub teleports_used: FxHashSet<Goal>,
    pub leg: Option<Leg>,
    pub pending_query: Option<QueryId>,
    pub pending_action: Option<u64>,
}

impl HarvesterAgent {
    pub fn new(owner: OwnerId, position: Point3, cargo_capacity: u32) -> Self {
        Self {
            owner,
            position,
            state: AiState::Idle,
            target_node: None,
            target_station: None,
            remembered_type: None,
            cargo: CargoHold::new(cargo_capacity),
            claimed_slots: SmallVec::new(),
            blacklist: FxHashSet::default(),
            teleports_used: FxHashSet::default(),
            leg: None,
            pending_query: None,
            pending_action: None,
        }
    }

    pub fn is_blacklisted(&self, goal: Goal) -> bool {
        self.blacklist.contains(&goal)
    }

    /// End of a blacklist window: every goal becomes eligible again.
    pub fn clear_window(&mut self) {
        self.blacklist.clear();
        self.teleports_used.clear();
    }
}
