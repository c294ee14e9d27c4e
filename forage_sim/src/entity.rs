// Authoritative world entities: resource nodes and drop-off stations.
//
// These are the only mutable copies of resource state. Harvesting and
// unloading always go straight to the entity here; the snapshot worker only
// ever sees value copies (see `snapshot.rs`) and never mutates anything.
//
// Both mutation APIs clamp instead of failing: `harvest` hands out at most
// what is left, `drop_off` accepts at most the room left for that resource
// type and returns the remainder the caller keeps carrying. The returned
// outcome structs carry the new fill percentage so the sim can forward it to
// presentation consumers as a `SimEvent`.
//
// Each node owns up to eight harvesting slots, fixed at construction from
// `SlotDirection::PRIORITY`. A slot is occupied by at most one agent; a node
// whose slots are all occupied drops out of query candidacy at the next
// snapshot.
//
// `EntityArena` owns storage for both kinds, keyed by generation-checked
// handles. A lookup through a handle whose entity was destroyed returns
// `None`, which every caller treats as "entity destroyed".

use crate::types::{
    MAX_SLOTS, NodeHandle, OwnerId, Point3, ResourceType, SlotDirection, StationHandle,
};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

/// Rejected slot toggles.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("direction {0:?} is not one of this node's slots")]
    UnknownDirection(SlotDirection),
    #[error("slot {0:?} is already occupied")]
    AlreadyOccupied(SlotDirection),
}

/// Current amount against a maximum. `current <= max` always holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityRecord {
    pub current: u32,
    pub max: u32,
}

impl CapacityRecord {
    pub fn new(current: u32, max: u32) -> Self {
        Self {
            current: current.min(max),
            max,
        }
    }

    pub fn room(&self) -> u32 {
        self.max - self.current
    }

    pub fn is_full(&self) -> bool {
        self.current >= self.max
    }

    /// Fill level in percent, 0.0 to 100.0. A zero-capacity record reads as
    /// full.
    pub fn fill_percent(&self) -> f32 {
        if self.max == 0 {
            100.0
        } else {
            self.current as f32 * 100.0 / self.max as f32
        }
    }

    /// Add up to `amount`, returning how much did not fit.
    pub fn fill(&mut self, amount: u32) -> u32 {
        let accepted = amount.min(self.room());
        self.current += accepted;
        amount - accepted
    }
}

// ---------------------------------------------------------------------------
// Resource nodes
// ---------------------------------------------------------------------------

/// One harvesting position around a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestSlot {
    pub direction: SlotDirection,
    pub occupied: bool,
}

/// Result of a single harvest.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HarvestOutcome {
    pub harvested: u32,
    pub remaining: u32,
    pub fill_percent: f32,
    /// True only for the harvest that took the node to zero.
    pub emptied: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceNode {
    pub position: Point3,
    pub resource_type: ResourceType,
    /// Upper bound on a single harvest, regardless of cargo room. Never zero.
    amount_per_harvest: u32,
    remaining: u32,
    /// The largest amount this node has held; the denominator of
    /// `fill_percent`.
    capacity: u32,
    slots: SmallVec<[HarvestSlot; MAX_SLOTS]>,
}

impl ResourceNode {
    /// Create a node with `slot_count` slots (clamped to 1..=8), taken from
    /// the front of the fixed priority order. A zero `amount_per_harvest`
    /// would never make progress and is raised to 1.
    pub fn new(
        position: Point3,
        resource_type: ResourceType,
        amount: u32,
        amount_per_harvest: u32,
        slot_count: usize,
    ) -> Self {
        let slot_count = slot_count.clamp(1, MAX_SLOTS);
        if amount_per_harvest == 0 {
            warn!(%position, ?resource_type, "amount_per_harvest of 0 raised to 1");
        }
        let slots = SlotDirection::PRIORITY[..slot_count]
            .iter()
            .map(|&direction| HarvestSlot {
                direction,
                occupied: false,
            })
            .collect();
        Self {
            position,
            resource_type,
            amount_per_harvest: amount_per_harvest.max(1),
            remaining: amount,
            capacity: amount,
            slots,
        }
    }

    pub fn amount_per_harvest(&self) -> u32 {
        self.amount_per_harvest
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    pub fn fill_percent(&self) -> f32 {
        if self.capacity == 0 {
            0.0
        } else {
            self.remaining as f32 * 100.0 / self.capacity as f32
        }
    }

    /// Take up to `requested` units. Never hands out more than remains.
    pub fn harvest(&mut self, requested: u32) -> HarvestOutcome {
        let harvested = requested.min(self.remaining);
        self.remaining -= harvested;
        HarvestOutcome {
            harvested,
            remaining: self.remaining,
            fill_percent: self.fill_percent(),
            emptied: harvested > 0 && self.remaining == 0,
        }
    }

    /// External refill. Raises the fill denominator if the node now holds
    /// more than it ever has.
    pub fn refill(&mut self, amount: u32) -> f32 {
        self.remaining = self.remaining.saturating_add(amount);
        self.capacity = self.capacity.max(self.remaining);
        self.fill_percent()
    }

    pub fn slots(&self) -> &[HarvestSlot] {
        &self.slots
    }

    pub fn occupied_slot_count(&self) -> usize {
        self.slots.iter().filter(|s| s.occupied).count()
    }

    pub fn is_fully_occupied(&self) -> bool {
        self.slots.iter().all(|s| s.occupied)
    }

    pub fn has_vacant_slot(&self) -> bool {
        !self.is_fully_occupied()
    }

    /// Mark the slot in `direction` occupied or vacant. Directions outside
    /// this node's slot set, and double occupation, are rejected and logged.
    pub fn register_occupied_location(
        &mut self,
        direction: SlotDirection,
        occupied: bool,
    ) -> Result<(), SlotError> {
        let Some(slot) = self.slots.iter_mut().find(|s| s.direction == direction) else {
            let err = SlotError::UnknownDirection(direction);
            warn!(?direction, slots = self.slots.len(), "slot toggle rejected: {err}");
            return Err(err);
        };
        if occupied && slot.occupied {
            let err = SlotError::AlreadyOccupied(direction);
            warn!(?direction, "slot toggle rejected: {err}");
            return Err(err);
        }
        slot.occupied = occupied;
        Ok(())
    }

    /// Occupy the first vacant slot in priority order.
    pub fn claim_vacant_slot(&mut self) -> Option<SlotDirection> {
        let slot = self.slots.iter_mut().find(|s| !s.occupied)?;
        slot.occupied = true;
        Some(slot.direction)
    }

    /// World position an agent stands at to harvest from `direction`.
    pub fn slot_position(&self, direction: SlotDirection, radius: f32) -> Point3 {
        self.position + direction.unit_offset() * radius
    }
}

// ---------------------------------------------------------------------------
// Drop-off stations
// ---------------------------------------------------------------------------

/// Result of a single unload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DropOffOutcome {
    pub accepted: u32,
    /// What the caller must keep carrying.
    pub remainder: u32,
    /// New fill level for the type, or `None` if the station does not store
    /// that type at all.
    pub fill_percent: Option<f32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DropOffStation {
    pub position: Point3,
    /// Inactive stations are never query candidates, whatever their room.
    pub active: bool,
    pub owner: OwnerId,
    capacities: BTreeMap<ResourceType, CapacityRecord>,
}

impl DropOffStation {
    /// An active station with no storage. Add storage with `with_capacity`.
    pub fn new(position: Point3, owner: OwnerId) -> Self {
        Self {
            position,
            active: true,
            owner,
            capacities: BTreeMap::new(),
        }
    }

    /// Builder: store `resource_type`, starting at `current` (clamped to
    /// `max`).
    pub fn with_capacity(mut self, resource_type: ResourceType, current: u32, max: u32) -> Self {
        self.capacities
            .insert(resource_type, CapacityRecord::new(current, max));
        self
    }

    pub fn capacity(&self, resource_type: ResourceType) -> Option<&CapacityRecord> {
        self.capacities.get(&resource_type)
    }

    pub fn capacities(&self) -> impl Iterator<Item = (ResourceType, &CapacityRecord)> {
        self.capacities.iter().map(|(&rt, rec)| (rt, rec))
    }

    /// Room left for `resource_type`; zero for unsupported types.
    pub fn room_for(&self, resource_type: ResourceType) -> u32 {
        self.capacities
            .get(&resource_type)
            .map_or(0, CapacityRecord::room)
    }

    /// Active and able to take at least one unit of `resource_type`.
    pub fn accepts(&self, resource_type: ResourceType) -> bool {
        self.active && self.room_for(resource_type) > 0
    }

    /// Unload up to `amount` of `resource_type`, clamped to the room left.
    pub fn drop_off(&mut self, resource_type: ResourceType, amount: u32) -> DropOffOutcome {
        match self.capacities.get_mut(&resource_type) {
            Some(record) => {
                let remainder = record.fill(amount);
                DropOffOutcome {
                    accepted: amount - remainder,
                    remainder,
                    fill_percent: Some(record.fill_percent()),
                }
            }
            None => DropOffOutcome {
                accepted: 0,
                remainder: amount,
                fill_percent: None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

/// Owner of every node and station. Handles stay valid until the entity is
/// removed; after that they fail lookup even if the slot is reused.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EntityArena {
    nodes: SlotMap<NodeHandle, ResourceNode>,
    stations: SlotMap<StationHandle, DropOffStation>,
}

impl EntityArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_node(&mut self, node: ResourceNode) -> NodeHandle {
        self.nodes.insert(node)
    }

    pub fn remove_node(&mut self, handle: NodeHandle) -> Option<ResourceNode> {
        self.nodes.remove(handle)
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&ResourceNode> {
        self.nodes.get(handle)
    }

    pub fn node_mut(&mut self, handle: NodeHandle) -> Option<&mut ResourceNode> {
        self.nodes.get_mut(handle)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeHandle, &ResourceNode)> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn insert_station(&mut self, station: DropOffStation) -> StationHandle {
        self.stations.insert(station)
    }

    pub fn remove_station(&mut self, handle: StationHandle) -> Option<DropOffStation> {
        self.stations.remove(handle)
    }

    pub fn station(&self, handle: StationHandle) -> Option<&DropOffStation> {
        self.stations.get(handle)
    }

    pub fn station_mut(&mut self, handle: StationHandle) -> Option<&mut DropOffStation> {
        self.stations.get_mut(handle)
    }

    pub fn stations(&self) -> impl Iterator<Item = (StationHandle, &DropOffStation)> {
        self.stations.iter()
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }
}
