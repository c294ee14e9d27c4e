// Value-copy snapshots of authoritative entity state.
//
// The registry builds these on its snapshot timers and publishes them to the
// worker thread. A row holds only what ranking needs: handle, position, type,
// remaining/room, occupancy, active flag and owner. Rows are plain data with
// no references back into the arena, so the worker can rank against them
// without touching anything the main thread mutates. They may be a few ticks
// stale by the time a query reads them; consumers re-validate against the
// arena before acting.

use crate::entity::{DropOffStation, ResourceNode};
use crate::types::{NodeHandle, OwnerId, Point3, ResourceType, StationHandle};
use smallvec::SmallVec;

#[derive(Clone, Debug, PartialEq)]
pub struct NodeSnapshot {
    pub handle: NodeHandle,
    pub position: Point3,
    pub resource_type: ResourceType,
    pub remaining: u32,
    pub fully_occupied: bool,
}

impl NodeSnapshot {
    pub fn capture(handle: NodeHandle, node: &ResourceNode) -> Self {
        Self {
            handle,
            position: node.position,
            resource_type: node.resource_type,
            remaining: node.remaining(),
            fully_occupied: node.is_fully_occupied(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StationSnapshot {
    pub handle: StationHandle,
    pub position: Point3,
    pub active: bool,
    pub owner: OwnerId,
    /// Room left per stored resource type.
    pub room: SmallVec<[(ResourceType, u32); 4]>,
}

impl StationSnapshot {
    pub fn capture(handle: StationHandle, station: &DropOffStation) -> Self {
        Self {
            handle,
            position: station.position,
            active: station.active,
            owner: station.owner,
            room: station
                .capacities()
                .map(|(rt, record)| (rt, record.room()))
                .collect(),
        }
    }

    /// Room for `resource_type`; zero if the station does not store it.
    pub fn room_for(&self, resource_type: ResourceType) -> u32 {
        self.room
            .iter()
            .find(|(rt, _)| *rt == resource_type)
            .map_or(0, |&(_, room)| room)
    }
}

/// One published snapshot: every row of one kind as of `tick`.
#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotSet<T> {
    pub tick: u64,
    pub rows: Vec<T>,
}

impl<T> Default for SnapshotSet<T> {
    fn default() -> Self {
        Self {
            tick: 0,
            rows: Vec::new(),
        }
    }
}

/// What travels down the publish channel. Node and station snapshots run
/// on independent cadences, so each kind is published separately.
#[derive(Clone, Debug)]
pub enum SnapshotUpdate {
    Resources(SnapshotSet<NodeSnapshot>),
    DropOffs(SnapshotSet<StationSnapshot>),
}
