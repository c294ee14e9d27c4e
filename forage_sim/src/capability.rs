// Typed capabilities: what a registered entity can do for a harvester.
//
// Registration and targeting never ask "is this thing a resource?" at tick
// time. A caller resolves an entity to a `Capability` once, when it is
// registered or when a harvester starts a leg toward it (`Leg::target`),
// and from then on matches on a closed set of two variants. Resolution goes
// through the arena, so a capability for a destroyed entity simply stops
// resolving.

use crate::entity::{DropOffStation, EntityArena, ResourceNode};
use crate::types::{Goal, NodeHandle, OwnerId, Point3, StationHandle};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Something that can be harvested.
    Resource(NodeHandle),
    /// Something that accepts cargo, on behalf of `owner`.
    Storage {
        station: StationHandle,
        owner: OwnerId,
    },
}

impl Capability {
    /// Resolve a goal against the arena. Stations pick up their owner here.
    /// Returns `None` if the entity no longer exists.
    pub fn of_goal(goal: Goal, arena: &EntityArena) -> Option<Self> {
        match goal {
            Goal::Node(node) => arena.node(node).map(|_| Capability::Resource(node)),
            Goal::Station(station) => arena.station(station).map(|s| Capability::Storage {
                station,
                owner: s.owner,
            }),
        }
    }

    pub fn goal(self) -> Goal {
        match self {
            Capability::Resource(node) => Goal::Node(node),
            Capability::Storage { station, .. } => Goal::Station(station),
        }
    }

    pub fn resolve_node(self, arena: &EntityArena) -> Option<&ResourceNode> {
        match self {
            Capability::Resource(node) => arena.node(node),
            Capability::Storage { .. } => None,
        }
    }

    pub fn resolve_station(self, arena: &EntityArena) -> Option<&DropOffStation> {
        match self {
            Capability::Storage { station, .. } => arena.station(station),
            Capability::Resource(_) => None,
        }
    }

    pub fn is_live(self, arena: &EntityArena) -> bool {
        match self {
            Capability::Resource(node) => arena.node(node).is_some(),
            Capability::Storage { station, .. } => arena.station(station).is_some(),
        }
    }

    pub fn position(self, arena: &EntityArena) -> Option<Point3> {
        match self {
            Capability::Resource(node) => arena.node(node).map(|n| n.position),
            Capability::Storage { station, .. } => arena.station(station).map(|s| s.position),
        }
    }
}
