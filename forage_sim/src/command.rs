// Commands that mutate simulation state.
//
// Outside code changes the sim either through the direct methods on
// `ForageSim` or by passing `SimCommand`s to `ForageSim::step()`, which
// applies them in tick order interleaved with scheduled events. Commands are
// the scriptable form: a headless run or a test can lay out a whole timeline
// up front.
//
// Current actions:
// - `AssignHarvestTarget`, `ReturnCargo`, `TerminateCommand`: the agent
//   control surface.
// - `SpawnHarvester`, `SpawnResourceNode`, `SpawnDropOffStation`: world
//   setup. Nodes and stations are registered with the resource registry on
//   spawn.
// - `DestroyResourceNode`, `DestroyDropOffStation`: unregister and remove.
//   Agents holding handles to them find out lazily.
// - `SetStationActive`: inactive stations stop being query candidates.
// - `RefillResourceNode`: the external refill path for nodes.
//
// See also: `sim.rs` for `apply_command()`.

use crate::types::{AgentId, NodeHandle, OwnerId, Point3, ResourceType, StationHandle};
use serde::{Deserialize, Serialize};

/// A command applied at a specific simulation tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimCommand {
    pub tick: u64,
    pub action: SimAction,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SimAction {
    AssignHarvestTarget {
        agent: AgentId,
        node: NodeHandle,
    },
    ReturnCargo {
        agent: AgentId,
    },
    TerminateCommand {
        agent: AgentId,
    },
    SpawnHarvester {
        owner: OwnerId,
        position: Point3,
    },
    SpawnResourceNode {
        position: Point3,
        resource_type: ResourceType,
        amount: u32,
        amount_per_harvest: u32,
    },
    SpawnDropOffStation {
        position: Point3,
        owner: OwnerId,
        /// `(type, max capacity)` pairs; stations start empty.
        capacities: Vec<(ResourceType, u32)>,
    },
    DestroyResourceNode {
        node: NodeHandle,
    },
    DestroyDropOffStation {
        station: StationHandle,
    },
    SetStationActive {
        station: StationHandle,
        active: bool,
    },
    RefillResourceNode {
        node: NodeHandle,
        amount: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_serialization_roundtrip() {
        let cmd = SimCommand {
            tick: 12,
            action: SimAction::SpawnDropOffStation {
                position: Point3::new(1.0, 0.0, -4.0),
                owner: OwnerId(0),
                capacities: vec![(ResourceType::Wood, 200), (ResourceType::Food, 50)],
            },
        };
        let json = serde_json::to_string(&cmd).unwrap();
        let restored: SimCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(cmd, restored);
    }
}
