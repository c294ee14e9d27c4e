// Core types shared across the forage simulation.
//
// Defines the spatial point type (`Point3`), resource and owner tags, the
// eight compass directions used for harvesting slots, and the generation-
// checked entity handles. Handles come from `slotmap`: each is an index plus
// a generation counter, so a handle to a destroyed entity fails lookup
// instead of aliasing whatever reused the slot. A failed lookup is treated
// exactly like "entity destroyed" everywhere in the crate.
//
// See also: `entity.rs` for the arena that owns nodes and stations,
// `agent.rs` for the harvester record keyed by `AgentId`.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;
use std::ops::{Add, Mul, Sub};

// ---------------------------------------------------------------------------
// Spatial types
// ---------------------------------------------------------------------------

/// A position in world space.
///
/// Same axis conventions as the rest of the map code:
/// - X: east  (positive) / west  (negative)
/// - Y: up    (positive) / down  (negative)
/// - Z: south (positive) / north (negative)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub const ORIGIN: Point3 = Point3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Euclidean distance between two points.
    pub fn distance(self, other: Self) -> f32 {
        (other - self).length()
    }

    pub fn midpoint(self, other: Self) -> Self {
        (self + other) * 0.5
    }

    /// Move up to `step` units toward `goal`. Never overshoots: if the goal
    /// is closer than `step`, returns the goal itself.
    pub fn step_toward(self, goal: Self, step: f32) -> Self {
        let delta = goal - self;
        let dist = delta.length();
        if dist <= step || dist <= f32::EPSILON {
            goal
        } else {
            self + delta * (step / dist)
        }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Point3 {
    type Output = Point3;
    fn add(self, rhs: Point3) -> Point3 {
        Point3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point3 {
    type Output = Point3;
    fn sub(self, rhs: Point3) -> Point3 {
        Point3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Point3 {
    type Output = Point3;
    fn mul(self, rhs: f32) -> Point3 {
        Point3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl fmt::Display for Point3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Kinds of harvestable resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Wood,
    Stone,
    Metal,
    Food,
}

impl ResourceType {
    pub const ALL: [ResourceType; 4] = [
        ResourceType::Wood,
        ResourceType::Stone,
        ResourceType::Metal,
        ResourceType::Food,
    ];
}

/// Owning player tag for drop-off stations and harvesters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub u32);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Owner({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Harvesting slot directions
// ---------------------------------------------------------------------------

/// Maximum number of harvesting slots around a resource node.
pub const MAX_SLOTS: usize = 8;

/// One of the eight compass positions around a resource node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SlotDirection {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl SlotDirection {
    /// Order in which slots are handed out. Opposite pairs come first, then
    /// the diagonals, so the first few harvesters on a node spread around it
    /// instead of bunching on one side.
    pub const PRIORITY: [SlotDirection; MAX_SLOTS] = [
        SlotDirection::North,
        SlotDirection::South,
        SlotDirection::East,
        SlotDirection::West,
        SlotDirection::NorthEast,
        SlotDirection::SouthWest,
        SlotDirection::NorthWest,
        SlotDirection::SouthEast,
    ];

    /// Unit vector in the horizontal plane pointing from the node toward
    /// this slot.
    pub fn unit_offset(self) -> Point3 {
        let d = std::f32::consts::FRAC_1_SQRT_2;
        match self {
            SlotDirection::North => Point3::new(0.0, 0.0, -1.0),
            SlotDirection::NorthEast => Point3::new(d, 0.0, -d),
            SlotDirection::East => Point3::new(1.0, 0.0, 0.0),
            SlotDirection::SouthEast => Point3::new(d, 0.0, d),
            SlotDirection::South => Point3::new(0.0, 0.0, 1.0),
            SlotDirection::SouthWest => Point3::new(-d, 0.0, d),
            SlotDirection::West => Point3::new(-1.0, 0.0, 0.0),
            SlotDirection::NorthWest => Point3::new(-d, 0.0, -d),
        }
    }
}

// ---------------------------------------------------------------------------
// Generation-checked handles
// ---------------------------------------------------------------------------

new_key_type! {
    /// Handle to a resource node in the `EntityArena`.
    pub struct NodeHandle;

    /// Handle to a drop-off station in the `EntityArena`.
    pub struct StationHandle;

    /// Handle to a harvester agent owned by the sim.
    pub struct AgentId;
}

/// Something an agent walks to: a resource node or a drop-off station.
/// Blacklists and teleport markers are keyed by goal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Goal {
    Node(NodeHandle),
    Station(StationHandle),
}
