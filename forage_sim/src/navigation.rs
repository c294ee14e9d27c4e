// Movement capability.
//
// The harvester state machine treats movement as opaque: it asks a
// `Navigator` to move an agent from one point to another and gets back
// either a refusal or a plan (how long it takes, where the agent ends up,
// whether that is the requested destination). The sim turns an accepted plan
// into a `MovementComplete` event at `tick + duration_ticks`; an in-flight
// failure is a plan with `arrived == false`.
//
// `StraightLineNavigator` is the stock implementation: constant speed along
// the segment, spherical obstacles. A destination inside an obstacle is
// refused outright; a segment that enters an obstacle stops at its surface.
// Agents already inside an obstacle can move out of it freely.

use crate::types::{AgentId, Point3};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MovePlan {
    pub duration_ticks: u64,
    pub end: Point3,
    /// False when the move will stop short of the requested destination.
    pub arrived: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MoveRequest {
    Rejected,
    Accepted(MovePlan),
}

pub trait Navigator {
    fn request_move(&mut self, agent: AgentId, from: Point3, to: Point3) -> MoveRequest;
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub center: Point3,
    pub radius: f32,
}

impl Obstacle {
    pub fn contains(&self, p: Point3) -> bool {
        self.center.distance(p) < self.radius
    }

    /// Fraction along `from -> to` at which the segment enters this
    /// obstacle, if it does. Segments starting inside never "enter".
    fn entry_fraction(&self, from: Point3, to: Point3) -> Option<f32> {
        let d = to - from;
        let f = from - self.center;
        let a = d.dot(d);
        let c = f.dot(f) - self.radius * self.radius;
        if a <= f32::EPSILON || c <= 0.0 {
            return None;
        }
        let b = 2.0 * f.dot(d);
        let disc = b * b - 4.0 * a * c;
        if disc < 0.0 {
            return None;
        }
        let t = (-b - disc.sqrt()) / (2.0 * a);
        (0.0..=1.0).contains(&t).then_some(t)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StraightLineNavigator {
    /// Distance covered per tick.
    pub speed: f32,
    pub obstacles: Vec<Obstacle>,
}

impl StraightLineNavigator {
    pub fn new(speed: f32) -> Self {
        Self {
            speed,
            obstacles: Vec::new(),
        }
    }

    pub fn with_obstacle(mut self, center: Point3, radius: f32) -> Self {
        self.obstacles.push(Obstacle { center, radius });
        self
    }

    fn ticks_for(&self, distance: f32) -> u64 {
        if self.speed <= 0.0 {
            return 1;
        }
        ((distance / self.speed).ceil() as u64).max(1)
    }
}

impl Navigator for StraightLineNavigator {
    fn request_move(&mut self, _agent: AgentId, from: Point3, to: Point3) -> MoveRequest {
        if !from.is_finite() || !to.is_finite() || self.obstacles.iter().any(|o| o.contains(to)) {
            return MoveRequest::Rejected;
        }
        let hit = self
            .obstacles
            .iter()
            .filter_map(|o| o.entry_fraction(from, to))
            .min_by(f32::total_cmp);
        let (end, arrived) = match hit {
            Some(t) => (from + (to - from) * t, false),
            None => (to, true),
        };
        MoveRequest::Accepted(MovePlan {
            duration_ticks: self.ticks_for(from.distance(end)),
            end,
            arrived,
        })
    }
}
