//! Swarm behavior strategies: each turns a snapshot of what the robot knows
//! into a raw motion target, before obstacle correction.

use crate::neighbors::AgentState;
use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Resultants shorter than this carry no usable direction.
const DEGENERATE: f32 = 1e-6;

/// What a strategy sees on one tick.
#[derive(Clone, Debug, Default)]
pub struct Perception {
    pub position: Vec2,
    pub heading: f32,
    /// Live neighbors, some possibly without a known position yet.
    pub neighbors: Vec<AgentState>,
    /// Sensed obstacles relative to the robot. Only filled for strategies
    /// that ask for them.
    pub obstacles: Vec<Vec2>,
}

impl Perception {
    /// Neighbor displacements from this robot, skipping neighbors without a position.
    pub fn offsets(&self) -> impl Iterator<Item = Vec2> + '_ {
        self.neighbors
            .iter()
            .filter_map(move |n| n.position.map(|p| p - self.position))
    }
}

/// Target correction policy a strategy is tuned for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Avoidance {
    #[default]
    Projecting,
    Rotating,
}

pub trait Strategy: Send {
    /// Raw target vector, or `None` when there is nothing to react to.
    fn compute_target(&self, perception: &Perception) -> Option<Vec2>;

    fn avoidance(&self) -> Avoidance {
        Avoidance::Projecting
    }

    /// Whether [`Perception::obstacles`] should be filled.
    fn senses_obstacles(&self) -> bool {
        false
    }
}

/// Perimeter defense: move away from neighbors, each weighted by `1/d²`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Spreading;

impl Strategy for Spreading {
    fn compute_target(&self, perception: &Perception) -> Option<Vec2> {
        repulsion(perception.offsets(), 2)
    }

    fn avoidance(&self) -> Avoidance {
        Avoidance::Rotating
    }
}

/// Align with the circular mean of neighbor headings.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct HeadingConsensus;

impl Strategy for HeadingConsensus {
    fn compute_target(&self, perception: &Perception) -> Option<Vec2> {
        let resultant: Vec2 = perception
            .neighbors
            .iter()
            .map(|n| Vec2::from_angle(n.heading))
            .sum();
        (resultant.length() > DEGENERATE).then(|| resultant.normalize())
    }
}

/// Spreading with a steeper `1/d³` falloff that also repels from sensed obstacles.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct AreaCoverage;

impl Strategy for AreaCoverage {
    fn compute_target(&self, perception: &Perception) -> Option<Vec2> {
        let points = perception
            .offsets()
            .chain(perception.obstacles.iter().copied());
        repulsion(points, 3)
    }

    fn senses_obstacles(&self) -> bool {
        true
    }
}

/// Flocking: spread from neighbors, match their heading, stay with the group.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Marching {
    /// Length scale of the spread term.
    pub radius: f32,
    pub w_spread: f32,
    pub w_heading: f32,
    pub w_group: f32,
}

impl Default for Marching {
    fn default() -> Self {
        Self {
            radius: 0.35,
            w_spread: 2.0,
            w_heading: 1.0,
            w_group: 0.2,
        }
    }
}

impl Strategy for Marching {
    fn compute_target(&self, perception: &Perception) -> Option<Vec2> {
        let placed: Vec<(Vec2, f32)> = perception
            .neighbors
            .iter()
            .filter_map(|n| n.position.map(|p| (p - perception.position, n.heading)))
            .collect();
        if placed.is_empty() {
            return None;
        }
        let n = placed.len() as f32;
        let mut spread = Vec2::ZERO;
        let mut heading = Vec2::ZERO;
        let mut offset_sum = Vec2::ZERO;
        let mut d2_sum = 0.0;
        for (d, h) in &placed {
            let d2 = d.length_squared();
            if d2 > 0.0 {
                spread -= *d * (self.radius / d2);
            }
            heading += Vec2::from_angle(*h);
            offset_sum += *d;
            d2_sum += d2;
        }
        heading /= n;

        // The group term needs two neighbors for a meaningful spread.
        let mut group = Vec2::ZERO;
        if placed.len() > 1 {
            let mean = offset_sum / n;
            let sigma = (d2_sum / n - mean.length_squared()).max(0.0).sqrt();
            if sigma > DEGENERATE {
                group = offset_sum / sigma;
            }
        }
        Some(self.w_spread * spread + self.w_heading * heading + self.w_group * group)
    }
}

/// `-Σ d / |d|^power` over the non-zero offsets `d`, or `None` without any offsets.
fn repulsion(offsets: impl Iterator<Item = Vec2>, power: i32) -> Option<Vec2> {
    let mut seen = false;
    let mut target = Vec2::ZERO;
    for d in offsets {
        seen = true;
        let len = d.length();
        if len > 0.0 {
            target -= d / len.powi(power);
        }
    }
    seen.then_some(target)
}
