//! Small planar helpers shared by the grid, avoidance and behaviors.

use glam::Vec2;
use std::f32::consts::{PI, TAU};

/// Wraps an angle into `[-π, π]`.
pub fn wrap_angle(theta: f32) -> f32 {
    let mut t = theta % TAU;
    if t > PI {
        t -= TAU;
    } else if t < -PI {
        t += TAU;
    }
    t
}

/// Returns the index and value of the point closest to the origin.
pub fn nearest(points: &[Vec2]) -> Option<(usize, Vec2)> {
    points
        .iter()
        .copied()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.length_squared().total_cmp(&b.length_squared()))
}

/// Returns the second closest point to the origin, skipping index `skip`.
pub fn nearest_except(points: &[Vec2], skip: usize) -> Option<Vec2> {
    points
        .iter()
        .copied()
        .enumerate()
        .filter(|(i, _)| *i != skip)
        .min_by(|(_, a), (_, b)| a.length_squared().total_cmp(&b.length_squared()))
        .map(|(_, p)| p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_into_half_turn() {
        assert!((wrap_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-5);
        assert!((wrap_angle(-3.0 * PI / 2.0) - PI / 2.0).abs() < 1e-5);
        assert!((wrap_angle(0.3) - 0.3).abs() < 1e-6);
        assert!((wrap_angle(5.0 * TAU + 0.1) - 0.1).abs() < 1e-4);
    }

    #[test]
    fn nearest_picks_smallest_norm() {
        let pts = [Vec2::new(2.0, 0.0), Vec2::new(0.0, -0.5), Vec2::new(1.0, 1.0)];
        assert_eq!(nearest(&pts), Some((1, Vec2::new(0.0, -0.5))));
        assert_eq!(nearest_except(&pts, 1), Some(Vec2::new(1.0, 1.0)));
        assert_eq!(nearest(&[]), None);
    }
}
