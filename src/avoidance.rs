//! Reactive one-step target correction against sensed obstacles.
//!
//! Both policies look only at the obstacle nearest to the robot. Inputs are
//! displacement vectors relative to the robot, on the global axes.

use crate::geometry::{nearest, nearest_except};
use bevy_math::Rot2;
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AvoidanceConfig {
    /// Projection at or above which the robot is heading straight at the
    /// obstacle and swerves instead of deflecting.
    pub hysteresis: f32,
    /// Multiple of the obstacle-aligned component removed on soft deflection.
    pub deflection_scale: f32,
    /// Hard swerve rotation in radians.
    pub swerve_angle: f32,
    /// Length of the swerve target in units of the obstacle distance.
    pub swerve_gain: f32,
    /// Extra push away from an obstacle seen at either end of the sensor array.
    pub edge_bias: f32,
}

impl Default for AvoidanceConfig {
    fn default() -> Self {
        Self {
            hysteresis: 0.8,
            deflection_scale: 1.05,
            swerve_angle: 0.6 * PI,
            swerve_gain: 4.0,
            edge_bias: 0.3,
        }
    }
}

/// Scalar projection of `target` onto `obstacle`, in units of `|obstacle|`.
pub fn projection(obstacle: Vec2, target: Vec2) -> f32 {
    let o2 = obstacle.length_squared();
    if o2 > 0.0 { obstacle.dot(target) / o2 } else { 0.0 }
}

/// Projecting policy.
///
/// Targets pointing away from the nearest obstacle pass through. A shallow
/// approach loses slightly more than its obstacle-aligned component. A head-on
/// approach is replaced by a long vector rotated by `swerve_angle` to the side
/// chosen from `last_target`, so consecutive ticks keep swerving the same way.
pub fn project_away(
    target: Vec2,
    obstacles: &[Vec2],
    last_target: Vec2,
    config: &AvoidanceConfig,
) -> Vec2 {
    let Some((_, obstacle)) = nearest(obstacles) else {
        return target;
    };
    let p = projection(obstacle, target);
    if p <= 0.0 {
        target
    } else if p < config.hysteresis {
        target - obstacle * (config.deflection_scale * p)
    } else {
        let angle = if obstacle.perp_dot(last_target) > 0.0 {
            config.swerve_angle
        } else {
            -config.swerve_angle
        };
        Rot2::radians(angle) * obstacle * config.swerve_gain
    }
}

/// Rotating policy.
///
/// Any target with a positive projection on the nearest obstacle is turned
/// perpendicular to it, on the side facing away from the second nearest one.
/// Obstacles reported at index `0` or the last index sit at the edges of the
/// sensor array, so the result is also pushed back from them.
pub fn swerve_around(target: Vec2, obstacles: &[Vec2], config: &AvoidanceConfig) -> Vec2 {
    let Some((idx, obstacle)) = nearest(obstacles) else {
        return target;
    };
    if projection(obstacle, target) <= 0.0 {
        return target;
    }
    let away = -obstacle.normalize_or_zero();
    let left = away.perp();
    let side = match nearest_except(obstacles, idx) {
        Some(second) if left.dot(second) > 0.0 => -left,
        Some(_) => left,
        None if obstacle.perp_dot(target) >= 0.0 => -left,
        None => left,
    };
    let at_edge = obstacles.len() > 1 && (idx == 0 || idx == obstacles.len() - 1);
    let bias = if at_edge { away * config.edge_bias } else { Vec2::ZERO };
    (side + bias) * target.length()
}

/// Closest point to the robot on the line best fitting `points`, or `None`
/// without points. Falls back to the mean along an axis where the fit is
/// degenerate.
pub fn frontal_projection(points: &[Vec2]) -> Option<Vec2> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f32;
    let mean = points.iter().copied().sum::<Vec2>() / n;
    let sq = points.iter().map(|p| *p * *p).sum::<Vec2>() / n;
    let xy = points.iter().map(|p| p.x * p.y).sum::<f32>() / n;
    let var = sq - mean * mean;
    let cov = xy - mean.x * mean.y;

    let solve = |num: f32, var: f32, fallback: f32| {
        let den = cov * cov + var * var;
        if den.abs() > f32::EPSILON { cov * num / den } else { fallback }
    };
    Some(Vec2::new(
        solve(mean.x * xy - sq.x * mean.y, var.x, mean.x),
        solve(mean.y * xy - sq.y * mean.x, var.y, mean.y),
    ))
}
