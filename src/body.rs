//! The physical body contract and a simulated differential-drive body.

use crate::error::BodyError;
use crate::grid::ObstacleGrid;
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Locomotion and sensing capability of one robot.
///
/// Obstacle coordinates are displacement vectors from the robot to each
/// obstacle, expressed along the global axes. The optional capabilities
/// (`align`, `stop`, power control, beacon sensing) have defaults that report
/// "not supported" or do the obvious fallback.
pub trait Body: Send + 'static {
    fn position(&self) -> Vec2;

    /// Heading in radians from the global x axis.
    fn heading(&self) -> f32;

    /// Drives straight for `duration` seconds. `None` means the body's own
    /// cruising speed.
    fn move_forward(&mut self, duration: f64, speed: Option<f32>);

    /// Turns in place by `dtheta` radians. Returns the seconds it took.
    fn rotate(&mut self, dtheta: f32) -> f64;

    fn obstacle_coordinates(&self) -> Vec<Vec2>;

    /// An obstacle is close enough that moving on would collide.
    fn obstacle_in_front(&self) -> bool;

    /// An obstacle is close enough to plan around.
    fn obstacle_near(&self) -> bool;

    fn max_speed(&self) -> f32;

    /// Sensed obstacles in absolute coordinates.
    fn obstacle_global_coordinates(&self) -> Vec<Vec2> {
        let origin = self.position();
        self.obstacle_coordinates()
            .into_iter()
            .map(|o| o + origin)
            .collect()
    }

    /// Native alignment toward `direction`. Returns the applied rotation, or
    /// `None` when the body has no such primitive.
    fn align(&mut self, _direction: Vec2) -> Option<f32> {
        None
    }

    fn stop(&mut self) {
        self.move_forward(0.0, Some(0.0));
    }

    fn turn_on(&mut self) -> Result<(), BodyError> {
        Ok(())
    }

    fn turn_off(&mut self) -> Result<(), BodyError> {
        Ok(())
    }

    /// A beacon is visible from the current pose.
    fn light_detected(&mut self) -> bool {
        false
    }
}

/// Physical parameters of a [`SimBody`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimBodyConfig {
    /// Top linear speed in m/s; faster requests are clamped.
    pub max_speed: f32,

    /// Distance between the wheels, which sets how long a turn in place takes.
    pub wheel_base: f32,

    /// Obstacles farther than this are not reported by `obstacle_coordinates`.
    pub sensing_radius: f32,

    /// Below this range an obstacle counts as "in front" (hard stop).
    pub in_front_distance: f32,

    /// Below this range an obstacle counts as "near" (avoidance).
    pub near_distance: f32,

    /// A beacon within this range is detected.
    pub beacon_radius: f32,
}

impl Default for SimBodyConfig {
    fn default() -> Self {
        Self {
            max_speed: 0.15,
            wheel_base: 0.1,
            sensing_radius: 1.4,
            in_front_distance: 0.02,
            near_distance: 0.30,
            beacon_radius: 0.5,
        }
    }
}

/// Kinematic body: moving updates the pose directly, sensing reads an
/// [`ObstacleGrid`] shared by every simulated robot.
#[derive(Clone, Debug)]
pub struct SimBody {
    position: Vec2,
    heading: f32,
    config: SimBodyConfig,
    obstacles: Option<Arc<ObstacleGrid>>,
    beacons: Vec<Vec2>,
}

impl SimBody {
    pub fn new(position: Vec2, heading: f32) -> Self {
        Self {
            position,
            heading,
            config: SimBodyConfig::default(),
            obstacles: None,
            beacons: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: SimBodyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_obstacles(mut self, grid: Arc<ObstacleGrid>) -> Self {
        self.obstacles = Some(grid);
        self
    }

    pub fn with_beacons(mut self, beacons: Vec<Vec2>) -> Self {
        self.beacons = beacons;
        self
    }

    pub fn config(&self) -> &SimBodyConfig {
        &self.config
    }

    /// Unit vector along the current heading.
    pub fn forward(&self) -> Vec2 {
        Vec2::from_angle(self.heading)
    }

    /// Drives with linear speed `v` and angular speed `omega` for `dt`
    /// seconds, splitting the turn around the straight segment.
    pub fn drive(&mut self, dt: f64, v: f32, omega: f32) {
        let half_turn = 0.5 * omega * dt as f32;
        self.rotate(half_turn);
        self.move_forward(dt, Some(v));
        self.rotate(half_turn);
    }

    /// Distances to every obstacle in the grid cell under the robot.
    fn ranges(&self) -> Vec<f32> {
        self.cell_obstacles()
            .into_iter()
            .map(|o| o.distance(self.position))
            .collect()
    }

    fn cell_obstacles(&self) -> Vec<Vec2> {
        let Some(grid) = &self.obstacles else {
            return Vec::new();
        };
        grid.query(self.position).unwrap_or_else(|e| {
            warn!(error = %e, "obstacle grid unavailable, sensing nothing");
            Vec::new()
        })
    }

    fn any_within(&self, range: f32) -> bool {
        self.ranges().into_iter().any(|d| d > 0.0 && d < range)
    }
}

impl Body for SimBody {
    fn position(&self) -> Vec2 {
        self.position
    }

    fn heading(&self) -> f32 {
        self.heading
    }

    fn move_forward(&mut self, duration: f64, speed: Option<f32>) {
        let v = speed.map_or(self.config.max_speed, |v| v.min(self.config.max_speed));
        self.position += self.forward() * v * duration as f32;
    }

    fn rotate(&mut self, dtheta: f32) -> f64 {
        self.heading += dtheta;
        f64::from(self.config.wheel_base * dtheta.abs() / (2.0 * self.config.max_speed))
    }

    fn obstacle_coordinates(&self) -> Vec<Vec2> {
        let r2 = self.config.sensing_radius * self.config.sensing_radius;
        self.cell_obstacles()
            .into_iter()
            .map(|o| o - self.position)
            .filter(|rel| rel.length_squared() < r2)
            .collect()
    }

    fn obstacle_in_front(&self) -> bool {
        self.any_within(self.config.in_front_distance)
    }

    fn obstacle_near(&self) -> bool {
        self.any_within(self.config.near_distance)
    }

    fn max_speed(&self) -> f32 {
        self.config.max_speed
    }

    fn light_detected(&mut self) -> bool {
        let r = self.config.beacon_radius;
        self.beacons
            .iter()
            .any(|b| b.distance(self.position) < r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn kinematics_clamp_speed() {
        let mut body = SimBody::new(Vec2::ZERO, 0.0);
        body.move_forward(2.0, Some(1.0));
        assert!((body.position() - Vec2::new(0.3, 0.0)).length() < 1e-6);
        let t = body.rotate(FRAC_PI_2);
        assert!((t - f64::from(0.1 * FRAC_PI_2 / 0.3)).abs() < 1e-6);
        body.move_forward(1.0, None);
        assert!((body.position() - Vec2::new(0.3, 0.15)).length() < 1e-5);
    }

    #[test]
    fn senses_grid_obstacles() {
        let wall: Vec<Vec2> = (0..=40).map(|i| Vec2::new(i as f32 * 0.1, 2.0)).collect();
        let mut points = wall.clone();
        points.push(Vec2::new(0.0, 0.0));
        points.push(Vec2::new(4.0, 4.0));
        let grid = Arc::new(ObstacleGrid::build(points, 0.5, None).unwrap());

        let far = SimBody::new(Vec2::new(2.0, 0.5), 0.0).with_obstacles(Arc::clone(&grid));
        assert!(!far.obstacle_near());

        let close = SimBody::new(Vec2::new(2.0, 1.8), 0.0).with_obstacles(grid);
        assert!(close.obstacle_near());
        assert!(!close.obstacle_in_front());
        let rel = close.obstacle_coordinates();
        assert!(!rel.is_empty());
        assert!(rel.iter().all(|o| o.length() < 1.4));
        let global = close.obstacle_global_coordinates();
        assert!(global.iter().all(|g| (g.y - 2.0).abs() < 1e-5));
    }

    #[test]
    fn beacon_in_range() {
        let mut body = SimBody::new(Vec2::ZERO, 0.0).with_beacons(vec![Vec2::new(1.0, 0.0)]);
        assert!(!body.light_detected());
        body.move_forward(4.0, None);
        assert!(body.light_detected());
    }
}
