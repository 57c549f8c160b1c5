//! Robot control core: ties one [`Body`] to one [`Network`].
//!
//! The robot owns the on/off lifecycle, the kinematic primitives with their
//! safety override, obstacle-aware target correction and the broadcast helpers.
//! Behaviors sit on top of it (see [`crate::swarm`]).

use crate::avoidance::{AvoidanceConfig, frontal_projection, project_away, swerve_around};
use crate::body::Body;
use crate::clock::Clock;
use crate::command::Command;
use crate::error::RobotError;
use crate::geometry::wrap_angle;
use crate::message::Message;
use crate::neighbors::AgentState;
use crate::network::Network;
use crate::worker::BackgroundLoop;
use glam::Vec2;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Target of the pose and wall events emitted by the telemetry reporter.
pub const TELEMETRY_TARGET: &str = "swarm_robot::telemetry";

const TELEMETRY_SLICE: f64 = 0.1;

/// Control thresholds and timing for a [`Robot`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RobotConfig {
    /// Minimum target magnitude worth moving for.
    pub threshold: f32,
    /// Default arrival tolerance for [`Robot::go_to`].
    pub goto_tolerance: f32,
    /// Default time limit for [`Robot::go_to`], in seconds.
    pub goto_max_time: f64,
    /// Pause between `go_to` steps.
    pub goto_step_pause: f64,
    /// Sensed obstacles closer than this to a known agent are that agent, not a wall.
    pub wall_clearance: f32,
    pub telemetry_join_timeout: Duration,
    pub avoidance: AvoidanceConfig,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            goto_tolerance: 0.8,
            goto_max_time: 120.0,
            goto_step_pause: 0.1,
            wall_clearance: 0.25,
            telemetry_join_timeout: Duration::from_secs(10),
            avoidance: AvoidanceConfig::default(),
        }
    }
}

/// Mutable control state.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    pub is_on: bool,
    pub is_broadcasting: bool,
    /// Last corrected target, kept for swerve hysteresis.
    pub last_target: Vec2,
    pub threshold: f32,
}

struct Telemetry {
    running: Arc<AtomicBool>,
    worker: BackgroundLoop,
}

/// One swarm member: a [`Body`] to drive and a [`Network`] to talk over.
///
/// Kinematic and broadcast calls are no-ops while the robot is off.
pub struct Robot<B: Body, N: Network> {
    body: Arc<Mutex<B>>,
    network: Arc<N>,
    clock: Arc<dyn Clock>,
    config: RobotConfig,
    state: RobotState,
    telemetry: Option<Telemetry>,
}

impl<B: Body, N: Network> Robot<B, N> {
    /// Builds an idle robot. Nothing is powered or opened until [`turn_on`](Self::turn_on).
    pub fn new(body: B, network: N, clock: Arc<dyn Clock>, config: RobotConfig) -> Self {
        let state = RobotState {
            is_on: false,
            is_broadcasting: false,
            last_target: Vec2::ZERO,
            threshold: config.threshold,
        };
        Self {
            body: Arc::new(Mutex::new(body)),
            network: Arc::new(network),
            clock,
            config,
            state,
            telemetry: None,
        }
    }

    pub fn id(&self) -> &str {
        self.network.id()
    }

    pub fn state(&self) -> RobotState {
        self.state
    }

    pub fn config(&self) -> &RobotConfig {
        &self.config
    }

    pub fn body(&self) -> &Arc<Mutex<B>> {
        &self.body
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn is_working(&self) -> bool {
        self.state.is_on
    }

    pub fn position(&self) -> Vec2 {
        self.body.lock().position()
    }

    pub fn heading(&self) -> f32 {
        self.body.lock().heading()
    }

    /// Live neighbor states.
    pub fn agents(&self) -> Vec<AgentState> {
        self.network.agents_state()
    }

    // Lifecycle

    /// Powers the body and starts broadcasting. No-op when already on.
    pub fn turn_on(&mut self) -> Result<(), RobotError> {
        if self.state.is_on {
            return Ok(());
        }
        self.body.lock().turn_on()?;
        if let Err(e) = self.network.start_broadcasting() {
            self.body.lock().turn_off()?;
            return Err(e.into());
        }
        self.state.is_on = true;
        self.state.is_broadcasting = true;
        info!(id = self.id(), "robot on");
        Ok(())
    }

    /// Stops telemetry and broadcasting, then powers the body down. Fails if a
    /// background loop cannot be joined in time. No-op when already off.
    pub fn turn_off(&mut self) -> Result<(), RobotError> {
        if !self.state.is_on {
            return Ok(());
        }
        self.stop_telemetry()?;
        let unsent = self.network.stop_broadcasting()?;
        self.state.is_broadcasting = false;
        self.body.lock().turn_off()?;
        self.state.is_on = false;
        info!(id = self.id(), unsent, "robot off");
        Ok(())
    }

    // Kinematics

    /// Moves forward unless something is in front, in which case the speed
    /// is forced to zero whatever was asked for. Ignored while off.
    pub fn move_forward(&mut self, duration: f64, speed: Option<f32>) {
        if !self.state.is_on {
            return;
        }
        let mut body = self.body.lock();
        let speed = if body.obstacle_in_front() {
            debug!(id = self.network.id(), "obstacle in front, holding position");
            Some(0.0)
        } else {
            speed
        };
        body.move_forward(duration, speed);
    }

    pub fn stop(&mut self) {
        self.body.lock().stop();
    }

    /// Turns in place. Returns the seconds taken, zero while off.
    pub fn rotate(&mut self, dtheta: f32) -> f64 {
        if !self.state.is_on {
            return 0.0;
        }
        self.body.lock().rotate(dtheta)
    }

    /// Points the robot along `direction` using the shortest turn. Returns the
    /// applied rotation.
    pub fn align(&mut self, direction: Vec2) -> f32 {
        let (native, heading) = {
            let mut body = self.body.lock();
            (body.align(direction), body.heading())
        };
        if let Some(dtheta) = native {
            return dtheta;
        }
        let dtheta = wrap_angle(direction.to_angle() - heading);
        self.rotate(dtheta);
        dtheta
    }

    /// Drives in a straight line toward `target`, correcting for obstacles each
    /// step. Blocks until within `tolerance` or until `max_time` seconds have
    /// passed. Returns whether the target was reached.
    pub fn go_to(&mut self, target: Vec2, tolerance: f32, max_time: f64) -> bool {
        let deadline = self.clock.now() + max_time;
        let speed = self.body.lock().max_speed();
        while self.clock.now() < deadline {
            let delta = target - self.position();
            let distance = delta.length();
            if distance <= tolerance {
                self.stop();
                debug!(id = self.id(), x = target.x, y = target.y, "target reached");
                return true;
            }
            let heading_to = self.correct_target(delta);
            self.align(heading_to);
            self.move_forward(f64::from(distance / speed), Some(speed));
            self.clock.sleep(self.config.goto_step_pause);
        }
        false
    }

    /// [`go_to`](Self::go_to) each point in turn. Returns how many were reached.
    pub fn follow_path(
        &mut self,
        targets: impl IntoIterator<Item = Vec2>,
        tolerance: f32,
        max_time_per_target: f64,
    ) -> usize {
        targets
            .into_iter()
            .filter(|t| self.go_to(*t, tolerance, max_time_per_target))
            .count()
    }

    // Communication

    /// Broadcasts position and heading. `None` while off.
    pub fn broadcast_state(&self) -> Option<Message> {
        if !self.state.is_on {
            return None;
        }
        let (position, heading) = self.pose();
        Some(self.network.send_state(position, heading))
    }

    /// Broadcasts the state together with sensed obstacles, or only the state
    /// when nothing is sensed.
    pub fn broadcast_state_obstacles(&self) -> Option<Message> {
        if !self.state.is_on {
            return None;
        }
        let (position, heading, obstacles) = {
            let body = self.body.lock();
            (body.position(), body.heading(), body.obstacle_global_coordinates())
        };
        Some(if obstacles.is_empty() {
            self.network.send_state(position, heading)
        } else {
            self.network.send_state_obstacles(position, heading, obstacles)
        })
    }

    /// Broadcasts sensed obstacles, if any.
    pub fn broadcast_obstacles(&self) -> Option<Message> {
        if !self.state.is_on {
            return None;
        }
        let obstacles = self.body.lock().obstacle_global_coordinates();
        (!obstacles.is_empty()).then(|| self.network.send_obstacles(obstacles))
    }

    /// Asks every agent to go to `target`.
    pub fn broadcast_goto(&self, target: Vec2) -> Option<Message> {
        self.broadcast_command(Command::Goto(target))
    }

    /// Calls every agent to this robot's position.
    pub fn broadcast_rendezvous(&self) -> Option<Message> {
        self.broadcast_goto(self.position())
    }

    /// Reports a beacon sighting at `at`.
    pub fn broadcast_light(&self, at: Vec2) -> Option<Message> {
        self.broadcast_command(Command::Light(at))
    }

    pub fn broadcast_command(&self, command: Command) -> Option<Message> {
        if !self.state.is_on {
            return None;
        }
        Some(self.network.send_message(command.to_string()))
    }

    // Obstacles

    pub fn obstacle_in_front(&self) -> bool {
        self.body.lock().obstacle_in_front()
    }

    pub fn obstacle_near(&self) -> bool {
        self.body.lock().obstacle_near()
    }

    pub fn light_detected(&self) -> bool {
        self.body.lock().light_detected()
    }

    /// Sensed obstacles relative to the robot.
    pub fn obstacle_coordinates(&self) -> Vec<Vec2> {
        self.body.lock().obstacle_coordinates()
    }

    /// Closest point of the wall formed by `points`, assuming they lie on a line.
    pub fn frontal_obstacle_coordinates(&self, points: &[Vec2]) -> Option<Vec2> {
        frontal_projection(points)
    }

    /// Corrects `target` with the projecting policy when an obstacle is near.
    /// The result is remembered for the next call's swerve decision.
    pub fn correct_target(&mut self, target: Vec2) -> Vec2 {
        let corrected = match self.near_obstacles() {
            Some(obstacles) => project_away(
                target,
                &obstacles,
                self.state.last_target,
                &self.config.avoidance,
            ),
            None => target,
        };
        self.state.last_target = corrected;
        corrected
    }

    /// Corrects `target` with the rotating policy when an obstacle is near.
    pub fn correct_target_rotating(&mut self, target: Vec2) -> Vec2 {
        let corrected = match self.near_obstacles() {
            Some(obstacles) => swerve_around(target, &obstacles, &self.config.avoidance),
            None => target,
        };
        self.state.last_target = corrected;
        corrected
    }

    fn near_obstacles(&self) -> Option<Vec<Vec2>> {
        let body = self.body.lock();
        body.obstacle_near().then(|| body.obstacle_coordinates())
    }

    fn pose(&self) -> (Vec2, f32) {
        let body = self.body.lock();
        (body.position(), body.heading())
    }

    // Telemetry

    /// Starts logging the pose and sensed walls every `interval` seconds on
    /// [`TELEMETRY_TARGET`]. No-op when already running.
    pub fn start_telemetry(&mut self, interval: f64) -> Result<(), RobotError> {
        if self.telemetry.is_some() {
            return Ok(());
        }
        let running = Arc::new(AtomicBool::new(true));
        let reporter = TelemetryReporter {
            running: Arc::clone(&running),
            body: Arc::clone(&self.body),
            network: Arc::clone(&self.network),
            clock: Arc::clone(&self.clock),
            interval,
            clearance: self.config.wall_clearance,
        };
        let worker = BackgroundLoop::spawn(format!("telemetry-{}", self.id()), move || {
            reporter.run()
        })
        .map_err(RobotError::Spawn)?;
        self.telemetry = Some(Telemetry { running, worker });
        Ok(())
    }

    /// Stops the telemetry reporter with a bounded join.
    pub fn stop_telemetry(&mut self) -> Result<(), RobotError> {
        if let Some(Telemetry { running, worker }) = self.telemetry.take() {
            running.store(false, Ordering::Release);
            worker.join_within(self.config.telemetry_join_timeout)?;
        }
        Ok(())
    }
}

impl<B: Body, N: Network> Drop for Robot<B, N> {
    fn drop(&mut self) {
        if let Err(e) = self.turn_off() {
            tracing::error!(id = self.id(), error = %e, "robot dropped without a clean shutdown");
        }
    }
}

struct TelemetryReporter<B, N> {
    running: Arc<AtomicBool>,
    body: Arc<Mutex<B>>,
    network: Arc<N>,
    clock: Arc<dyn Clock>,
    interval: f64,
    clearance: f32,
}

impl<B: Body, N: Network> TelemetryReporter<B, N> {
    fn run(&self) {
        let mut tick: u64 = 0;
        while self.running.load(Ordering::Acquire) {
            let (position, heading, sensed) = {
                let body = self.body.lock();
                (body.position(), body.heading(), body.obstacle_coordinates())
            };
            let agents: Vec<Vec2> = self
                .network
                .agents_state()
                .into_iter()
                .filter_map(|a| a.position)
                .collect();
            info!(target: TELEMETRY_TARGET, tick, x = position.x, y = position.y, heading, "#pose");
            for wall in walls(&sensed, position, &agents, self.clearance) {
                info!(
                    target: TELEMETRY_TARGET,
                    tick,
                    x = wall.x,
                    y = wall.y,
                    distance = wall.distance(position),
                    "#wall"
                );
            }
            self.pause();
            tick += 1;
        }
    }

    fn pause(&self) {
        let deadline = self.clock.now() + self.interval;
        while self.running.load(Ordering::Acquire) {
            let remaining = deadline - self.clock.now();
            if remaining <= 0.0 {
                break;
            }
            self.clock.sleep(remaining.min(TELEMETRY_SLICE));
        }
    }
}

/// Sensed obstacles, in global coordinates, that are not within `clearance`
/// of any known agent.
pub fn walls(sensed: &[Vec2], position: Vec2, agents: &[Vec2], clearance: f32) -> Vec<Vec2> {
    let c2 = clearance * clearance;
    sensed
        .iter()
        .map(|o| *o + position)
        .filter(|g| agents.iter().all(|a| a.distance_squared(*g) > c2))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walls_skip_agents() {
        let sensed = [Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)];
        let agents = [Vec2::new(2.1, 1.0)];
        let out = walls(&sensed, Vec2::new(1.0, 1.0), &agents, 0.25);
        assert_eq!(out, vec![Vec2::new(1.0, 2.0)]);
    }
}
