//! Per-tick swarm driver.
//!
//! A [`SwarmAgent`] runs one [`Strategy`] on one [`Robot`]. Each
//! [`update`](SwarmAgent::update):
//!
//! 1. handles operator commands from the inbox (`stop`, `goto`, `light`),
//! 2. broadcasts the robot's state,
//! 3. computes a raw target: the active rendezvous waypoint if any, else the
//!    strategy's target, else the current heading,
//! 4. corrects it for obstacles,
//! 5. moves toward it when it is longer than the threshold, otherwise holds,
//! 6. checks for a beacon.

use crate::behavior::{Avoidance, Perception, Strategy};
use crate::body::Body;
use crate::command::Command;
use crate::error::RobotError;
use crate::network::Network;
use crate::robot::Robot;
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Tuning of the per-tick driver.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Speed multiplier applied while an obstacle is near.
    pub near_obstacle_speed_factor: f32,
    /// Distance at which a rendezvous waypoint counts as reached.
    pub waypoint_tolerance: f32,
    /// Sightings closer than this to a known beacon are the same beacon.
    pub beacon_separation: f32,
    /// Re-broadcast newly learned `goto` and `light` commands.
    pub relay_commands: bool,
    /// Call the swarm to this robot when it finds a new beacon.
    pub rendezvous_on_beacon: bool,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            near_obstacle_speed_factor: 0.5,
            waypoint_tolerance: 0.8,
            beacon_separation: 0.8,
            relay_commands: true,
            rendezvous_on_beacon: true,
        }
    }
}

/// Result of one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TickOutcome {
    Continue,
    /// This robot sees a beacon at its current position.
    BeaconFound(Vec2),
    /// An operator `stop` command was received.
    StopCommanded,
}

impl TickOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TickOutcome::Continue)
    }
}

/// Commanded waypoints that override the strategy until all are reached.
#[derive(Clone, Debug)]
pub struct Rendezvous {
    waypoints: VecDeque<Vec2>,
    tolerance: f32,
}

impl Rendezvous {
    pub fn new(tolerance: f32) -> Self {
        Self {
            waypoints: VecDeque::new(),
            tolerance,
        }
    }

    /// Appends a waypoint. Returns `false` if it is already the last one.
    pub fn push(&mut self, waypoint: Vec2) -> bool {
        if self
            .waypoints
            .back()
            .is_some_and(|last| last.distance(waypoint) < self.tolerance)
        {
            return false;
        }
        self.waypoints.push_back(waypoint);
        true
    }

    /// Drops every waypoint already reached from `position` and returns the
    /// next one to head for.
    pub fn advance(&mut self, position: Vec2) -> Option<Vec2> {
        while let Some(next) = self.waypoints.front() {
            if next.distance(position) >= self.tolerance {
                return Some(*next);
            }
            debug!(x = next.x, y = next.y, "waypoint reached");
            self.waypoints.pop_front();
        }
        None
    }

    pub fn is_active(&self) -> bool {
        !self.waypoints.is_empty()
    }

    pub fn waypoints(&self) -> impl Iterator<Item = &Vec2> {
        self.waypoints.iter()
    }

    pub fn clear(&mut self) {
        self.waypoints.clear();
    }
}

/// Beacon sightings known to this robot.
#[derive(Clone, Debug)]
pub struct BeaconLog {
    seen: Vec<Vec2>,
    min_separation: f32,
}

impl BeaconLog {
    pub fn new(min_separation: f32) -> Self {
        Self {
            seen: Vec::new(),
            min_separation,
        }
    }

    /// Records a sighting. Returns `true` if it is a new beacon.
    pub fn record(&mut self, at: Vec2) -> bool {
        if self
            .seen
            .iter()
            .any(|b| b.distance(at) < self.min_separation)
        {
            return false;
        }
        self.seen.push(at);
        true
    }

    pub fn seen(&self) -> &[Vec2] {
        &self.seen
    }
}

/// A [`Robot`] driven by a [`Strategy`], one [`update`](Self::update) per tick.
pub struct SwarmAgent<B: Body, N: Network, S: Strategy> {
    robot: Robot<B, N>,
    strategy: S,
    config: SwarmConfig,
    rendezvous: Rendezvous,
    beacons: BeaconLog,
}

impl<B: Body, N: Network, S: Strategy> SwarmAgent<B, N, S> {
    pub fn new(robot: Robot<B, N>, strategy: S, config: SwarmConfig) -> Self {
        Self {
            rendezvous: Rendezvous::new(config.waypoint_tolerance),
            beacons: BeaconLog::new(config.beacon_separation),
            robot,
            strategy,
            config,
        }
    }

    pub fn robot(&self) -> &Robot<B, N> {
        &self.robot
    }

    pub fn robot_mut(&mut self) -> &mut Robot<B, N> {
        &mut self.robot
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn rendezvous(&self) -> &Rendezvous {
        &self.rendezvous
    }

    pub fn beacons(&self) -> &BeaconLog {
        &self.beacons
    }

    /// Runs one control tick of `dt` seconds at `speed` (`None` for the
    /// body's cruising speed).
    pub fn update(&mut self, dt: f64, speed: Option<f32>) -> Result<TickOutcome, RobotError> {
        if self.handle_commands() {
            info!(id = self.robot.id(), "stop commanded");
            self.robot.stop();
            return Ok(TickOutcome::StopCommanded);
        }

        self.robot.broadcast_state();
        let target = self.raw_target();
        let target = match self.strategy.avoidance() {
            Avoidance::Projecting => self.robot.correct_target(target),
            Avoidance::Rotating => self.robot.correct_target_rotating(target),
        };

        let speed = if self.robot.obstacle_near() {
            speed.map(|v| v * self.config.near_obstacle_speed_factor)
        } else {
            speed
        };
        if target.length() > self.robot.state().threshold {
            self.robot.align(target);
            self.robot.move_forward(dt, speed);
        } else {
            self.robot.move_forward(dt, Some(0.0));
        }

        if self.robot.light_detected() {
            let at = self.robot.position();
            self.robot.move_forward(0.0, Some(0.0));
            if self.beacons.record(at) {
                info!(id = self.robot.id(), x = at.x, y = at.y, "new beacon found");
                self.robot.broadcast_light(at);
                if self.config.rendezvous_on_beacon {
                    self.robot.broadcast_rendezvous();
                }
            }
            return Ok(TickOutcome::BeaconFound(at));
        }
        Ok(TickOutcome::Continue)
    }

    /// Drains the inbox. Returns `true` if a `stop` was among the commands.
    fn handle_commands(&mut self) -> bool {
        let mut stop = false;
        for text in self.robot.network().incomings() {
            let command = match text.parse::<Command>() {
                Ok(command) => command,
                Err(e) => {
                    warn!(id = self.robot.id(), error = %e, %text, "ignoring unparseable command");
                    continue;
                }
            };
            let learned = match command {
                Command::Stop => {
                    stop = true;
                    false
                }
                Command::Goto(p) => self.rendezvous.push(p),
                Command::Light(p) => self.beacons.record(p),
            };
            if learned && self.config.relay_commands {
                debug!(id = self.robot.id(), %command, "relaying command");
                self.robot.broadcast_command(command);
            }
        }
        stop
    }

    fn raw_target(&mut self) -> Vec2 {
        let position = self.robot.position();
        if let Some(waypoint) = self.rendezvous.advance(position) {
            return waypoint - position;
        }
        let perception = Perception {
            position,
            heading: self.robot.heading(),
            neighbors: self.robot.agents(),
            obstacles: if self.strategy.senses_obstacles() {
                self.robot.obstacle_coordinates()
            } else {
                Vec::new()
            },
        };
        self.strategy
            .compute_target(&perception)
            .unwrap_or_else(|| self.fallback(perception.heading))
    }

    /// Keeps going along the current heading, a bit above the threshold.
    fn fallback(&self, heading: f32) -> Vec2 {
        Vec2::from_angle(heading) * (1.0 + 1.5 * self.robot.state().threshold)
    }
}
