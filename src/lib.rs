//! # swarm-robot
//!
//! A control framework for decentralized robot swarms. Every robot runs its own
//! control loop: it learns about its neighbors over a shared half-duplex radio
//! channel, computes a consensus target (spreading, heading alignment, area
//! coverage or flocking), corrects that target against locally sensed obstacles,
//! and drives a differential-drive body toward it.
//!
//! The crate is split along the same seams as the system:
//!
//! - [`grid`]: uniform-grid spatial index over a static obstacle map.
//! - [`radio`]: the TDMA channel protocol over any [`Link`], with neighbor
//!   expiration and a sleep/wake gate. [`message`] holds the wire format.
//! - [`body`]: what the robot needs from its hardware, plus [`SimBody`].
//! - [`robot`]: lifecycle, kinematics with a hard stop override, obstacle
//!   correction ([`avoidance`]) and broadcasting.
//! - [`behavior`] and [`swarm`]: strategies and the per-tick driver.
//!
//! The library never installs a `tracing` subscriber; binaries choose one.

pub mod avoidance;
pub mod behavior;
pub mod body;
pub mod clock;
pub mod command;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod link;
pub mod message;
pub mod neighbors;
pub mod network;
pub mod radio;
pub mod robot;
pub mod swarm;
pub mod worker;

pub use avoidance::AvoidanceConfig;
pub use behavior::{
    AreaCoverage, Avoidance, HeadingConsensus, Marching, Perception, Spreading, Strategy,
};
pub use body::{Body, SimBody, SimBodyConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::Command;
pub use error::*;
pub use grid::{ObstacleGrid, RebuildPolicy};
pub use link::{Ether, GuardedLink, Link, MemoryLink};
pub use message::{Kind, Message, Stamp};
pub use neighbors::AgentState;
pub use network::{LocalAir, LocalNetwork, Network};
pub use radio::{RadioConfig, TdmaRadio, TdmaSchedule};
pub use robot::{Robot, RobotConfig, RobotState};
pub use swarm::{SwarmAgent, SwarmConfig, TickOutcome};
