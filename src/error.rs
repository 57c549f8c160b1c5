//! Error taxonomy.
//!
//! Configuration errors (`GridError::Degenerate`, `RadioError::InvalidWindow`, ...)
//! surface at construction. Parse errors stay local to the loop that hit them and
//! are only logged. Shutdown timeouts are fatal and always propagate.

use std::io;
use std::num::ParseFloatError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by [`ObstacleGrid`](crate::grid::ObstacleGrid).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("cell radius must be positive and finite, got {0}")]
    InvalidCellRadius(f32),
    #[error("cannot build a grid without obstacles")]
    Empty,
    #[error("grid of {nx}x{ny} cells is too small, at least 4x4 are required")]
    Degenerate { nx: usize, ny: usize },
    #[error("grid of {nx}x{ny} cells exceeds the {max} cell limit", max = crate::grid::MAX_CELLS)]
    TooManyCells { nx: usize, ny: usize },
    #[error("obstacle ({x}, {y}) lies outside the grid bounds")]
    OutOfBounds { x: f32, y: f32 },
    #[error("obstacles were added since the last rebuild")]
    RebuildRequired,
}

/// Errors decoding a single wire frame. Never fatal to the receive loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("frame is too short to carry a kind tag")]
    Truncated,
    #[error("unknown message kind {0:?}")]
    UnknownKind(String),
    #[error("{kind} frame expects {expected} fields, found {found}")]
    FieldCount {
        kind: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("field `{field}` is not a number: {source}")]
    Number {
        field: &'static str,
        #[source]
        source: ParseFloatError,
    },
    #[error("malformed obstacle pair {0:?}")]
    ObstaclePair(String),
    #[error("empty sender id")]
    MissingSender,
}

/// Errors parsing a text command carried by a generic message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("`{0}` expects two coordinates")]
    MissingCoordinates(&'static str),
    #[error("bad coordinate: {0}")]
    Coordinate(#[from] ParseFloatError),
}

/// Errors raised by the radio channel protocol.
#[derive(Error, Debug)]
pub enum RadioError {
    #[error(
        "invalid TDMA window: require 0 <= start ({start}) < end ({end}) <= period ({period}) and period > 0"
    )]
    InvalidWindow { start: f64, end: f64, period: f64 },
    #[error("expiration must be positive, got {0}")]
    InvalidExpiration(f64),
    #[error("link error: {0}")]
    Link(#[from] io::Error),
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// A background loop did not terminate within its bounded join.
#[derive(Error, Debug)]
#[error("background loop `{name}` did not stop within {timeout:?}")]
pub struct ShutdownError {
    pub name: String,
    pub timeout: Duration,
}

/// Errors raised by a [`Body`](crate::body::Body) implementation.
#[derive(Error, Debug)]
pub enum BodyError {
    #[error("body hardware unavailable: {0}")]
    Unavailable(String),
    #[error("body i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised by the robot control core.
#[derive(Error, Debug)]
pub enum RobotError {
    #[error(transparent)]
    Radio(#[from] RadioError),
    #[error(transparent)]
    Body(#[from] BodyError),
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    #[error("failed to spawn background loop: {0}")]
    Spawn(io::Error),
}
