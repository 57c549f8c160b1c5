//! Inbound state: last known neighbor states, reported obstacles and the text inbox.

use crate::message::{Message, Stamp};
use glam::Vec2;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Last known state of a remote agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub id: String,
    /// `None` until a frame carrying a position has been received.
    pub position: Option<Vec2>,
    /// Radians, not normalised.
    pub heading: f32,
    /// Sender clock at send time.
    pub sent_at: f64,
    /// Local clock at receive time.
    pub received_at: f64,
}

#[derive(Debug)]
struct ObstacleReport {
    sent_at: f64,
    points: Vec<Vec2>,
}

/// One entry per remote agent id, last write wins.
///
/// With an expiration configured, an entry stops being visible once the local
/// clock passes `sent_at + expiration`, so agents that went silent drop out of
/// consensus instead of lingering as ghosts.
#[derive(Debug, Default)]
pub struct NeighborTable {
    agents: Mutex<HashMap<String, AgentState>>,
    obstacles: Mutex<HashMap<String, ObstacleReport>>,
    expiration: Option<f64>,
}

impl NeighborTable {
    pub fn new(expiration: Option<f64>) -> Self {
        Self {
            expiration,
            ..Default::default()
        }
    }

    /// Applies a stamped status frame. Returns `false` for frames that carry no
    /// neighbor state or are older than what is already stored.
    pub fn apply(&self, message: &Message, now: f64) -> bool {
        match message {
            Message::State {
                position,
                heading,
                stamp,
            } => self.upsert(stamp, Some(*position), *heading, now),
            Message::Heading { heading, stamp } => self.upsert(stamp, None, *heading, now),
            Message::Obstacles { points, stamp } => self.report(stamp, points),
            Message::StateObstacles {
                position,
                heading,
                points,
                stamp,
            } => {
                self.report(stamp, points);
                self.upsert(stamp, Some(*position), *heading, now)
            }
            Message::Wake(_) | Message::Sleep(_) | Message::Text(_) => false,
        }
    }

    fn upsert(&self, stamp: &Stamp, position: Option<Vec2>, heading: f32, now: f64) -> bool {
        let mut agents = self.agents.lock();
        let entry = agents
            .entry(stamp.sender.clone())
            .or_insert_with(|| AgentState {
                id: stamp.sender.clone(),
                position: None,
                heading,
                sent_at: f64::NEG_INFINITY,
                received_at: now,
            });
        if stamp.sent_at < entry.sent_at {
            return false;
        }
        if position.is_some() {
            entry.position = position;
        }
        entry.heading = heading;
        entry.sent_at = stamp.sent_at;
        entry.received_at = now;
        true
    }

    fn report(&self, stamp: &Stamp, points: &[Vec2]) -> bool {
        let mut obstacles = self.obstacles.lock();
        if obstacles
            .get(&stamp.sender)
            .is_some_and(|r| stamp.sent_at < r.sent_at)
        {
            return false;
        }
        obstacles.insert(
            stamp.sender.clone(),
            ObstacleReport {
                sent_at: stamp.sent_at,
                points: points.to_vec(),
            },
        );
        true
    }

    fn is_live(&self, sent_at: f64, now: f64) -> bool {
        self.expiration.is_none_or(|ttl| now < sent_at + ttl)
    }

    /// Point-in-time copy of every live neighbor, ordered by id.
    pub fn snapshot(&self, now: f64) -> Vec<AgentState> {
        let mut live: Vec<AgentState> = self
            .agents
            .lock()
            .values()
            .filter(|s| self.is_live(s.sent_at, now))
            .cloned()
            .collect();
        live.sort_by(|a, b| a.id.cmp(&b.id));
        live
    }

    /// Latest live obstacle list reported by each sender, in global coordinates.
    pub fn obstacle_reports(&self, now: f64) -> HashMap<String, Vec<Vec2>> {
        self.obstacles
            .lock()
            .iter()
            .filter(|(_, r)| self.is_live(r.sent_at, now))
            .map(|(id, r)| (id.clone(), r.points.clone()))
            .collect()
    }
}

/// Text frames waiting for the control loop. Unbounded, drained newest first.
#[derive(Debug, Default)]
pub struct Inbox {
    messages: Mutex<Vec<String>>,
}

impl Inbox {
    pub fn push(&self, text: String) {
        self.messages.lock().push(text);
    }

    /// Everything received since the last call, newest first.
    pub fn drain(&self) -> Vec<String> {
        let mut drained = std::mem::take(&mut *self.messages.lock());
        drained.reverse();
        drained
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}
