//! The network capability consumed by the robot core, and an instant
//! in-process implementation of it.
//!
//! [`TdmaRadio`](crate::radio::TdmaRadio) is the real protocol. [`LocalNetwork`]
//! skips the time slots and delivers every posted frame to all peers on the same
//! [`LocalAir`] immediately, which keeps simulations deterministic. Frames still
//! go through [`Message::encode`] and [`Message::decode`] so both paths see the
//! same wire format.

use crate::clock::Clock;
use crate::error::{ParseError, RadioError};
use crate::message::{Message, Stamp};
use crate::neighbors::{AgentState, Inbox, NeighborTable};
use crate::worker::AwakeGate;
use glam::Vec2;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

/// Message-passing capability of an agent.
///
/// The `send_*` helpers stamp and enqueue a frame and return it; delivery is
/// best-effort.
pub trait Network: Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Local clock reading used for stamps and expiration.
    fn now(&self) -> f64;

    fn start_broadcasting(&self) -> Result<(), RadioError>;

    /// Returns the number of frames that were never sent.
    fn stop_broadcasting(&self) -> Result<usize, RadioError>;

    fn is_broadcasting(&self) -> bool;

    /// Enqueues an already built frame.
    fn post(&self, message: Message);

    /// Live neighbor states, ordered by id.
    fn agents_state(&self) -> Vec<AgentState>;

    /// Latest obstacle list per sender.
    fn obstacle_reports(&self) -> HashMap<String, Vec<Vec2>>;

    /// Drains received text frames, newest first.
    fn incomings(&self) -> Vec<String>;

    fn is_awake(&self) -> bool;

    fn stamp(&self) -> Stamp {
        Stamp::new(self.now(), self.id())
    }

    fn send_state(&self, position: Vec2, heading: f32) -> Message {
        let message = Message::State {
            position,
            heading,
            stamp: self.stamp(),
        };
        self.post(message.clone());
        message
    }

    fn send_heading(&self, heading: f32) -> Message {
        let message = Message::Heading {
            heading,
            stamp: self.stamp(),
        };
        self.post(message.clone());
        message
    }

    fn send_obstacles(&self, points: Vec<Vec2>) -> Message {
        let message = Message::Obstacles {
            points,
            stamp: self.stamp(),
        };
        self.post(message.clone());
        message
    }

    fn send_state_obstacles(&self, position: Vec2, heading: f32, points: Vec<Vec2>) -> Message {
        let message = Message::StateObstacles {
            position,
            heading,
            points,
            stamp: self.stamp(),
        };
        self.post(message.clone());
        message
    }

    fn send_wakeup(&self) -> Message {
        let message = Message::Wake(self.stamp());
        self.post(message.clone());
        message
    }

    fn send_sleep(&self) -> Message {
        let message = Message::Sleep(self.stamp());
        self.post(message.clone());
        message
    }

    fn send_message(&self, text: impl Into<String>) -> Message
    where
        Self: Sized,
    {
        let message = Message::Text(text.into());
        self.post(message.clone());
        message
    }
}

struct Station {
    id: String,
    neighbors: NeighborTable,
    inbox: Inbox,
    gate: AwakeGate,
    clock: Arc<dyn Clock>,
    listening: AtomicBool,
}

impl Station {
    fn deliver(&self, frame: &str) {
        if !self.listening.load(Ordering::Acquire) {
            return;
        }
        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(ParseError::UnknownKind(kind)) => {
                warn!(id = %self.id, %kind, "received unknown message kind");
                return;
            }
            Err(e) => {
                warn!(id = %self.id, error = %e, "discarding malformed frame");
                return;
            }
        };
        if !self.gate.is_awake() {
            if matches!(message, Message::Wake(_)) {
                self.gate.wake();
            }
            return;
        }
        match message {
            Message::Wake(_) => {}
            Message::Sleep(stamp) => {
                self.gate.sleep();
                debug!(id = %self.id, from = %stamp.sender, "entering standby");
            }
            Message::Text(text) => self.inbox.push(text),
            status => {
                self.neighbors.apply(&status, self.clock.now());
            }
        }
    }
}

/// Shared in-process medium for [`LocalNetwork`] peers. Clones refer to the
/// same medium.
#[derive(Clone, Default)]
pub struct LocalAir {
    stations: Arc<Mutex<Vec<Arc<Station>>>>,
}

impl LocalAir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a peer named `id`.
    pub fn join(
        &self,
        id: impl Into<String>,
        clock: Arc<dyn Clock>,
        expiration: Option<f64>,
    ) -> LocalNetwork {
        let station = Arc::new(Station {
            id: id.into(),
            neighbors: NeighborTable::new(expiration),
            inbox: Inbox::default(),
            gate: AwakeGate::new(),
            clock,
            listening: AtomicBool::new(false),
        });
        self.stations.lock().push(Arc::clone(&station));
        LocalNetwork {
            air: self.clone(),
            station,
        }
    }

    /// Delivers a raw frame to every listening peer.
    pub fn inject(&self, frame: &str) {
        for station in self.peers(None) {
            station.deliver(frame);
        }
    }

    fn peers(&self, except: Option<&Arc<Station>>) -> Vec<Arc<Station>> {
        self.stations
            .lock()
            .iter()
            .filter(|s| except.is_none_or(|me| !Arc::ptr_eq(s, me)))
            .cloned()
            .collect()
    }
}

/// One peer on a [`LocalAir`].
pub struct LocalNetwork {
    air: LocalAir,
    station: Arc<Station>,
}

impl Network for LocalNetwork {
    fn id(&self) -> &str {
        &self.station.id
    }

    fn now(&self) -> f64 {
        self.station.clock.now()
    }

    fn start_broadcasting(&self) -> Result<(), RadioError> {
        self.station.listening.store(true, Ordering::Release);
        Ok(())
    }

    fn stop_broadcasting(&self) -> Result<usize, RadioError> {
        self.station.listening.store(false, Ordering::Release);
        self.station.gate.wake();
        Ok(0)
    }

    fn is_broadcasting(&self) -> bool {
        self.station.listening.load(Ordering::Acquire)
    }

    /// Delivers the frame to every other peer before returning. Dropped while
    /// not broadcasting or asleep.
    fn post(&self, message: Message) {
        if !self.is_broadcasting() || !self.station.gate.is_awake() {
            trace!(id = %self.station.id, kind = ?message.kind(), "frame dropped, radio idle");
            return;
        }
        let frame = message.encode();
        for peer in self.air.peers(Some(&self.station)) {
            peer.deliver(&frame);
        }
    }

    fn agents_state(&self) -> Vec<AgentState> {
        self.station.neighbors.snapshot(self.now())
    }

    fn obstacle_reports(&self) -> HashMap<String, Vec<Vec2>> {
        self.station.neighbors.obstacle_reports(self.now())
    }

    fn incomings(&self) -> Vec<String> {
        self.station.inbox.drain()
    }

    fn is_awake(&self) -> bool {
        self.station.gate.is_awake()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn pair() -> (ManualClock, LocalNetwork, LocalNetwork) {
        let clock = ManualClock::new(10.0);
        let air = LocalAir::new();
        let a = air.join("a", Arc::new(clock.clone()), None);
        let b = air.join("b", Arc::new(clock.clone()), None);
        a.start_broadcasting().unwrap();
        b.start_broadcasting().unwrap();
        (clock, a, b)
    }

    #[test]
    fn state_reaches_peers_only() {
        let (_clock, a, b) = pair();
        a.send_state(Vec2::new(1.0, 2.0), 0.5);
        assert!(a.agents_state().is_empty());
        let seen = b.agents_state();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, "a");
        assert_eq!(seen[0].position, Some(Vec2::new(1.0, 2.0)));
        assert_eq!(seen[0].sent_at, 10.0);
    }

    #[test]
    fn sleep_silences_until_wake() {
        let (_clock, a, b) = pair();
        a.send_sleep();
        assert!(!b.is_awake());
        b.send_state(Vec2::ZERO, 0.0);
        assert!(a.agents_state().is_empty());
        a.send_message("ignored while asleep");
        assert!(b.incomings().is_empty());
        a.send_wakeup();
        assert!(b.is_awake());
        a.send_message("hello");
        assert_eq!(b.incomings(), vec!["hello".to_string()]);
    }

    #[test]
    fn idle_peer_hears_nothing() {
        let (_clock, a, b) = pair();
        b.stop_broadcasting().unwrap();
        a.send_message("lost");
        assert!(b.incomings().is_empty());
    }
}
