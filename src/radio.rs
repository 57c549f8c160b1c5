//! Time-division radio protocol over a shared half-duplex [`Link`].
//!
//! Time is cut into frames of `period` seconds. Each agent owns the window
//! `[window_start, window_end)` of every frame and transmits at most one frame
//! per window. Windows must be assigned disjointly by whoever deploys the swarm;
//! the protocol does no collision detection or backoff.
//!
//! Two background loops run while broadcasting:
//!
//! - **send**: waits for the window, transmits the next outbox entry, then
//!   sleeps until the window closes.
//! - **receive**: polls the link, decodes each line and updates the neighbor
//!   table, the inbox or the awake gate. Bad frames are logged and dropped.
//!
//! A `sleep` frame closes the [`AwakeGate`]: the send loop parks and the
//! receive loop enters standby, scanning only for `wake` frames.

use crate::clock::Clock;
use crate::error::{ParseError, RadioError};
use crate::link::{GuardedLink, Link};
use crate::message::{Kind, Message};
use crate::neighbors::{AgentState, Inbox, NeighborTable};
use crate::network::Network;
use crate::worker::{AwakeGate, BackgroundLoop};
use glam::Vec2;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Longest single sleep of a loop, so stop requests are noticed promptly.
const MAX_SLICE: f64 = 0.05;

/// Upper bound on frames handled per receive cycle.
const MAX_FRAMES_PER_CYCLE: usize = 64;

/// Slot assignment and loop tuning for one [`TdmaRadio`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Start of this agent's transmit window within the frame, in seconds.
    pub window_start: f64,
    /// End of the window (exclusive).
    pub window_end: f64,
    /// Frame length in seconds.
    pub period: f64,
    /// Agent id. A random number below 10^6 is used when absent.
    pub id: Option<String>,
    /// Neighbor time-to-live in seconds, counted from the sender's stamp.
    pub expiration: Option<f64>,
    /// Receive polls per frame.
    pub reads_per_period: f64,
    /// Fraction of the window to sleep when the outbox is empty.
    pub idle_poll_fraction: f64,
    /// Seconds between wake scans while asleep.
    pub standby_poll: f64,
    /// Bounded wait for each loop on shutdown.
    pub join_timeout: Duration,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            window_start: 0.0,
            window_end: 0.1,
            period: 1.0,
            id: None,
            expiration: None,
            reads_per_period: 15.0,
            idle_poll_fraction: 0.2,
            standby_poll: 2.0,
            join_timeout: Duration::from_secs(5),
        }
    }
}

impl RadioConfig {
    pub fn new(window_start: f64, window_end: f64, period: f64) -> Self {
        Self {
            window_start,
            window_end,
            period,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_expiration(mut self, seconds: f64) -> Self {
        self.expiration = Some(seconds);
        self
    }
}

/// What the send loop does next.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SendStep {
    /// Outside the window; sleep this long until it opens.
    WaitForWindow(f64),
    /// Inside the window with nothing queued; sleep this long and re-check.
    Idle(f64),
    /// Inside the window with a frame queued.
    Transmit,
}

/// A validated transmit window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TdmaSchedule {
    start: f64,
    end: f64,
    period: f64,
}

impl TdmaSchedule {
    pub fn new(start: f64, end: f64, period: f64) -> Result<Self, RadioError> {
        let valid = period > 0.0 && 0.0 <= start && start < end && end <= period;
        if !valid || !(start.is_finite() && end.is_finite() && period.is_finite()) {
            return Err(RadioError::InvalidWindow { start, end, period });
        }
        Ok(Self { start, end, period })
    }

    /// Position of `now` within its frame.
    pub fn phase(&self, now: f64) -> f64 {
        now.rem_euclid(self.period)
    }

    pub fn in_window(&self, now: f64) -> bool {
        let t = self.phase(now);
        self.start <= t && t < self.end
    }

    /// Index of the frame containing `now`.
    pub fn frame(&self, now: f64) -> i64 {
        (now / self.period).floor() as i64
    }

    /// Time until the next window opens. Inside a window this is the next
    /// frame's window.
    pub fn until_next_window(&self, now: f64) -> f64 {
        let t = self.phase(now);
        if t < self.start {
            self.start - t
        } else {
            self.period + self.start - t
        }
    }

    /// Next send-loop step at `now`. With nothing `pending` inside the window
    /// the loop idles for `idle_fraction` of the window width.
    pub fn plan(&self, now: f64, pending: bool, idle_fraction: f64) -> SendStep {
        if !self.in_window(now) {
            SendStep::WaitForWindow(self.until_next_window(now))
        } else if !pending {
            SendStep::Idle((self.end - self.start) * idle_fraction)
        } else {
            SendStep::Transmit
        }
    }

    /// Time left before the window closes; zero outside the window.
    pub fn until_window_end(&self, now: f64) -> f64 {
        let t = self.phase(now);
        if t < self.end { (self.end - t).max(0.0) } else { 0.0 }
    }
}

/// Outbound buffer with two disciplines: a single "latest wins" slot for
/// periodic status kinds and an unbounded LIFO backlog for everything else.
#[derive(Debug, Default)]
pub struct Outbox {
    latest: Mutex<Option<Message>>,
    backlog: Mutex<Vec<Message>>,
}

impl Outbox {
    pub fn post(&self, message: Message) {
        if message.kind().is_low_priority() {
            if let Some(old) = self.latest.lock().replace(message) {
                trace!(kind = ?old.kind(), "superseded unsent status frame");
            }
        } else {
            self.backlog.lock().push(message);
        }
    }

    /// Next frame to transmit: the newest backlog entry, else the status slot.
    pub fn take(&self) -> Option<Message> {
        self.backlog
            .lock()
            .pop()
            .or_else(|| self.latest.lock().take())
    }

    pub fn len(&self) -> usize {
        self.backlog.lock().len() + usize::from(self.latest.lock().is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Shared<L> {
    id: String,
    config: RadioConfig,
    schedule: TdmaSchedule,
    link: GuardedLink<L>,
    clock: Arc<dyn Clock>,
    neighbors: NeighborTable,
    inbox: Inbox,
    outbox: Outbox,
    gate: AwakeGate,
    stop_requested: AtomicBool,
    last_frame: Mutex<Option<i64>>,
}

impl<L: Link> Shared<L> {
    fn stopping(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Sleeps `seconds` in short slices, returning early on a stop request.
    fn pause(&self, seconds: f64) {
        let deadline = self.clock.now() + seconds;
        loop {
            let remaining = deadline - self.clock.now();
            if remaining <= 0.0 || self.stopping() {
                return;
            }
            self.clock.sleep(remaining.min(MAX_SLICE));
        }
    }

    fn send_cycle(&self) -> SendStep {
        let now = self.clock.now();
        let frame = self.schedule.frame(now);
        // Sleeps can wake a hair before the window closes; one frame per window.
        let step = if *self.last_frame.lock() == Some(frame) {
            SendStep::WaitForWindow(self.schedule.until_next_window(now))
        } else {
            self.schedule
                .plan(now, !self.outbox.is_empty(), self.config.idle_poll_fraction)
        };
        match step {
            SendStep::WaitForWindow(dt) | SendStep::Idle(dt) => self.pause(dt),
            SendStep::Transmit => {
                *self.last_frame.lock() = Some(frame);
                if let Some(message) = self.outbox.take() {
                    let frame = message.encode();
                    match self.link.write(&frame) {
                        Ok(()) => trace!(id = %self.id, kind = ?message.kind(), "frame sent"),
                        Err(e) => warn!(id = %self.id, error = %e, "link write failed"),
                    }
                }
                self.pause(self.schedule.until_window_end(self.clock.now()));
            }
        }
        step
    }

    fn receive_cycle(&self) -> usize {
        let mut handled = 0;
        while handled < MAX_FRAMES_PER_CYCLE {
            match self.link.bytes_available() {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(id = %self.id, error = %e, "link poll failed");
                    break;
                }
            }
            match self.link.read_line() {
                Ok(line) => self.handle_frame(&line),
                Err(e) => {
                    warn!(id = %self.id, error = %e, "link read failed");
                    break;
                }
            }
            handled += 1;
        }
        handled
    }

    fn handle_frame(&self, line: &str) {
        if line.trim_end_matches(['\r', '\n']).len() < 2 {
            return;
        }
        match Message::decode(line) {
            Ok(message) => self.dispatch(message),
            Err(ParseError::UnknownKind(kind)) => {
                warn!(id = %self.id, %kind, "received unknown message kind");
            }
            Err(e) => {
                warn!(id = %self.id, error = %e, frame = line.trim_end(), "discarding malformed frame");
            }
        }
    }

    fn dispatch(&self, message: Message) {
        match message {
            Message::Wake(stamp) => {
                debug!(id = %self.id, from = %stamp.sender, "wake received");
                self.gate.wake();
            }
            Message::Sleep(stamp) => {
                if self.gate.sleep() {
                    info!(id = %self.id, from = %stamp.sender, "sleep received, entering standby");
                    let slept = self.standby();
                    info!(id = %self.id, seconds = slept, "left standby");
                }
            }
            Message::Text(text) => self.inbox.push(text),
            status => {
                self.neighbors.apply(&status, self.clock.now());
            }
        }
    }

    /// Polls for a wake frame every `standby_poll` seconds, ignoring all other
    /// traffic. Returns the time spent asleep.
    fn standby(&self) -> f64 {
        let start = self.clock.now();
        while !self.gate.is_awake() && !self.stopping() {
            self.pause(self.config.standby_poll);
            while matches!(self.link.bytes_available(), Ok(n) if n > 0) {
                match self.link.read_line() {
                    Ok(line) if line.starts_with(Kind::Wake.tag()) => self.gate.wake(),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(id = %self.id, error = %e, "link read failed in standby");
                        break;
                    }
                }
            }
        }
        self.clock.now() - start
    }

    fn send_loop(&self) {
        loop {
            self.gate.wait();
            if self.stopping() {
                break;
            }
            self.send_cycle();
        }
    }

    fn receive_loop(&self) {
        let interval = self.config.period / self.config.reads_per_period.max(1.0);
        loop {
            self.gate.wait();
            if self.stopping() {
                break;
            }
            self.receive_cycle();
            self.pause(interval);
        }
        // A sleep frame may have closed the gate after shutdown began.
        self.gate.wake();
    }
}

/// TDMA radio protocol endpoint.
pub struct TdmaRadio<L: Link> {
    shared: Arc<Shared<L>>,
    loops: Mutex<Vec<BackgroundLoop>>,
    broadcasting: AtomicBool,
}

impl<L: Link> TdmaRadio<L> {
    /// Validates the window configuration. The link is not opened until
    /// [`start_broadcasting`](Network::start_broadcasting).
    pub fn new(config: RadioConfig, link: L, clock: Arc<dyn Clock>) -> Result<Self, RadioError> {
        Self::with_link(config, GuardedLink::new(link), clock)
    }

    /// Like [`new`](Self::new), for a link that shares a bus lock with others.
    pub fn with_link(
        config: RadioConfig,
        link: GuardedLink<L>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RadioError> {
        let schedule = TdmaSchedule::new(config.window_start, config.window_end, config.period)?;
        if let Some(ttl) = config.expiration
            && !(ttl > 0.0)
        {
            return Err(RadioError::InvalidExpiration(ttl));
        }
        let id = config
            .id
            .clone()
            .unwrap_or_else(|| rand::thread_rng().gen_range(0..1_000_000).to_string());
        Ok(Self {
            shared: Arc::new(Shared {
                id,
                neighbors: NeighborTable::new(config.expiration),
                config,
                schedule,
                link,
                clock,
                inbox: Inbox::default(),
                outbox: Outbox::default(),
                gate: AwakeGate::new(),
                stop_requested: AtomicBool::new(false),
                last_frame: Mutex::new(None),
            }),
            loops: Mutex::new(Vec::new()),
            broadcasting: AtomicBool::new(false),
        })
    }

    pub fn schedule(&self) -> TdmaSchedule {
        self.shared.schedule
    }

    /// Frames waiting in the outbox.
    pub fn pending(&self) -> usize {
        self.shared.outbox.len()
    }

    /// Runs one iteration of the send loop on the calling thread.
    pub fn send_cycle(&self) -> SendStep {
        self.shared.send_cycle()
    }

    /// Runs one iteration of the receive loop on the calling thread. Returns
    /// the number of lines consumed.
    pub fn receive_cycle(&self) -> usize {
        self.shared.receive_cycle()
    }
}

impl<L: Link> Network for TdmaRadio<L> {
    fn id(&self) -> &str {
        &self.shared.id
    }

    fn now(&self) -> f64 {
        self.shared.clock.now()
    }

    /// Opens the link and spawns the send and receive loops. No-op while
    /// already broadcasting.
    fn start_broadcasting(&self) -> Result<(), RadioError> {
        let mut loops = self.loops.lock();
        if self.broadcasting.load(Ordering::Acquire) {
            return Ok(());
        }
        let shared = &self.shared;
        shared.link.open()?;
        shared.stop_requested.store(false, Ordering::Release);

        let sender = Arc::clone(shared);
        loops.push(BackgroundLoop::spawn(
            format!("tdma-send-{}", shared.id),
            move || sender.send_loop(),
        )?);
        let receiver = Arc::clone(shared);
        match BackgroundLoop::spawn(format!("tdma-recv-{}", shared.id), move || {
            receiver.receive_loop()
        }) {
            Ok(handle) => loops.push(handle),
            Err(e) => {
                shared.stop_requested.store(true, Ordering::Release);
                shared.gate.wake();
                for handle in loops.drain(..) {
                    handle.join_within(shared.config.join_timeout)?;
                }
                return Err(e.into());
            }
        }
        self.broadcasting.store(true, Ordering::Release);
        info!(id = %shared.id, schedule = ?shared.schedule, "broadcasting started");
        Ok(())
    }

    /// Stops both loops with a bounded join, then closes the link. Returns the
    /// number of frames left unsent. A loop that fails to stop is fatal.
    fn stop_broadcasting(&self) -> Result<usize, RadioError> {
        let shared = &self.shared;
        if !self.broadcasting.swap(false, Ordering::AcqRel) {
            return Ok(shared.outbox.len());
        }
        shared.stop_requested.store(true, Ordering::Release);
        shared.gate.wake();

        let mut first_failure = None;
        for handle in self.loops.lock().drain(..) {
            if let Err(e) = handle.join_within(shared.config.join_timeout) {
                first_failure.get_or_insert(e);
            }
        }
        if let Some(e) = first_failure {
            return Err(e.into());
        }
        shared.link.close()?;
        info!(id = %shared.id, "broadcasting stopped");
        Ok(shared.outbox.len())
    }

    fn is_broadcasting(&self) -> bool {
        self.broadcasting.load(Ordering::Acquire)
    }

    fn post(&self, message: Message) {
        self.shared.outbox.post(message);
    }

    fn agents_state(&self) -> Vec<AgentState> {
        self.shared.neighbors.snapshot(self.shared.clock.now())
    }

    fn obstacle_reports(&self) -> HashMap<String, Vec<Vec2>> {
        self.shared.neighbors.obstacle_reports(self.shared.clock.now())
    }

    fn incomings(&self) -> Vec<String> {
        self.shared.inbox.drain()
    }

    fn is_awake(&self) -> bool {
        self.shared.gate.is_awake()
    }
}

impl<L: Link> Drop for TdmaRadio<L> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_broadcasting() {
            warn!(id = %self.shared.id, error = %e, "radio dropped while loops were still running");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::link::Ether;
    use crate::message::Stamp;
    use std::thread;

    fn status(sender: &str, x: f32) -> Message {
        Message::State {
            position: Vec2::new(x, 0.0),
            heading: 0.0,
            stamp: Stamp::new(0.0, sender),
        }
    }

    #[test]
    fn rejects_bad_windows() {
        assert!(TdmaSchedule::new(0.4, 0.5, 1.0).is_ok());
        assert!(TdmaSchedule::new(0.0, 1.0, 1.0).is_ok());
        for (s, e, p) in [(0.5, 0.5, 1.0), (0.6, 0.5, 1.0), (-0.1, 0.5, 1.0), (0.1, 1.5, 1.0), (0.0, 0.0, 0.0)] {
            assert!(
                matches!(TdmaSchedule::new(s, e, p), Err(RadioError::InvalidWindow { .. })),
                "({s}, {e}, {p}) should be rejected"
            );
        }
    }

    #[test]
    fn plan_follows_window() {
        let s = TdmaSchedule::new(0.4, 0.5, 1.0).unwrap();
        assert!(matches!(s.plan(10.1, true, 0.2), SendStep::WaitForWindow(dt) if (dt - 0.3).abs() < 1e-9));
        assert!(matches!(s.plan(10.7, true, 0.2), SendStep::WaitForWindow(dt) if (dt - 0.7).abs() < 1e-9));
        assert!(matches!(s.plan(10.45, false, 0.2), SendStep::Idle(dt) if (dt - 0.02).abs() < 1e-9));
        assert_eq!(s.plan(10.45, true, 0.2), SendStep::Transmit);
        assert!((s.until_window_end(10.45) - 0.05).abs() < 1e-9);
    }

    #[test]
    fn status_slot_keeps_only_latest() {
        let outbox = Outbox::default();
        outbox.post(status("a", 1.0));
        outbox.post(status("a", 2.0));
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.take(), Some(status("a", 2.0)));
        assert!(outbox.is_empty());
    }

    #[test]
    fn backlog_is_lifo_and_served_first() {
        let outbox = Outbox::default();
        outbox.post(status("a", 1.0));
        outbox.post(Message::Text("first".into()));
        outbox.post(Message::Text("second".into()));
        assert_eq!(outbox.len(), 3);
        assert_eq!(outbox.take(), Some(Message::Text("second".into())));
        assert_eq!(outbox.take(), Some(Message::Text("first".into())));
        assert_eq!(outbox.take(), Some(status("a", 1.0)));
        assert_eq!(outbox.take(), None);
    }

    #[test]
    fn concurrent_starts_spawn_one_pair_of_loops() {
        let ether = Ether::new();
        let radio = TdmaRadio::new(
            RadioConfig::new(0.0, 0.1, 0.2).with_id("C"),
            ether.station(),
            Arc::new(SystemClock),
        )
        .unwrap();
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| radio.start_broadcasting().unwrap());
            }
        });
        assert!(radio.is_broadcasting());
        assert_eq!(radio.loops.lock().len(), 2);
        radio.stop_broadcasting().unwrap();
        assert!(radio.loops.lock().is_empty());
    }
}
