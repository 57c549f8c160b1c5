//! Byte links underneath the radio protocol.
//!
//! A [`Link`] is the raw half-duplex device (a serial radio modem, a socket, an
//! in-memory medium). The send and receive loops share it, so the radio only
//! ever touches it through a [`GuardedLink`], which serialises every operation.
//! Several guarded links can share one bus lock when they are multiplexed onto
//! the same physical interface.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

/// Raw line-oriented duplex channel.
pub trait Link: Send + 'static {
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Bytes ready to read without blocking.
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Reads up to and including the next newline. May return a partial or
    /// empty line on timeout.
    fn read_line(&mut self) -> io::Result<String>;

    /// Writes one complete frame.
    fn write(&mut self, frame: &str) -> io::Result<()>;
}

/// A [`Link`] behind a lock; every operation holds the bus lock for its duration.
pub struct GuardedLink<L> {
    link: Mutex<L>,
    bus: Arc<Mutex<()>>,
}

impl<L: Link> GuardedLink<L> {
    pub fn new(link: L) -> Self {
        Self::with_bus(link, Arc::new(Mutex::new(())))
    }

    /// Shares `bus` with other links on the same physical interface.
    pub fn with_bus(link: L, bus: Arc<Mutex<()>>) -> Self {
        Self {
            link: Mutex::new(link),
            bus,
        }
    }

    fn guarded<R>(&self, op: impl FnOnce(&mut L) -> R) -> R {
        let _bus = self.bus.lock();
        op(&mut self.link.lock())
    }

    pub fn open(&self) -> io::Result<()> {
        self.guarded(|l| l.open())
    }

    pub fn close(&self) -> io::Result<()> {
        self.guarded(|l| l.close())
    }

    pub fn bytes_available(&self) -> io::Result<usize> {
        self.guarded(|l| l.bytes_available())
    }

    pub fn read_line(&self) -> io::Result<String> {
        self.guarded(|l| l.read_line())
    }

    pub fn write(&self, frame: &str) -> io::Result<()> {
        self.guarded(|l| l.write(frame))
    }
}

type Queue = Arc<Mutex<VecDeque<String>>>;

/// Shared in-memory broadcast medium. Every frame written by one station is
/// queued at every other station. Clones refer to the same medium.
#[derive(Clone, Default)]
pub struct Ether {
    stations: Arc<Mutex<Vec<Queue>>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl Ether {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new station to the medium.
    pub fn station(&self) -> MemoryLink {
        let rx: Queue = Arc::default();
        let mut stations = self.stations.lock();
        stations.push(Arc::clone(&rx));
        MemoryLink {
            ether: self.clone(),
            index: stations.len() - 1,
            rx,
            open: false,
        }
    }

    /// Puts a raw frame on the air, as if sent by a station outside the swarm.
    pub fn inject(&self, frame: &str) {
        for rx in self.stations.lock().iter() {
            rx.lock().push_back(frame.to_string());
        }
    }

    /// Every frame transmitted by a station so far, in order.
    pub fn transmissions(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn broadcast(&self, from: usize, frame: &str) {
        self.log.lock().push(frame.to_string());
        for (i, rx) in self.stations.lock().iter().enumerate() {
            if i != from {
                rx.lock().push_back(frame.to_string());
            }
        }
    }
}

/// One station on an [`Ether`].
pub struct MemoryLink {
    ether: Ether,
    index: usize,
    rx: Queue,
    open: bool,
}

impl Link for MemoryLink {
    fn open(&mut self) -> io::Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.open = false;
        Ok(())
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.rx.lock().iter().map(String::len).sum())
    }

    fn read_line(&mut self) -> io::Result<String> {
        Ok(self.rx.lock().pop_front().unwrap_or_default())
    }

    fn write(&mut self, frame: &str) -> io::Result<()> {
        if !self.open {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "station is not open",
            ));
        }
        self.ether.broadcast(self.index, frame);
        Ok(())
    }
}
