//! Background loop threads with a bounded join, and the global awake gate.
//!
//! Loops are cooperative: they poll a shared flag and return on their own.
//! [`BackgroundLoop::join_within`] waits for that with a deadline; a loop still
//! running after the deadline is reported as a [`ShutdownError`].

use crate::error::ShutdownError;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// A named thread whose completion can be awaited with a timeout.
pub struct BackgroundLoop {
    name: String,
    handle: Option<JoinHandle<()>>,
    // Disconnects when the thread exits, including by panic.
    done: Receiver<()>,
}

impl BackgroundLoop {
    pub fn spawn<F>(name: impl Into<String>, body: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let (done_tx, done) = channel::bounded::<()>(0);
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let _done = done_tx;
            body();
        })?;
        debug!(loop_name = %name, "background loop started");
        Ok(Self {
            name,
            handle: Some(handle),
            done,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits up to `timeout` for the loop to return.
    pub fn join_within(mut self, timeout: Duration) -> Result<(), ShutdownError> {
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => Err(ShutdownError {
                name: self.name.clone(),
                timeout,
            }),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take()
                    && handle.join().is_err()
                {
                    error!(loop_name = %self.name, "background loop panicked");
                }
                debug!(loop_name = %self.name, "background loop joined");
                Ok(())
            }
        }
    }
}

/// Two-state gate shared by every loop of one radio.
///
/// While asleep, loops block in [`wait`](Self::wait) instead of transmitting or
/// receiving; threads stay alive.
#[derive(Debug)]
pub struct AwakeGate {
    awake: Mutex<bool>,
    changed: Condvar,
}

impl Default for AwakeGate {
    fn default() -> Self {
        Self {
            awake: Mutex::new(true),
            changed: Condvar::new(),
        }
    }
}

impl AwakeGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_awake(&self) -> bool {
        *self.awake.lock()
    }

    pub fn wake(&self) {
        *self.awake.lock() = true;
        self.changed.notify_all();
    }

    /// Closes the gate. Returns `true` if it was open.
    pub fn sleep(&self) -> bool {
        std::mem::replace(&mut *self.awake.lock(), false)
    }

    /// Blocks until the gate is open.
    pub fn wait(&self) {
        let mut awake = self.awake.lock();
        while !*awake {
            self.changed.wait(&mut awake);
        }
    }
}
