//! Simulated bridge link for deterministic testing
//!
//! A `SimulatedLink` stands in for the remote serial-to-network bridge. Tests
//! hold the link and script it:
//! - refuse or accept connection attempts
//! - push bytes for the connected stream to read
//! - break the current connection (next read fails with `ConnectionReset`)
//!
//! Reads wait on a `Notify` under `tokio::time::timeout`, so with tokio's
//! paused clock the whole listener runs in virtual time.

use super::{ByteStream, Connector};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug)]
struct LinkState {
    accepting: bool,
    connect_attempts: u64,
    connections: u64,
    /// Bumped on every successful connect; older streams become stale
    generation: u64,
    broken: bool,
    pending: VecDeque<u8>,
}

#[derive(Debug, Clone)]
pub struct SimulatedLink {
    state: Arc<Mutex<LinkState>>,
    notify: Arc<Notify>,
}

impl Default for SimulatedLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLink {
    /// New link that accepts connections
    pub fn new() -> Self {
        SimulatedLink {
            state: Arc::new(Mutex::new(LinkState {
                accepting: true,
                connect_attempts: 0,
                connections: 0,
                generation: 0,
                broken: false,
                pending: VecDeque::new(),
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// New link whose bridge is down
    pub fn refusing() -> Self {
        let link = Self::new();
        link.set_accepting(false);
        link
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.state.lock().accepting = accepting;
    }

    pub fn connector(&self) -> SimulatedConnector {
        SimulatedConnector { link: self.clone() }
    }

    /// Queue bytes from the bridge
    pub fn push(&self, bytes: &[u8]) {
        self.state.lock().pending.extend(bytes.iter().copied());
        self.notify.notify_one();
    }

    /// Fail the current connection on its next read
    pub fn break_link(&self) {
        self.state.lock().broken = true;
        self.notify.notify_one();
    }

    pub fn connect_attempts(&self) -> u64 {
        self.state.lock().connect_attempts
    }

    pub fn connections(&self) -> u64 {
        self.state.lock().connections
    }

    /// Bytes pushed but not yet read
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn try_read(&self, generation: u64, buf: &mut [u8]) -> IoResult<usize> {
        let mut state = self.state.lock();
        if state.broken || state.generation != generation {
            return Err(IoError::new(ErrorKind::ConnectionReset, "Connection reset"));
        }

        let n = buf.len().min(state.pending.len());
        for (slot, byte) in buf.iter_mut().zip(state.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    link: SimulatedLink,
}

impl Connector for SimulatedConnector {
    type Stream = SimulatedStream;

    fn connect<'a>(
        &'a mut self,
        _addr: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Self::Stream>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.link.state.lock();
            state.connect_attempts += 1;

            if !state.accepting {
                return Err(IoError::new(ErrorKind::ConnectionRefused, "Connection refused"));
            }

            state.generation += 1;
            state.connections += 1;
            state.broken = false;

            Ok(SimulatedStream {
                link: self.link.clone(),
                generation: state.generation,
            })
        })
    }
}

#[derive(Debug)]
pub struct SimulatedStream {
    link: SimulatedLink,
    generation: u64,
}

impl ByteStream for SimulatedStream {
    fn read_within<'a>(
        &'a mut self,
        buf: &'a mut [u8],
        wait: Duration,
    ) -> Pin<Box<dyn Future<Output = IoResult<Option<usize>>> + Send + 'a>> {
        Box::pin(async move {
            let n = self.link.try_read(self.generation, buf)?;
            if n > 0 {
                return Ok(Some(n));
            }

            let notify = self.link.notify.clone();
            match tokio::time::timeout(wait, notify.notified()).await {
                Err(_) => Ok(None),
                Ok(()) => self.link.try_read(self.generation, buf).map(Some),
            }
        })
    }
}
