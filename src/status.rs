//! Status Facade
//!
//! Read-only view of a listener for monitoring pages. The ingestion loop
//! publishes link state here; any thread may take a snapshot.

use crate::error::{ListenerError, Result};
use crate::tap::TapRegistry;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::Duration;

/// Link parameters that only exist on a physical serial line
pub const NOT_APPLICABLE: &str = "NA";
pub const NO_SUBSCRIBERS: &str = "No Subscribers";

/// Lifecycle of the ingestion loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum LoopState {
    #[default]
    Starting,
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscribers {
    Names(Vec<String>),
    NoSubscribers,
}

impl Subscribers {
    fn from_names(names: Vec<String>) -> Self {
        if names.is_empty() {
            Subscribers::NoSubscribers
        } else {
            Subscribers::Names(names)
        }
    }
}

impl Serialize for Subscribers {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Subscribers::Names(names) => names.serialize(serializer),
            Subscribers::NoSubscribers => NO_SUBSCRIBERS.serialize(serializer),
        }
    }
}

/// Snapshot returned by `get_status_web`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerStatus {
    #[serde(rename = "port")]
    pub source_name: String,
    pub target: String,
    pub state: LoopState,
    pub connected: bool,
    pub connections: u64,
    pub baud_rate: &'static str,
    pub stopbits: &'static str,
    pub subscribers: Subscribers,
}

#[derive(Debug, Default)]
struct LinkStatus {
    state: LoopState,
    connected: bool,
    connections: u64,
}

#[derive(Debug)]
pub struct StatusBoard {
    source_name: String,
    target: String,
    lock_timeout: Duration,
    link: Mutex<LinkStatus>,
    taps: Arc<TapRegistry>,
}

impl StatusBoard {
    pub fn new(
        source_name: &str,
        target: &str,
        lock_timeout: Duration,
        taps: Arc<TapRegistry>,
    ) -> Self {
        StatusBoard {
            source_name: source_name.to_string(),
            target: target.to_string(),
            lock_timeout,
            link: Mutex::new(LinkStatus::default()),
            taps,
        }
    }

    fn lock_timeout_error(&self) -> ListenerError {
        ListenerError::LockTimeout {
            lock: "status",
            source_name: self.source_name.clone(),
        }
    }

    pub fn record_link(&self, connected: bool, connections: u64) -> Result<()> {
        let mut link = self
            .link
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| self.lock_timeout_error())?;
        link.connected = connected;
        link.connections = connections;
        Ok(())
    }

    pub fn record_state(&self, state: LoopState) -> Result<()> {
        let mut link = self
            .link
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| self.lock_timeout_error())?;
        link.state = state;
        Ok(())
    }

    pub fn snapshot(&self) -> Result<ListenerStatus> {
        let (state, connected, connections) = {
            let link = self
                .link
                .try_lock_for(self.lock_timeout)
                .ok_or_else(|| self.lock_timeout_error())?;
            (link.state, link.connected, link.connections)
        };
        let subscribers = Subscribers::from_names(self.taps.snapshot_subscribers()?);

        Ok(ListenerStatus {
            source_name: self.source_name.clone(),
            target: self.target.clone(),
            state,
            connected,
            connections,
            baud_rate: NOT_APPLICABLE,
            stopbits: NOT_APPLICABLE,
            subscribers,
        })
    }
}
