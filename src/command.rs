//! Listener command surface
//!
//! Other parts of the process drive a running listener through a typed
//! command channel. The loop drains at most one command per iteration and
//! answers on the command's oneshot.
//!
//! | Command | Response |
//! |---------|----------|
//! | `Connect` | `()` after the (re)connect attempt |
//! | `GetConnected` | `bool` |
//! | `GetStatus` | `ListenerStatus` |
//! | `CreateTap` | `()` once registered |
//!
//! Every call has an async form and a `blocking_` form for plain threads.

use crate::error::{ListenerError, Result};
use crate::status::{ListenerStatus, StatusBoard};
use crate::tap::Tap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub enum ListenerCommand {
    Connect {
        response_tx: oneshot::Sender<()>,
    },
    GetConnected {
        response_tx: oneshot::Sender<bool>,
    },
    GetStatus {
        response_tx: oneshot::Sender<Result<ListenerStatus>>,
    },
    CreateTap {
        tap: Box<dyn Tap>,
        subscriber: String,
        response_tx: oneshot::Sender<Result<()>>,
    },
}

impl std::fmt::Debug for ListenerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerCommand::Connect { .. } => write!(f, "Connect"),
            ListenerCommand::GetConnected { .. } => write!(f, "GetConnected"),
            ListenerCommand::GetStatus { .. } => write!(f, "GetStatus"),
            ListenerCommand::CreateTap { subscriber, .. } => {
                write!(f, "CreateTap({})", subscriber)
            }
        }
    }
}

/// Cloneable handle to a spawned listener
#[derive(Clone)]
pub struct ListenerHandle {
    tx: mpsc::UnboundedSender<ListenerCommand>,
    running: Arc<AtomicBool>,
    status: Arc<StatusBoard>,
}

impl ListenerHandle {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<ListenerCommand>,
        running: Arc<AtomicBool>,
        status: Arc<StatusBoard>,
    ) -> Self {
        ListenerHandle {
            tx,
            running,
            status,
        }
    }

    fn send(&self, cmd: ListenerCommand) -> Result<()> {
        self.tx.send(cmd).map_err(|_| ListenerError::ListenerClosed)
    }

    pub async fn connect(&self) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ListenerCommand::Connect { response_tx })?;
        response_rx.await.map_err(|_| ListenerError::ListenerClosed)
    }

    pub async fn get_connected(&self) -> Result<bool> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ListenerCommand::GetConnected { response_tx })?;
        response_rx.await.map_err(|_| ListenerError::ListenerClosed)
    }

    pub async fn get_status(&self) -> Result<ListenerStatus> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ListenerCommand::GetStatus { response_tx })?;
        response_rx.await.map_err(|_| ListenerError::ListenerClosed)?
    }

    pub async fn create_tap(&self, tap: Box<dyn Tap>, subscriber: &str) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ListenerCommand::CreateTap {
            tap,
            subscriber: subscriber.to_string(),
            response_tx,
        })?;
        response_rx.await.map_err(|_| ListenerError::ListenerClosed)?
    }

    /// Must not be called from inside an async context
    pub fn blocking_connect(&self) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ListenerCommand::Connect { response_tx })?;
        response_rx
            .blocking_recv()
            .map_err(|_| ListenerError::ListenerClosed)
    }

    /// Must not be called from inside an async context
    pub fn blocking_get_connected(&self) -> Result<bool> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ListenerCommand::GetConnected { response_tx })?;
        response_rx
            .blocking_recv()
            .map_err(|_| ListenerError::ListenerClosed)
    }

    /// Must not be called from inside an async context
    pub fn blocking_get_status(&self) -> Result<ListenerStatus> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ListenerCommand::GetStatus { response_tx })?;
        response_rx
            .blocking_recv()
            .map_err(|_| ListenerError::ListenerClosed)?
    }

    /// Must not be called from inside an async context
    pub fn blocking_create_tap(&self, tap: Box<dyn Tap>, subscriber: &str) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ListenerCommand::CreateTap {
            tap,
            subscriber: subscriber.to_string(),
            response_tx,
        })?;
        response_rx
            .blocking_recv()
            .map_err(|_| ListenerError::ListenerClosed)?
    }

    /// Status straight from the facade, without a loop round-trip
    pub fn status(&self) -> Result<ListenerStatus> {
        self.status.snapshot()
    }

    /// Withdraw the keep-running flag; the loop exits after its current iteration
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
