//! Port listener
//!
//! Reads raw bytes from a TCP bridge, packs them into fixed-width batches and
//! hands each full (or stale) set to persistence and to registered taps.

pub mod batch;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod observability;
pub mod persistence;
pub mod reporting;
pub mod status;
pub mod tap;
pub mod transport;

pub use batch::{BatchSet, BatchSnapshot};
pub use command::ListenerHandle;
pub use config::{ListenerConfig, TimingConfig};
pub use error::{ListenerError, Result};
pub use listener::PortListener;
pub use persistence::{ByteDataSink, InMemoryByteStore, LocalFsByteStore, TableSchema};
pub use reporting::{RecordingReporter, Severity, StatusReporter, TracingReporter};
pub use status::{ListenerStatus, LoopState, Subscribers};
pub use tap::{Tap, TapError};
pub use transport::{SimulatedLink, TcpConnector};
