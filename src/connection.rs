//! Connection Manager
//!
//! Owns the stream to the bridge. `connect` and `close` never fail outward:
//! every outcome becomes a state transition plus diagnostics on the
//! `StatusReporter`. Retry timing belongs to the ingestion loop.

use crate::reporting::{LoggerEvent, Severity, StatusReporter};
use crate::transport::Connector;
use std::sync::Arc;
use tracing::{info, warn};

/// Annotation shown next to the source while the link is down
pub const NOT_CONNECTED: &str = " Not Connected!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

pub struct ConnectionManager<C: Connector> {
    connector: C,
    source_name: String,
    target: String,
    stream: Option<C::Stream>,
    /// Set once the permanent "connected" event has been sent
    first_connection_logged: bool,
    connections: u64,
    reporter: Arc<dyn StatusReporter>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(
        connector: C,
        source_name: &str,
        target: &str,
        reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        ConnectionManager {
            connector,
            source_name: source_name.to_string(),
            target: target.to_string(),
            stream: None,
            first_connection_logged: false,
            connections: 0,
            reporter,
        }
    }

    pub fn state(&self) -> ConnectionState {
        if self.stream.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Successful connections so far
    pub fn connections(&self) -> u64 {
        self.connections
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn stream_mut(&mut self) -> Option<&mut C::Stream> {
        self.stream.as_mut()
    }

    /// Open a fresh stream, replacing any current one. Returns true on success.
    pub async fn connect(&mut self) -> bool {
        self.reporter.print_message(
            &format!("Connecting to port at {}", self.target),
            Severity::Info,
        );
        self.stream = None;

        match self.connector.connect(&self.target).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.connections = self.connections.saturating_add(1);

                if !self.first_connection_logged {
                    self.reporter.send_message_permanent(LoggerEvent::now(format!(
                        "Serial port connected for listening at {}",
                        self.target
                    )));
                    self.first_connection_logged = true;
                }
                info!(
                    source = %self.source_name,
                    target = %self.target,
                    connections = self.connections,
                    "connected"
                );
                true
            }
            Err(e) => {
                self.reporter.print_message(
                    &format!("Could not connect to {}: {}", self.target, e),
                    Severity::Warning,
                );
                self.reporter
                    .report_additional_status(&self.source_name, NOT_CONNECTED);
                warn!(
                    source = %self.source_name,
                    target = %self.target,
                    "connect failed: {}", e
                );
                false
            }
        }
    }

    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            info!(source = %self.source_name, target = %self.target, "connection closed");
        }
        self.reporter
            .report_additional_status(&self.source_name, NOT_CONNECTED);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting::RecordingReporter;
    use crate::transport::SimulatedLink;

    fn manager(
        link: &SimulatedLink,
        reporter: &RecordingReporter,
    ) -> ConnectionManager<crate::transport::SimulatedConnector> {
        ConnectionManager::new(
            link.connector(),
            "uart0",
            "10.0.0.5:4001",
            Arc::new(reporter.clone()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_emit_one_diagnostic_each() {
        let link = SimulatedLink::refusing();
        let reporter = RecordingReporter::new();
        let mut conn = manager(&link, &reporter);

        for _ in 0..4 {
            assert!(!conn.connect().await);
            assert_eq!(conn.state(), ConnectionState::Disconnected);
        }
        assert_eq!(reporter.count_messages("Could not connect"), 4);
        assert_eq!(reporter.additional_status().len(), 4);
        assert!(reporter
            .additional_status()
            .iter()
            .all(|(source, text)| source == "uart0" && text == NOT_CONNECTED));
        assert!(reporter.permanent().is_empty());

        link.set_accepting(true);
        assert!(conn.connect().await);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_connection_logged_once() {
        let link = SimulatedLink::new();
        let reporter = RecordingReporter::new();
        let mut conn = manager(&link, &reporter);

        assert!(conn.connect().await);
        conn.close();
        assert!(!conn.is_connected());
        assert!(conn.connect().await);
        assert!(conn.connect().await);

        assert_eq!(conn.connections(), 3);
        let permanent = reporter.permanent();
        assert_eq!(permanent.len(), 1);
        assert!(permanent[0].message.contains("10.0.0.5:4001"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_reports_not_connected() {
        let link = SimulatedLink::new();
        let reporter = RecordingReporter::new();
        let mut conn = manager(&link, &reporter);

        assert!(conn.connect().await);
        conn.close();
        assert_eq!(
            reporter.additional_status(),
            vec![("uart0".to_string(), NOT_CONNECTED.to_string())]
        );
    }
}
