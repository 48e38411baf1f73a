//! Status and log reporting collaborator
//!
//! The listener never writes to a display directly. Everything user-visible
//! goes through a `StatusReporter`:
//!
//! - `print_message`: transient diagnostics with a severity
//! - `report_additional_status`: short annotation shown next to the source
//! - `send_message_permanent`: events kept in the permanent log
//! - `report_bytes`: the once-per-window byte counts
//!
//! `TracingReporter` renders these as tracing events for the binary.
//! `RecordingReporter` keeps them in memory for tests and embedding.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Milliseconds since the Unix epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Bytes received by one source during one reporting window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ByteCountReport {
    pub source_name: String,
    pub timestamp_ms: u64,
    pub byte_count: u64,
}

/// Event destined for the permanent log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggerEvent {
    pub message: String,
    pub timestamp_ms: u64,
}

impl LoggerEvent {
    pub fn now(message: String) -> Self {
        LoggerEvent {
            message,
            timestamp_ms: unix_millis(),
        }
    }
}

pub trait StatusReporter: Send + Sync + 'static {
    fn print_message(&self, message: &str, severity: Severity);
    fn report_additional_status(&self, source_name: &str, text: &str);
    fn send_message_permanent(&self, event: LoggerEvent);
    fn report_bytes(&self, report: ByteCountReport);
}

/// Reporter that forwards everything to `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingReporter;

impl StatusReporter for TracingReporter {
    fn print_message(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Debug => debug!("{}", message),
            Severity::Info => info!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }
    }

    fn report_additional_status(&self, source_name: &str, text: &str) {
        info!(source = source_name, "status:{}", text);
    }

    fn send_message_permanent(&self, event: LoggerEvent) {
        info!(timestamp_ms = event.timestamp_ms, permanent = true, "{}", event.message);
    }

    fn report_bytes(&self, report: ByteCountReport) {
        debug!(
            source = %report.source_name,
            timestamp_ms = report.timestamp_ms,
            bytes = report.byte_count,
            "byte count"
        );
    }
}

#[derive(Debug, Default)]
struct Recorded {
    messages: Vec<(String, Severity)>,
    additional_status: Vec<(String, String)>,
    permanent: Vec<LoggerEvent>,
    byte_reports: Vec<ByteCountReport>,
}

/// In-memory reporter; clones share the same record
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, Severity)> {
        self.inner.lock().messages.clone()
    }

    pub fn additional_status(&self) -> Vec<(String, String)> {
        self.inner.lock().additional_status.clone()
    }

    pub fn permanent(&self) -> Vec<LoggerEvent> {
        self.inner.lock().permanent.clone()
    }

    pub fn byte_reports(&self) -> Vec<ByteCountReport> {
        self.inner.lock().byte_reports.clone()
    }

    /// Number of messages containing `needle`
    pub fn count_messages(&self, needle: &str) -> usize {
        self.inner
            .lock()
            .messages
            .iter()
            .filter(|(m, _)| m.contains(needle))
            .count()
    }
}

impl StatusReporter for RecordingReporter {
    fn print_message(&self, message: &str, severity: Severity) {
        self.inner.lock().messages.push((message.to_string(), severity));
    }

    fn report_additional_status(&self, source_name: &str, text: &str) {
        self.inner
            .lock()
            .additional_status
            .push((source_name.to_string(), text.to_string()));
    }

    fn send_message_permanent(&self, event: LoggerEvent) {
        self.inner.lock().permanent.push(event);
    }

    fn report_bytes(&self, report: ByteCountReport) {
        self.inner.lock().byte_reports.push(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_reporter_shared_between_clones() {
        let reporter = RecordingReporter::new();
        let clone = reporter.clone();

        clone.print_message("Could not connect refused", Severity::Warning);
        clone.report_additional_status("uart0", " Not Connected!");
        clone.report_bytes(ByteCountReport {
            source_name: "uart0".to_string(),
            timestamp_ms: 1,
            byte_count: 12,
        });

        assert_eq!(reporter.count_messages("Could not connect"), 1);
        assert_eq!(
            reporter.additional_status(),
            vec![("uart0".to_string(), " Not Connected!".to_string())]
        );
        assert_eq!(reporter.byte_reports()[0].byte_count, 12);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Info > Severity::Debug);
    }
}
