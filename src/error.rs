//! Listener Error Types
//!
//! Errors that cross the listener's public boundary. Connection failures and
//! read errors never appear here: the ingestion loop turns those into state
//! transitions and diagnostics instead.

use std::io::Error as IoError;

/// Error type for listener construction and command execution
#[derive(Debug)]
pub enum ListenerError {
    /// Batch size outside the supported range
    InvalidBatchSize {
        batch_size: usize,
        min: usize,
        max: usize,
    },
    /// Any other rejected configuration value
    InvalidConfig(String),
    /// A bounded lock acquisition ran out of time
    LockTimeout {
        lock: &'static str,
        source_name: String,
    },
    /// The ingestion loop is gone (stopped or dropped its command channel)
    ListenerClosed,
    /// Configuration file could not be read
    Io(IoError),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::InvalidBatchSize {
                batch_size,
                min,
                max,
            } => write!(
                f,
                "The given batch size {} is not within bounds, max allowed {} min allowed {}",
                batch_size, max, min
            ),
            ListenerError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            ListenerError::LockTimeout { lock, source_name } => write!(
                f,
                "Port listener {} could not acquire {} lock",
                source_name, lock
            ),
            ListenerError::ListenerClosed => write!(f, "Port listener is not running"),
            ListenerError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for ListenerError {
    fn from(e: IoError) -> Self {
        ListenerError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, ListenerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_message_names_bounds() {
        let err = ListenerError::InvalidBatchSize {
            batch_size: 8,
            min: 16,
            max: 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("8"));
        assert!(msg.contains("1024"));
        assert!(msg.contains("16"));
    }

    #[test]
    fn test_lock_timeout_names_source() {
        let err = ListenerError::LockTimeout {
            lock: "tap requests",
            source_name: "bridge-a".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Port listener bridge-a could not acquire tap requests lock"
        );
    }
}
