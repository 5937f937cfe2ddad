//! Error types for bridge operations

use std::time::Duration;
use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, PistormError>;

/// Errors that can occur during bridge operations
#[derive(Debug, Error)]
pub enum PistormError {
    /// The handshake line never cleared within the timeout policy
    #[error("{operation} timed out after {duration_ms}ms waiting for the bus handshake")]
    Timeout {
        /// Transaction that was in flight
        operation: &'static str,
        /// Timeout policy in effect, in milliseconds
        duration_ms: u64,
    },

    /// Bad width, unknown flag, out-of-range batch count or malformed config
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was rejected
        reason: String,
    },

    /// No usable session: the mapping or device node could not be opened,
    /// or SETUP has not succeeded yet
    #[error("Device unavailable: {reason}")]
    DeviceUnavailable {
        /// Reason for failure
        reason: String,
    },

    /// The bus clock generator could not be started
    #[error("Bus clock not ready: {reason}")]
    ClockNotReady {
        /// Reason for failure
        reason: String,
    },

    /// An op inside a batch failed; ops before `completed` took effect
    #[error("Batch stopped after {completed} ops: {source}")]
    BatchFailed {
        /// Number of ops that completed and were written back
        completed: usize,
        /// Failure of the op at index `completed`
        source: Box<PistormError>,
    },

    /// I/O error from a device node or ioctl
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl PistormError {
    /// Create a timeout error
    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout {
            operation,
            duration_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a device unavailable error
    pub fn device_unavailable(reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a clock not ready error
    pub fn clock_not_ready(reason: impl Into<String>) -> Self {
        Self::ClockNotReady {
            reason: reason.into(),
        }
    }

    /// Wrap the failure of op `completed` inside a batch
    pub fn batch_failed(completed: usize, source: Self) -> Self {
        Self::BatchFailed {
            completed,
            source: Box::new(source),
        }
    }

    /// Whether this error (or the op failure inside a batch error) is a timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::BatchFailed { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_reports_milliseconds() {
        let err = PistormError::timeout("read16", Duration::from_millis(500));
        assert!(matches!(err, PistormError::Timeout { duration_ms: 500, .. }));
        assert!(err.to_string().contains("read16"));
    }

    #[test]
    fn batch_failure_carries_inner_timeout() {
        let err = PistormError::batch_failed(3, PistormError::timeout("write8", Duration::from_millis(1)));
        assert!(err.is_timeout());
        assert!(err.to_string().starts_with("Batch stopped after 3 ops"));
    }
}
