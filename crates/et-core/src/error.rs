//! Error types for the envelope tracking bench

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Driver diagnostic raised when an ACP result is fetched before the
/// analysis thread has finished with it.
pub const RESULT_NOT_READY_CODE: i32 = -380405;

/// Result type for bench operations
pub type EtResult<T> = Result<T, EtError>;

/// Errors that can occur while sweeping and collecting measurements
#[derive(Error, Debug)]
pub enum EtError {
    /// Analysis for this result has not finished yet
    #[error("Result '{result_name}' not ready (driver code {RESULT_NOT_READY_CODE})")]
    TransientNotReady { result_name: String },

    /// A bounded wait expired
    #[error("Timeout waiting for {operation} after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    /// Invalid parameter or call made in the wrong lifecycle state
    #[error("Configuration error: {0}")]
    Config(String),

    /// Fetch requested for a result name that was never initiated
    #[error("Result '{0}' was never initiated")]
    NotInitiated(String),

    /// Fetch requested twice for the same result name
    #[error("Result '{0}' was already fetched")]
    AlreadyFetched(String),

    /// Initiate requested with a result name already in use
    #[error("Result name '{0}' is already in use")]
    DuplicateResultName(String),

    /// Operation attempted on a closed session
    #[error("Measurement session is closed")]
    SessionClosed,

    /// Any other failure reported by an instrument driver
    #[error("Driver error {code}: {message}")]
    Driver { code: i32, message: String },

    /// Signal generator failure
    #[error("Generator error: {0}")]
    Generator(String),

    /// Synchronization failure
    #[error("Synchronization error: {0}")]
    Synchronization(String),

    /// A fetched record held no offset data
    #[error("Result '{0}' contains no offset measurements")]
    EmptyResult(String),

    /// The overlapped collection lane stopped unexpectedly
    #[error("Collector lane failed: {0}")]
    CollectorLane(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid configuration file: {0}")]
    Json(#[from] serde_json::Error),
}

impl EtError {
    /// Classify a raw driver status. The not-ready code becomes
    /// [`EtError::TransientNotReady`], everything else stays a driver error.
    pub fn from_driver(code: i32, message: impl Into<String>, result_name: &str) -> Self {
        if code == RESULT_NOT_READY_CODE {
            EtError::TransientNotReady {
                result_name: result_name.to_string(),
            }
        } else {
            EtError::Driver {
                code,
                message: message.into(),
            }
        }
    }

    /// Check if this error is recovered inside the measurement session
    pub fn is_transient(&self) -> bool {
        matches!(self, EtError::TransientNotReady { .. })
    }

    /// Check if this error must abort the run
    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }

    /// Check if this is a wait timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, EtError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_code_is_transient() {
        let err = EtError::from_driver(RESULT_NOT_READY_CODE, "not ready", "r3");
        assert!(err.is_transient());
        assert!(!err.is_fatal());
        match err {
            EtError::TransientNotReady { result_name } => assert_eq!(result_name, "r3"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_other_codes_are_fatal() {
        let err = EtError::from_driver(-200279, "buffer overwritten", "r0");
        assert!(err.is_fatal());
        assert!(matches!(err, EtError::Driver { code: -200279, .. }));
    }

    #[test]
    fn test_message_text_does_not_classify() {
        // The code alone decides; a message mentioning the code is not enough.
        let err = EtError::from_driver(-1, "see -380405", "r0");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_timeout_display() {
        let err = EtError::Timeout {
            operation: "acquisition complete".into(),
            timeout: Duration::from_secs(10),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("acquisition complete"));
    }
}
