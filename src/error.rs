//! Error types for Vixel
//!
//! Only the offline path can fail. The real-time pipeline (analyzer, beat
//! detector, particle simulation) clamps its inputs and never returns errors.

use thiserror::Error;

/// Main error type for the analysis core
#[derive(Error, Debug)]
pub enum VixelError {
    #[error("Failed to decode audio: the file may be corrupted or in an unsupported format ({0})")]
    Decode(String),

    #[error("Audio is {duration:.1}s long, above the {limit:.1}s scan limit")]
    TooLong { duration: f64, limit: f64 },

    #[error("Pre-scan cancelled")]
    Cancelled,

    #[error("Scan task failed: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VixelError {
    /// Cancellation is reported through the error channel but is not a failure;
    /// hosts discard it without surfacing anything to the user.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, VixelError::Cancelled)
    }
}

/// Result type alias for Vixel
pub type Result<T> = std::result::Result<T, VixelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_message_mentions_format() {
        let err = VixelError::Decode("bad header".to_string());
        let msg = err.to_string();
        assert!(msg.contains("corrupted or in an unsupported format"));
        assert!(msg.contains("bad header"));
        assert!(!err.is_cancellation());
    }

    #[test]
    fn test_cancellation_flag() {
        assert!(VixelError::Cancelled.is_cancellation());
        assert!(!VixelError::Task("join".into()).is_cancellation());
    }
}
