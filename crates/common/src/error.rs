//! Central error type for the decode pipeline (thiserror-based).

use thiserror::Error;

use crate::status::HwStatus;

/// Errors surfaced by the decode pipeline.
///
/// Waiting past the configured timeout is not an error: it is reported
/// through the statistics of the session.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("No frame decoded")]
    NoFrameDecoded,

    #[error("Buffer accounting violation: {reason}")]
    BufferAccountingViolation { reason: String },

    #[error("Metadata clone failure: {reason}")]
    MetadataCloneFailure { reason: String },

    #[error("Hardware error: {0}")]
    HardwareError(HwStatus),

    #[error("Hardware warning treated as error: {0}")]
    HardwareWarning(HwStatus),

    #[error("Pool '{name}' initialization failed: {reason}")]
    PoolInit { name: String, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unsupported conversion from {from} to {to}")]
    UnsupportedConversion { from: String, to: String },

    #[error("Reader failed: {0}")]
    ReaderFailed(String),

    #[error("Engine creation failed: {0}")]
    EngineCreation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    pub fn accounting(reason: impl Into<String>) -> Self {
        Self::BufferAccountingViolation {
            reason: reason.into(),
        }
    }

    pub fn metadata(reason: impl Into<String>) -> Self {
        Self::MetadataCloneFailure {
            reason: reason.into(),
        }
    }

    /// Map an engine status to the error it raises, if any.
    ///
    /// Warnings only become errors when `warnings_are_errors` is set.
    pub fn from_status(status: HwStatus, warnings_are_errors: bool) -> Option<Self> {
        if status.is_error() {
            Some(Self::HardwareError(status))
        } else if status.is_warning() && warnings_are_errors {
            Some(Self::HardwareWarning(status))
        } else {
            None
        }
    }
}

/// Result alias for pipeline operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_honours_policy() {
        assert!(matches!(
            DecodeError::from_status(HwStatus::NoMemory, false),
            Some(DecodeError::HardwareError(HwStatus::NoMemory))
        ));
        assert!(DecodeError::from_status(HwStatus::ConcealDetect, false).is_none());
        assert!(matches!(
            DecodeError::from_status(HwStatus::ConcealDetect, true),
            Some(DecodeError::HardwareWarning(_))
        ));
        assert!(DecodeError::from_status(HwStatus::Success, true).is_none());
    }

    #[test]
    fn display_messages() {
        let err = DecodeError::accounting("buffer 3 returned twice");
        assert_eq!(
            err.to_string(),
            "Buffer accounting violation: buffer 3 returned twice"
        );
        assert_eq!(DecodeError::NoFrameDecoded.to_string(), "No frame decoded");
    }
}
