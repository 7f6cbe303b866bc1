//! Error types for the emberlog engine.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in emberlog engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Segment buffer fails structural validation or contains a corrupt entry.
    #[error("segment corruption: {message}")]
    SegmentCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Segment buffer is not a valid segment.
    #[error("invalid segment format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Declared segment capacity does not match the buffer handed to the iterator.
    #[error("segment capacity mismatch: header declares {declared} bytes, buffer is {actual}")]
    CapacityMismatch {
        /// Capacity declared in the segment header.
        declared: u64,
        /// Actual buffer length.
        actual: u64,
    },

    /// Seglet pool cannot satisfy a reservation.
    #[error("seglet pool exhausted: requested {requested}, available {available}")]
    SegletPoolExhausted {
        /// Seglets requested.
        requested: u32,
        /// Seglets currently free.
        available: u32,
    },

    /// Segment geometry is inconsistent.
    #[error("invalid segment geometry: {message}")]
    InvalidGeometry {
        /// Description of the geometry issue.
        message: String,
    },

    /// Configuration value is out of range.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration issue.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl EngineError {
    /// Creates a segment corruption error.
    pub fn segment_corruption(message: impl Into<String>) -> Self {
        Self::SegmentCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid geometry error.
    pub fn invalid_geometry(message: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
