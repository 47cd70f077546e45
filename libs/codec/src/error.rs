//! Frame-level errors for CD1.1 decoding and encoding
//!
//! Every variant carries enough context to diagnose a bad frame from a log line
//! alone: which field, how many bytes were needed, and where in the frame.

use crate::frame::FrameType;
use thiserror::Error;

/// CD1.1 frame errors with diagnostic context
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is too small to contain the expected structure
    #[error("Frame too small: need {need} bytes, got {got} (context: {context})")]
    FrameTooSmall {
        need: usize,
        got: usize,
        context: String,
    },

    /// Header frame type is not part of the protocol
    #[error("Unknown frame type {frame_type}: valid types are 1-9 and 13")]
    UnknownFrameType { frame_type: i32 },

    /// Trailer offset points outside the frame
    #[error("Invalid trailer offset {offset}: must be within {min}..={max} (indicates: {diagnosis})")]
    InvalidTrailerOffset {
        offset: i64,
        min: usize,
        max: usize,
        diagnosis: String,
    },

    /// Trailer authentication size is negative or oversized
    #[error("Invalid authentication size {size} (limit {limit})")]
    InvalidAuthSize { size: i64, limit: usize },

    /// A field runs past the end of the available bytes
    #[error("Truncated {field}: need {need} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        need: usize,
        remaining: usize,
    },

    /// Bytes remain after the structure has been fully read
    #[error("Trailing bytes after {context}: {extra} unread")]
    TrailingBytes { context: &'static str, extra: usize },

    /// Acknack gap count is negative or inconsistent
    #[error("Invalid gap count {count}")]
    InvalidGapCount { count: i64 },

    /// Gap array must hold start/end pairs
    #[error("Gap array has odd length {len}: gaps are start/end pairs")]
    OddGapArray { len: usize },

    /// String does not fit the fixed-width field
    #[error("Field {field} too long: {len} bytes exceeds width {width}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        width: usize,
    },

    /// Encoded frame exceeds the configured maximum
    #[error("Frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Payload is not of the type the caller expected
    #[error("Unexpected payload: expected {expected:?}, got {got:?}")]
    UnexpectedPayload { expected: FrameType, got: FrameType },
}

impl ProtocolError {
    /// Create a FrameTooSmall error with context
    pub fn frame_too_small(need: usize, got: usize, context: impl Into<String>) -> Self {
        Self::FrameTooSmall {
            need,
            got,
            context: context.into(),
        }
    }

    /// Create an InvalidTrailerOffset error with a best-guess diagnosis
    pub fn invalid_trailer_offset(offset: i64, min: usize, max: usize) -> Self {
        let diagnosis = if offset < 0 {
            "negative offset, likely wrong byte order or garbage"
        } else if (offset as usize) < min {
            "offset overlaps the frame header"
        } else {
            "offset exceeds maximum frame size, likely desynchronized stream"
        };

        Self::InvalidTrailerOffset {
            offset,
            min,
            max,
            diagnosis: diagnosis.to_string(),
        }
    }

    /// Create a Truncated error for a named field
    pub fn truncated(field: &'static str, need: usize, remaining: usize) -> Self {
        Self::Truncated {
            field,
            need,
            remaining,
        }
    }

    /// Error category for log fields
    pub fn category(&self) -> &'static str {
        match self {
            ProtocolError::FrameTooSmall { .. } => "frame_too_small",
            ProtocolError::UnknownFrameType { .. } => "unknown_frame_type",
            ProtocolError::InvalidTrailerOffset { .. } => "invalid_trailer_offset",
            ProtocolError::InvalidAuthSize { .. } => "invalid_auth_size",
            ProtocolError::Truncated { .. } => "truncated",
            ProtocolError::TrailingBytes { .. } => "trailing_bytes",
            ProtocolError::InvalidGapCount { .. } => "invalid_gap_count",
            ProtocolError::OddGapArray { .. } => "odd_gap_array",
            ProtocolError::FieldTooLong { .. } => "field_too_long",
            ProtocolError::FrameTooLarge { .. } => "frame_too_large",
            ProtocolError::UnexpectedPayload { .. } => "unexpected_payload",
        }
    }

    /// Whether the stream can still be read frame-by-frame after this error
    ///
    /// Framing errors (bad trailer offset or auth size) mean the frame boundary
    /// itself is unknown; everything else was detected inside a correctly
    /// delimited frame.
    pub fn is_framing_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidTrailerOffset { .. } | ProtocolError::InvalidAuthSize { .. }
        )
    }
}

/// Result type for codec operations
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailer_offset_diagnosis() {
        let err = ProtocolError::invalid_trailer_offset(-4, 36, 1024);
        assert!(err.to_string().contains("negative offset"));

        let err = ProtocolError::invalid_trailer_offset(10, 36, 1024);
        assert!(err.to_string().contains("overlaps the frame header"));

        let err = ProtocolError::invalid_trailer_offset(4096, 36, 1024);
        assert!(err.to_string().contains("desynchronized"));
        assert!(err.is_framing_error());
    }

    #[test]
    fn test_error_categorization() {
        assert_eq!(
            ProtocolError::truncated("station name", 8, 3).category(),
            "truncated"
        );
        assert_eq!(
            ProtocolError::UnknownFrameType { frame_type: 99 }.category(),
            "unknown_frame_type"
        );
        assert!(!ProtocolError::truncated("port", 2, 0).is_framing_error());
    }
}
