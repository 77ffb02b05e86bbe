//! Error types for decoding operations.

use std::fmt;

/// Errors that can occur while decoding raster data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input buffer is too small for the expected data.
    BufferTooSmall { expected: usize, actual: usize },
    /// The parser needs bytes past the end of the prefix it was given.
    ///
    /// `required` is the minimum prefix length, in bytes, that would let
    /// parsing make progress.
    NeedMoreData { required: u64 },
    /// Invalid data format or structure.
    InvalidFormat {
        context: &'static str,
        detail: String,
    },
    /// Valid TIFF feature that this decoder does not handle.
    Unsupported {
        context: &'static str,
        detail: String,
    },
    /// Sample buffer does not match the declared grid dimensions.
    InvalidGrid {
        width: u32,
        height: u32,
        len: usize,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall { expected, actual } => {
                write!(
                    f,
                    "buffer too small: expected {expected} bytes, got {actual}"
                )
            }
            Self::NeedMoreData { required } => {
                write!(f, "need at least {required} bytes of the file to continue")
            }
            Self::InvalidFormat { context, detail } => {
                write!(f, "invalid format in {context}: {detail}")
            }
            Self::Unsupported { context, detail } => {
                write!(f, "unsupported {context}: {detail}")
            }
            Self::InvalidGrid { width, height, len } => {
                write!(
                    f,
                    "grid of {width}x{height} samples cannot hold a buffer of length {len}"
                )
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;
