//! Error types for the dem crate.

use std::fmt;

use dem_decode::DecodeError;

/// Result type for dem operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while fetching elevation data.
#[derive(Debug)]
pub enum Error {
    /// HTTP request failed.
    Http {
        /// The URL that failed.
        url: String,
        /// The error message.
        message: String,
    },
    /// HTTP response had a non-success status code.
    HttpStatus {
        /// The URL that returned the error.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
    /// Raster decoding failed.
    Decode(DecodeError),
    /// The requested bounding box does not overlap the raster.
    OutsideCoverage {
        /// The raster URL.
        url: String,
        /// Requested bounds as `[lng1, lat1, lng2, lat2]`.
        bounds: [f64; 4],
    },
    /// Cache operation failed.
    Cache {
        /// The operation that failed.
        operation: &'static str,
        /// The error message.
        message: String,
    },
    /// Reading a local file failed.
    Io {
        /// The file path.
        path: String,
        /// The error message.
        message: String,
    },
    /// Invalid data in response.
    InvalidData {
        /// Context for where the error occurred.
        context: &'static str,
        /// Description of what was invalid.
        detail: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http { url, message } => {
                write!(f, "http request to {url} failed: {message}")
            }
            Error::HttpStatus { url, status } => {
                write!(f, "http request to {url} returned status {status}")
            }
            Error::Decode(e) => write!(f, "decode error: {e}"),
            Error::OutsideCoverage { url, bounds } => {
                let [lng1, lat1, lng2, lat2] = bounds;
                write!(
                    f,
                    "bounding box ({lng1}, {lat1}) - ({lng2}, {lat2}) lies outside {url}"
                )
            }
            Error::Cache { operation, message } => {
                write!(f, "cache {operation} failed: {message}")
            }
            Error::Io { path, message } => write!(f, "failed to read {path}: {message}"),
            Error::InvalidData { context, detail } => {
                write!(f, "invalid {context}: {detail}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_outside_coverage() {
        let error = Error::OutsideCoverage {
            url: "https://example.com/dem.tif".to_string(),
            bounds: [1.0, 2.0, 3.5, 4.0],
        };
        assert_eq!(
            error.to_string(),
            "bounding box (1, 2) - (3.5, 4) lies outside https://example.com/dem.tif"
        );
    }

    #[test]
    fn test_decode_error_is_source() {
        let error = Error::from(DecodeError::NeedMoreData { required: 10 });
        assert!(std::error::Error::source(&error).is_some());
        assert!(error.to_string().starts_with("decode error: "));
    }
}
