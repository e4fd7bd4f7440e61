//! Error taxonomy for the decode and tone-map pipeline.
//!
//! Every failure a single file can produce is one of these variants. The
//! interactive path surfaces them to the operator; the background preview
//! run logs them and moves on to the next file.

use thiserror::Error;

/// Errors produced while decoding or rasterizing a container file.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The container's metadata block is missing, truncated or unparseable
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    /// The metadata parsed but describes no image
    #[error("no image element found in container")]
    NoImageElement,

    /// The geometry attribute is malformed or non-positive
    #[error("invalid geometry {0:?}")]
    InvalidGeometry(String),

    /// Only unsigned 16-bit samples are supported for XISF payloads
    #[error("unsupported sample format {0:?} (only UInt16 is supported)")]
    UnsupportedSampleFormat(String),

    /// Only inline attachment payloads are supported
    #[error("unsupported data location {0:?} (only 'attachment' is supported)")]
    UnsupportedLocation(String),

    /// The block decompressor rejected the payload
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// Recovered payload does not match the geometry
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Rasterization handles 1 and 3 channels, nothing else
    #[error("unsupported channel layout: {0} channel(s)")]
    UnsupportedChannelLayout(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type used throughout the pipeline
pub type Result<T> = std::result::Result<T, DecodeError>;
