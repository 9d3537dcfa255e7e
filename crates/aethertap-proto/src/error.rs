//! Error types for the bundle/segment codec.
//!
//! Strongly-typed errors for the two failure domains: structural decode
//! failures (framing, byte accounting) and payload decompression failures.
//! The distinction matters to the flow layer: `NotEnoughData` is recoverable
//! by waiting for more bytes, everything else is fatal for the flow that
//! produced the bytes.

use thiserror::Error;

/// Errors produced while decoding a bundle from wire bytes.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The input slice is shorter than the structure being read
    #[error("not enough data: need {needed} bytes, have {available}")]
    NotEnoughData {
        /// Bytes required to make progress
        needed: usize,
        /// Bytes actually available
        available: usize,
    },

    /// The 16-byte prefix matches neither known magic value.
    ///
    /// Reachable only when the caller hands the codec a misaligned slice;
    /// the resynchronizer never extracts a frame that does not start with
    /// one of the magics.
    #[error("bad magic bytes at bundle start")]
    BadMagic,

    /// The declared bundle length does not cover its own header
    #[error("bundle length {0} is shorter than the bundle header")]
    BadLength(u32),

    /// Unknown compression tag in the bundle header
    #[error("bad compression type {0}")]
    BadCompression(u8),

    /// A segment's declared length does not fit the remaining payload,
    /// or an inner payload is shorter than its fixed sub-header.
    #[error("bad segment: declared {declared} bytes, {available} available")]
    BadSegment {
        /// Length the segment header claims
        declared: u32,
        /// Bytes left in the decompressed payload
        available: usize,
    },

    /// Payload bytes remain after reading every declared segment
    #[error("{remaining} trailing bytes after final segment")]
    TrailingBytes {
        /// Unconsumed byte count
        remaining: usize,
    },

    /// The zlib stream was rejected or truncated
    #[error("zlib inflate failed")]
    Zlib(#[source] std::io::Error),

    /// The proprietary codec rejected the payload or is unavailable
    #[error("proprietary decompression failed")]
    Oodle(#[from] OodleError),
}

/// Errors surfaced by [`crate::oodle::OodleDecoder`] providers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OodleError {
    /// The codec is not available on this platform or build
    #[error("proprietary codec is not supported on this platform")]
    PlatformNotSupported,

    /// The codec library returned a failure status for this payload
    #[error("codec library failed to decompress the payload")]
    DecompressionFailed,

    /// Loading or initializing the codec library failed
    #[error("failed to set up codec library: {0}")]
    Setup(String),
}
