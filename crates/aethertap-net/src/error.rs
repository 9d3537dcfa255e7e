//! Error type for half-flow processing tasks.
//!
//! A half flow fails as a unit: once a frame decodes badly or the scan
//! cannot continue, byte alignment within the stream is unknowable and
//! the task ends. The error never propagates past the task boundary; it
//! is logged there, and the dropped pipe is what tells the reassembly
//! side the flow is dead.

use thiserror::Error;

use aethertap_proto::DecodeError;

use crate::scanner::MAX_FRAME_LEN;

/// Why a half-flow task stopped following its stream.
#[derive(Debug, Error)]
pub enum FlowError {
    /// An extracted frame did not decode as a bundle.
    #[error("failed to decode bundle: {0}")]
    Decode(#[from] DecodeError),

    /// A scanned header declared a frame larger than [`MAX_FRAME_LEN`].
    #[error("declared frame length {declared} exceeds the {MAX_FRAME_LEN} byte cap")]
    OversizedFrame {
        /// Length the header claims.
        declared: u32,
    },

    /// The byte pipe failed mid-read.
    #[error("half flow pipe read failed: {0}")]
    Pipe(#[source] std::io::Error),
}
