//! Wire codec for the game's framed TCP protocol.
//!
//! The protocol frames application messages as *bundles*: a 40-byte
//! little-endian header starting with one of two 16-byte magic prefixes,
//! followed by an optionally compressed payload of typed *segments*.
//! This crate decodes that format and nothing else; turning a lossy TCP
//! capture into candidate frames is the flow layer's job.
//!
//! # Components
//!
//! - [`BundleHeader`] / [`Bundle`]: framing header and the decoded unit
//! - [`Segment`] / [`SegmentPayload`]: inner typed units
//! - [`BundleCodec`]: the decoder, owning decompression scratch and the
//!   proprietary-codec capability
//! - [`oodle`]: the capability seam for the closed-source codec

mod bundle;
mod codec;
mod compress;
mod error;
pub mod ip;
pub mod oodle;
mod segment;

pub use bundle::{Bundle, BundleHeader, IPC_MAGIC, KEEPALIVE_MAGIC, peek_length};
pub use codec::BundleCodec;
pub use compress::{BufferPool, Compression};
pub use error::{DecodeError, OodleError};
pub use segment::{IpcMessage, KeepAlive, Segment, SegmentHeader, SegmentKind, SegmentPayload};
