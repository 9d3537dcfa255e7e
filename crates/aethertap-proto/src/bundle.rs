//! Bundle framing with zero-copy header parsing.
//!
//! A bundle is the outermost framed unit on the wire: a fixed 40-byte
//! header (Little Endian) followed by a payload that holds one or more
//! segments, optionally compressed. The header is parsed by casting the
//! raw bytes with `zerocopy`, so frame scanning never copies or allocates.
//!
//! Every multi-byte integer in the protocol is little-endian. Fields are
//! stored as raw byte arrays to avoid alignment issues; accessors convert
//! on read.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    compress::Compression,
    error::DecodeError,
    segment::Segment,
};

/// Magic prefix of a bundle carrying IPC segments.
pub const IPC_MAGIC: [u8; 16] = [
    0x52, 0x52, 0xa0, 0x41, // 0x41a05252 (little endian)
    0xff, 0x5d, 0x46, 0xe2, // 0xe2465dff
    0x7f, 0x2a, 0x64, 0x4d, // 0x4d642a7f
    0x7b, 0x99, 0xc4, 0x75, // 0x75c4997b
];

/// Magic prefix of a bundle carrying keep-alive segments: all null bytes.
pub const KEEPALIVE_MAGIC: [u8; 16] = [0u8; 16];

/// Fixed 40-byte bundle header (Little Endian).
///
/// The `#[repr(C, packed)]` layout with the zerocopy traits lets the header
/// be cast directly from untrusted capture bytes: every 40-byte pattern is a
/// valid bit pattern, so the cast itself cannot misbehave. Validation
/// (magic check) happens in [`BundleHeader::from_bytes`] after the cast.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct BundleHeader {
    // Framing marker (16 bytes: 0-15). One of the two known magic values.
    magic: [u8; 16],

    // Sender clock (8 bytes: 16-23), milliseconds since the Unix epoch.
    epoch_ms: [u8; 8],

    // Total bundle length in bytes, header included (4 bytes: 24-27).
    length: [u8; 4],

    // Connection type, usually 0 (2 bytes: 28-29).
    connection_type: [u8; 2],

    // Number of segments in the payload (2 bytes: 30-31).
    segment_count: [u8; 2],

    // Payload encoding tag, preserved for consumers (byte 32).
    encoding: u8,

    // Payload compression tag (byte 33). See [`Compression`].
    compression: u8,

    _reserved: [u8; 2],

    // Expected payload size after decompression (4 bytes: 36-39).
    // Only meaningful for the proprietary codec.
    uncompressed_length: [u8; 4],
}

impl BundleHeader {
    /// Size of the serialized header (40 bytes).
    pub const SIZE: usize = 40;

    /// Byte offset of the `length` field within the header.
    pub const LENGTH_OFFSET: usize = 24;

    /// Parse a header from wire bytes (zero-copy).
    ///
    /// # Errors
    ///
    /// - [`DecodeError::NotEnoughData`] if the buffer is shorter than 40 bytes
    /// - [`DecodeError::BadMagic`] if the prefix matches neither magic value
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self, DecodeError> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| DecodeError::NotEnoughData {
                needed: Self::SIZE,
                available: bytes.len(),
            })?
            .0;

        if header.magic != IPC_MAGIC && header.magic != KEEPALIVE_MAGIC {
            return Err(DecodeError::BadMagic);
        }

        Ok(header)
    }

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Raw 16-byte magic prefix.
    #[must_use]
    pub fn magic(&self) -> &[u8; 16] {
        &self.magic
    }

    /// Whether this is a keep-alive bundle (all-zero magic).
    #[must_use]
    pub fn is_keep_alive(&self) -> bool {
        self.magic == KEEPALIVE_MAGIC
    }

    /// Milliseconds since the Unix epoch, by the sender's clock.
    #[must_use]
    pub fn epoch_ms(&self) -> u64 {
        u64::from_le_bytes(self.epoch_ms)
    }

    /// Total bundle length in bytes, including this header.
    #[must_use]
    pub fn length(&self) -> u32 {
        u32::from_le_bytes(self.length)
    }

    /// Connection type tag. Usually 0.
    #[must_use]
    pub fn connection_type(&self) -> u16 {
        u16::from_le_bytes(self.connection_type)
    }

    /// Number of segments in the (decompressed) payload.
    #[must_use]
    pub fn segment_count(&self) -> u16 {
        u16::from_le_bytes(self.segment_count)
    }

    /// Payload encoding tag. Opaque, preserved for consumers.
    #[must_use]
    pub fn encoding(&self) -> u8 {
        self.encoding
    }

    /// Raw compression tag byte.
    #[must_use]
    pub fn compression_raw(&self) -> u8 {
        self.compression
    }

    /// Expected payload size after proprietary decompression.
    #[must_use]
    pub fn uncompressed_length(&self) -> u32 {
        u32::from_le_bytes(self.uncompressed_length)
    }

    /// Replace the magic prefix.
    pub fn set_magic(&mut self, magic: [u8; 16]) {
        self.magic = magic;
    }

    /// Set the sender timestamp in milliseconds since the Unix epoch.
    pub fn set_epoch_ms(&mut self, epoch_ms: u64) {
        self.epoch_ms = epoch_ms.to_le_bytes();
    }

    /// Set the total bundle length, header included.
    pub fn set_length(&mut self, length: u32) {
        self.length = length.to_le_bytes();
    }

    /// Set the connection type tag.
    pub fn set_connection_type(&mut self, connection_type: u16) {
        self.connection_type = connection_type.to_le_bytes();
    }

    /// Set the declared segment count.
    pub fn set_segment_count(&mut self, count: u16) {
        self.segment_count = count.to_le_bytes();
    }

    /// Set the payload encoding tag.
    pub fn set_encoding(&mut self, encoding: u8) {
        self.encoding = encoding;
    }

    /// Set the compression tag.
    pub fn set_compression(&mut self, compression: Compression) {
        self.compression = compression.to_u8();
    }

    /// Set the expected decompressed payload size.
    pub fn set_uncompressed_length(&mut self, length: u32) {
        self.uncompressed_length = length.to_le_bytes();
    }
}

impl Default for BundleHeader {
    fn default() -> Self {
        let mut header = Self {
            magic: IPC_MAGIC,
            epoch_ms: [0; 8],
            length: [0; 4],
            connection_type: [0; 2],
            segment_count: [0; 2],
            encoding: 0,
            compression: 0,
            _reserved: [0; 2],
            uncompressed_length: [0; 4],
        };
        header.set_length(Self::SIZE as u32);
        header
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for BundleHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleHeader")
            .field("keep_alive", &self.is_keep_alive())
            .field("epoch_ms", &self.epoch_ms())
            .field("length", &self.length())
            .field("connection_type", &self.connection_type())
            .field("segment_count", &self.segment_count())
            .field("encoding", &self.encoding())
            .field("compression", &self.compression_raw())
            .field("uncompressed_length", &self.uncompressed_length())
            .finish_non_exhaustive()
    }
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for BundleHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BundleHeader {}

/// Read the declared bundle length without parsing the full header.
///
/// Returns `None` when fewer than 28 bytes are available, the minimum to
/// reach past the 32-bit length field at offset 24. Whenever a bundle
/// parses successfully from the same bytes, the peeked value equals the
/// parsed `length`.
#[must_use]
pub fn peek_length(bytes: &[u8]) -> Option<u32> {
    let raw = bytes.get(BundleHeader::LENGTH_OFFSET..BundleHeader::LENGTH_OFFSET + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// A fully decoded bundle.
///
/// Immutable once constructed by [`crate::BundleCodec::decode`]; ownership
/// transfers through a channel to the downstream consumer. Serializes to the
/// outbound JSON schema: `epoch`, `connectionType` and `segments`; framing
/// internals (length, compression, magic) are not emitted.
#[derive(Debug, Clone, Serialize)]
pub struct Bundle {
    /// Raw magic prefix, kept so consumers can distinguish keep-alives.
    #[serde(skip)]
    pub magic: [u8; 16],

    /// Milliseconds since the Unix epoch, by the sender's clock.
    #[serde(rename = "epoch")]
    pub epoch_ms: u64,

    /// Total length of the bundle on the wire, header included.
    #[serde(skip)]
    pub length: u32,

    /// Connection type tag. Usually 0.
    #[serde(rename = "connectionType")]
    pub connection_type: u16,

    /// Payload encoding tag, preserved for consumers.
    #[serde(skip)]
    pub encoding: u8,

    /// Payload compression on the wire.
    #[serde(skip)]
    pub compression: Compression,

    /// Declared decompressed payload size (proprietary codec only).
    #[serde(skip)]
    pub uncompressed_length: u32,

    /// Decoded segments, in payload order.
    pub segments: Vec<Segment>,
}

impl Bundle {
    /// Whether the payload was compressed on the wire.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compression != Compression::None
    }

    /// Whether this is a keep-alive bundle.
    #[must_use]
    pub fn is_keep_alive(&self) -> bool {
        self.magic == KEEPALIVE_MAGIC
    }

    /// Sender timestamp as wall-clock time.
    #[must_use]
    pub fn time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.epoch_ms)
    }
}
