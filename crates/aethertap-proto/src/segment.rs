//! Segment parsing: the inner framed units of a bundle payload.
//!
//! Each segment is a 16-byte header (Little Endian) followed by a typed
//! sub-payload. The segment type tag selects the payload shape; unknown
//! types are preserved as opaque bytes so consumers still see them.

use std::fmt;

use bytes::Bytes;
use serde::{Serialize, Serializer};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::DecodeError;

/// Fixed 16-byte segment header (Little Endian).
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct SegmentHeader {
    // Total segment length in bytes, header included (4 bytes: 0-3).
    length: [u8; 4],

    // ID of the actor that sent the segment (4 bytes: 4-7).
    source: [u8; 4],

    // ID of the actor that receives the segment (4 bytes: 8-11).
    target: [u8; 4],

    // Segment type tag (2 bytes: 12-13).
    kind: [u8; 2],

    _reserved: [u8; 2],
}

impl SegmentHeader {
    /// Size of the serialized header (16 bytes).
    pub const SIZE: usize = 16;

    /// Parse a segment header from the front of `bytes` (zero-copy).
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self, DecodeError> {
        Ok(Self::ref_from_prefix(bytes)
            .map_err(|_| DecodeError::NotEnoughData {
                needed: Self::SIZE,
                available: bytes.len(),
            })?
            .0)
    }

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Total segment length in bytes, including this header.
    #[must_use]
    pub fn length(&self) -> u32 {
        u32::from_le_bytes(self.length)
    }

    /// Sending actor ID.
    #[must_use]
    pub fn source(&self) -> u32 {
        u32::from_le_bytes(self.source)
    }

    /// Receiving actor ID.
    #[must_use]
    pub fn target(&self) -> u32 {
        u32::from_le_bytes(self.target)
    }

    /// Segment type tag.
    #[must_use]
    pub fn kind(&self) -> SegmentKind {
        SegmentKind::from_u16(u16::from_le_bytes(self.kind))
    }

    /// Set the total segment length.
    pub fn set_length(&mut self, length: u32) {
        self.length = length.to_le_bytes();
    }

    /// Set the sending actor ID.
    pub fn set_source(&mut self, source: u32) {
        self.source = source.to_le_bytes();
    }

    /// Set the receiving actor ID.
    pub fn set_target(&mut self, target: u32) {
        self.target = target.to_le_bytes();
    }

    /// Set the segment type tag.
    pub fn set_kind(&mut self, kind: SegmentKind) {
        self.kind = kind.as_u16().to_le_bytes();
    }
}

impl Default for SegmentHeader {
    fn default() -> Self {
        let mut header = Self {
            length: [0; 4],
            source: [0; 4],
            target: [0; 4],
            kind: [0; 2],
            _reserved: [0; 2],
        };
        header.set_length(Self::SIZE as u32);
        header
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl fmt::Debug for SegmentHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentHeader")
            .field("length", &self.length())
            .field("source", &format!("{:#010x}", self.source()))
            .field("target", &format!("{:#010x}", self.target()))
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

/// Segment type tag.
///
/// The named variants are the types the decoder understands; everything
/// else is carried through as [`SegmentKind::Other`] with an opaque payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Game message segment, the common case.
    Ipc,
    /// Liveness probe sent by the client.
    ClientKeepAlive,
    /// Liveness probe sent by the server.
    ServerKeepAlive,
    /// Any other type tag.
    Other(u16),
}

impl SegmentKind {
    /// Decode the wire tag.
    #[must_use]
    pub fn from_u16(raw: u16) -> Self {
        match raw {
            3 => Self::Ipc,
            7 => Self::ClientKeepAlive,
            8 => Self::ServerKeepAlive,
            other => Self::Other(other),
        }
    }

    /// Encode back to the wire tag.
    #[must_use]
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Ipc => 3,
            Self::ClientKeepAlive => 7,
            Self::ServerKeepAlive => 8,
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipc => f.write_str("Ipc"),
            Self::ClientKeepAlive => f.write_str("ClientKeepAlive"),
            Self::ServerKeepAlive => f.write_str("ServerKeepAlive"),
            Self::Other(other) => write!(f, "{other}"),
        }
    }
}

// Emitted as the numeric wire tag, matching the downstream JSON schema.
impl Serialize for SegmentKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.as_u16())
    }
}

/// One decoded segment of a bundle payload.
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    /// Total segment length on the wire, header included.
    #[serde(skip)]
    pub length: u32,

    /// Sending actor ID.
    pub source: u32,

    /// Receiving actor ID.
    pub target: u32,

    /// Segment type tag.
    #[serde(rename = "type")]
    pub kind: SegmentKind,

    /// Typed payload.
    pub payload: SegmentPayload,
}

impl Segment {
    /// Decode one segment from the front of `payload`.
    ///
    /// Returns the segment and the number of bytes consumed. The declared
    /// segment length must cover its own header and fit inside `payload`;
    /// any shortfall is [`DecodeError::BadSegment`].
    pub fn read_from(payload: &[u8]) -> Result<(Self, usize), DecodeError> {
        if payload.len() < SegmentHeader::SIZE {
            return Err(DecodeError::BadSegment {
                declared: SegmentHeader::SIZE as u32,
                available: payload.len(),
            });
        }

        let header = SegmentHeader::from_bytes(payload)?;
        let length = header.length();

        if (length as usize) < SegmentHeader::SIZE || length as usize > payload.len() {
            return Err(DecodeError::BadSegment {
                declared: length,
                available: payload.len(),
            });
        }

        let body = &payload[SegmentHeader::SIZE..length as usize];
        let kind = header.kind();

        let decoded = match kind {
            SegmentKind::Ipc => SegmentPayload::Ipc(IpcMessage::decode(body, length)?),
            SegmentKind::ClientKeepAlive | SegmentKind::ServerKeepAlive => {
                SegmentPayload::KeepAlive(KeepAlive::decode(body, length)?)
            },
            SegmentKind::Other(raw) => {
                tracing::debug!(kind = raw, "segment has unknown type; keeping payload opaque");
                SegmentPayload::Opaque(Bytes::copy_from_slice(body))
            },
        };

        Ok((
            Self {
                length,
                source: header.source(),
                target: header.target(),
                kind,
                payload: decoded,
            },
            length as usize,
        ))
    }
}

/// Typed segment payload.
///
/// Tagged union replacing dynamic dispatch: the discriminant is explicit
/// and matching is exhaustive everywhere the payload is consumed.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SegmentPayload {
    /// Game message with opcode routing.
    Ipc(IpcMessage),
    /// Liveness probe.
    KeepAlive(KeepAlive),
    /// Raw bytes of an unrecognized segment type.
    Opaque(#[serde(serialize_with = "serialize_base64")] Bytes),
}

/// A game message: 16-byte sub-header plus opaque message data.
#[derive(Debug, Clone, Serialize)]
pub struct IpcMessage {
    /// Sub-header magic, not validated.
    #[serde(skip)]
    pub magic: u16,

    /// Message opcode. Meaning is patch-dependent; resolved (if at all)
    /// by the opcode-name table in the front-end.
    #[serde(rename = "type")]
    pub opcode: u16,

    /// Originating world server ID.
    #[serde(rename = "serverId")]
    pub server_id: u16,

    /// Seconds since the Unix epoch, by the sender's clock.
    #[serde(rename = "epoch")]
    pub epoch_s: u32,

    /// Message body after the sub-header, uninterpreted.
    #[serde(serialize_with = "serialize_base64")]
    pub data: Bytes,
}

impl IpcMessage {
    /// Size of the fixed sub-header (16 bytes).
    pub const HEADER_SIZE: usize = 16;

    fn decode(body: &[u8], segment_length: u32) -> Result<Self, DecodeError> {
        if body.len() < Self::HEADER_SIZE {
            return Err(DecodeError::BadSegment {
                declared: segment_length,
                available: body.len(),
            });
        }

        Ok(Self {
            magic: u16::from_le_bytes([body[0], body[1]]),
            opcode: u16::from_le_bytes([body[2], body[3]]),
            server_id: u16::from_le_bytes([body[6], body[7]]),
            epoch_s: u32::from_le_bytes([body[8], body[9], body[10], body[11]]),
            data: Bytes::copy_from_slice(&body[Self::HEADER_SIZE..]),
        })
    }
}

/// A liveness probe payload: an 8-byte id/timestamp pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeepAlive {
    /// Probe identifier, echoed back by the peer.
    pub id: u32,

    /// Seconds since the Unix epoch, by the sender's clock.
    #[serde(rename = "epoch")]
    pub epoch_s: u32,
}

impl KeepAlive {
    /// Size of the payload (8 bytes).
    pub const SIZE: usize = 8;

    fn decode(body: &[u8], segment_length: u32) -> Result<Self, DecodeError> {
        if body.len() < Self::SIZE {
            return Err(DecodeError::BadSegment {
                declared: segment_length,
                available: body.len(),
            });
        }

        Ok(Self {
            id: u32::from_le_bytes([body[0], body[1], body[2], body[3]]),
            epoch_s: u32::from_le_bytes([body[4], body[5], body[6], body[7]]),
        })
    }
}

fn serialize_base64<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    serializer.serialize_str(&STANDARD.encode(bytes))
}
