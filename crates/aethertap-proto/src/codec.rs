//! Bundle decoder: header validation, decompression, segment walk.

use std::sync::Arc;

use crate::{
    bundle::{Bundle, BundleHeader},
    compress::{BufferPool, Compression, inflate_zlib},
    error::DecodeError,
    oodle::OodleDecoder,
    segment::Segment,
};

/// Decodes bundles from framed wire bytes.
///
/// Holds the proprietary-codec capability and a scratch-buffer pool shared
/// across every flow; clones share both. Decoding maintains strict byte
/// accounting: the decompressed payload must be consumed exactly by the
/// declared number of segments.
#[derive(Clone)]
pub struct BundleCodec {
    oodle: Arc<dyn OodleDecoder>,
    pool: BufferPool,
}

impl BundleCodec {
    /// Create a codec around the given proprietary-codec provider.
    #[must_use]
    pub fn new(oodle: Arc<dyn OodleDecoder>) -> Self {
        Self {
            oodle,
            pool: BufferPool::default(),
        }
    }

    /// Decode a single bundle strictly from the provided slice.
    ///
    /// `bytes` must hold at least the declared bundle length; extra trailing
    /// bytes beyond it are ignored (the frame scanner hands over exact
    /// frames, but callers with a larger window are accepted).
    ///
    /// # Errors
    ///
    /// - [`DecodeError::NotEnoughData`] when the slice is shorter than the
    ///   header or the declared length
    /// - [`DecodeError::BadMagic`] when the prefix matches neither magic
    /// - [`DecodeError::BadLength`] when the declared length cannot cover
    ///   the header
    /// - [`DecodeError::BadCompression`] on an unknown compression tag
    /// - [`DecodeError::Zlib`] / [`DecodeError::Oodle`] when decompression
    ///   fails
    /// - [`DecodeError::BadSegment`] / [`DecodeError::TrailingBytes`] when
    ///   the segment walk does not consume the payload exactly
    pub fn decode(&self, bytes: &[u8]) -> Result<Bundle, DecodeError> {
        let header = BundleHeader::from_bytes(bytes)?;

        let length = header.length() as usize;
        if length < BundleHeader::SIZE {
            return Err(DecodeError::BadLength(header.length()));
        }
        if bytes.len() < length {
            return Err(DecodeError::NotEnoughData {
                needed: length,
                available: bytes.len(),
            });
        }

        let payload = &bytes[BundleHeader::SIZE..length];

        let compression = Compression::from_u8(header.compression_raw())
            .ok_or(DecodeError::BadCompression(header.compression_raw()))?;

        // Scratch buffer is leased for the whole decode and returned to the
        // pool on every exit path.
        let scratch = match compression {
            Compression::None => None,
            Compression::Zlib => {
                let mut buf = self.pool.acquire();
                inflate_zlib(payload, &mut buf)?;
                Some(buf)
            },
            Compression::Oodle => {
                let mut buf = self.pool.acquire();
                buf.resize(header.uncompressed_length() as usize, 0);
                self.oodle.decode(payload, &mut buf)?;
                Some(buf)
            },
        };

        let decompressed: &[u8] = match &scratch {
            Some(buf) => buf,
            None => payload,
        };

        let segment_count = header.segment_count() as usize;
        let mut segments = Vec::with_capacity(segment_count);
        let mut rest = decompressed;

        for _ in 0..segment_count {
            let (segment, used) = Segment::read_from(rest)?;
            rest = &rest[used..];
            segments.push(segment);
        }

        if !rest.is_empty() {
            return Err(DecodeError::TrailingBytes {
                remaining: rest.len(),
            });
        }

        Ok(Bundle {
            magic: *header.magic(),
            epoch_ms: header.epoch_ms(),
            length: header.length(),
            connection_type: header.connection_type(),
            encoding: header.encoding(),
            compression,
            uncompressed_length: header.uncompressed_length(),
            segments,
        })
    }
}

impl std::fmt::Debug for BundleCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleCodec")
            .field("pool_capacity", &self.pool.capacity())
            .finish_non_exhaustive()
    }
}

impl Default for BundleCodec {
    /// Codec with the platform-default proprietary provider.
    fn default() -> Self {
        Self::new(crate::oodle::default_decoder())
    }
}
