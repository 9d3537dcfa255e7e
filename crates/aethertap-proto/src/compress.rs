//! Payload compression handling and decompression scratch buffers.

use std::{
    io::Read,
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex},
};

use crate::error::DecodeError;

/// Payload compression tag carried in the bundle header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Payload is the raw wire bytes.
    #[default]
    None,
    /// Payload is a complete zlib stream.
    Zlib,
    /// Payload is compressed with the game's proprietary codec.
    Oodle,
}

impl Compression {
    /// Decode the wire tag. Unknown tags are rejected at parse time.
    #[must_use]
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::Zlib),
            2 => Some(Self::Oodle),
            _ => None,
        }
    }

    /// Encode back to the wire tag.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Zlib => 1,
            Self::Oodle => 2,
        }
    }
}

// Cap on inflated payload size; anything larger is not a legitimate bundle.
const MAX_INFLATED: u64 = 4 * 1024 * 1024;

/// Inflate a complete zlib stream into `out`, reading until stream end.
///
/// A truncated or corrupt stream is an error; partial output is discarded
/// by the caller along with the bundle.
pub(crate) fn inflate_zlib(input: &[u8], out: &mut Vec<u8>) -> Result<(), DecodeError> {
    let mut reader = flate2::read::ZlibDecoder::new(input).take(MAX_INFLATED + 1);
    reader.read_to_end(out).map_err(DecodeError::Zlib)?;

    if out.len() as u64 > MAX_INFLATED {
        return Err(DecodeError::Zlib(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "inflated payload exceeds size cap",
        )));
    }

    Ok(())
}

/// Thread-safe free-list of reusable decompression buffers.
///
/// Buffers are handed out cleared with [`BufferPool::capacity`] bytes
/// reserved and returned to the pool when the lease drops, whatever the
/// outcome of the decode that borrowed them.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
}

impl BufferPool {
    /// Buffer size that covers the largest observed decompressed bundle.
    pub const DEFAULT_CAPACITY: usize = 64 * 1024;

    /// Create a pool handing out buffers with `capacity` bytes reserved.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                capacity,
            }),
        }
    }

    /// Initial reserved size of pooled buffers.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Take a cleared buffer from the pool, allocating if none are free.
    #[must_use]
    pub fn acquire(&self) -> PooledBuf {
        let buf = match self.inner.free.lock() {
            Ok(mut free) => free.pop(),
            Err(_) => None,
        };

        PooledBuf {
            buf: buf.unwrap_or_else(|| Vec::with_capacity(self.inner.capacity)),
            pool: self.clone(),
        }
    }

    fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        if let Ok(mut free) = self.inner.free.lock() {
            free.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// A buffer leased from a [`BufferPool`]; returns itself on drop.
#[derive(Debug)]
pub struct PooledBuf {
    buf: Vec<u8>,
    pool: BufferPool,
}

impl Deref for PooledBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.release(buf);
    }
}
