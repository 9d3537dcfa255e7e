//! Per-direction byte pipes between reassembly and frame scanning.
//!
//! Each half of a TCP connection gets a bounded in-memory pipe: the
//! reassembly adapter writes contiguous payload bytes into one end, the
//! frame scanner drains the other. A shared atomic flag rides alongside
//! the pipe to signal that the reassembler skipped bytes; the scanner
//! samples and clears it before interpreting anything in its window.
//!
//! Writes block when the pipe is full, so a slow consumer pushes back on
//! the reassembler. Dropping the writer closes the pipe; the reader sees
//! EOF once buffered bytes drain.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::tcp::Endpoint;

/// Pipe capacity per direction.
pub const PIPE_CAPACITY: usize = 4 * 1024;

/// Create the two halves of one directional byte pipe.
pub fn half_flow(src: Endpoint, dst: Endpoint) -> (HalfFlowWriter, HalfFlowReader) {
    let (write, read) = tokio::io::duplex(PIPE_CAPACITY);
    let lost = Arc::new(AtomicBool::new(false));

    tracing::debug!(%src, %dst, "creating half flow");

    (
        HalfFlowWriter {
            pipe: write,
            lost: Arc::clone(&lost),
            src,
            dst,
        },
        HalfFlowReader {
            pipe: read,
            lost,
            src,
            dst,
        },
    )
}

/// Write end of a half flow, held by the reassembly adapter.
#[derive(Debug)]
pub struct HalfFlowWriter {
    pipe: DuplexStream,
    lost: Arc<AtomicBool>,
    /// Sending endpoint of this direction.
    pub src: Endpoint,
    /// Receiving endpoint of this direction.
    pub dst: Endpoint,
}

impl HalfFlowWriter {
    /// Write reassembled payload bytes, blocking while the pipe is full.
    ///
    /// Fails once the reader is gone; the caller treats the half flow as
    /// dead from then on.
    pub async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.pipe.write_all(bytes).await
    }

    /// Record that the reassembler skipped `skipped` bytes of this stream.
    pub fn mark_lost(&self, skipped: u64) {
        tracing::warn!(src = %self.src, dst = %self.dst, skipped, "lost bytes in stream");
        self.lost.store(true, Ordering::SeqCst);
    }
}

/// Read end of a half flow, held by the frame scanner task.
#[derive(Debug)]
pub struct HalfFlowReader {
    pipe: DuplexStream,
    lost: Arc<AtomicBool>,
    /// Sending endpoint of this direction.
    pub src: Endpoint,
    /// Receiving endpoint of this direction.
    pub dst: Endpoint,
}

impl HalfFlowReader {
    /// Read whatever is available into `buf`. `Ok(0)` means EOF.
    pub async fn read_into(&mut self, buf: &mut BytesMut) -> std::io::Result<usize> {
        self.pipe.read_buf(buf).await
    }

    /// Consume the loss flag, clearing it.
    pub fn take_lost(&self) -> bool {
        self.lost.swap(false, Ordering::SeqCst)
    }
}
