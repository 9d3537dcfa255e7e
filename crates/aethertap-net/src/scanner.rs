//! Frame resynchronizer: recovers bundle frames from a lossy byte stream.
//!
//! The only reliable delimiter in the protocol is the 16-byte magic prefix,
//! so recovery after loss is a scan: drop everything currently buffered,
//! then wait for the next magic to come by. Three situations arise from
//! lost bytes:
//!
//! 1. The magic prefix itself was (partially) lost: its bundle is simply
//!    never found, which is harmless.
//! 2. Payload bytes were lost mid-bundle: the remaining data would be
//!    misread as part of the original bundle, cascading into garbage. This
//!    is why the loss flag discards the whole window.
//! 3. A whole bundle was lost in one TCP segment: nothing misaligns.
//!
//! The scan fast path checks whether the window already starts with a
//! magic prefix before falling back to a search, which is the steady state
//! once a stream is aligned.

use bytes::{Buf, Bytes, BytesMut};
use tokio::sync::mpsc;

use aethertap_proto::{Bundle, BundleCodec, IPC_MAGIC, KEEPALIVE_MAGIC, peek_length};

use crate::{error::FlowError, flow::HalfFlowReader};

/// Largest frame the scanner will wait for. A declared length beyond this
/// is protocol drift or misalignment, and fatal for the flow.
pub const MAX_FRAME_LEN: u32 = 64 * 1024;

/// Index of the earliest occurrence of any needle in `haystack`.
pub fn index_first(haystack: &[u8], needles: &[&[u8]]) -> Option<usize> {
    // Fast path: aligned streams almost always have a needle at offset 0.
    for needle in needles {
        if haystack.starts_with(needle) {
            return Some(0);
        }
    }

    needles
        .iter()
        .filter_map(|needle| find(haystack, needle))
        .min()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// A frame-scan outcome.
#[derive(Debug)]
pub enum ScanStep {
    /// No complete frame in the window; feed more bytes.
    NeedMore,
    /// One extracted frame, starting with a magic prefix.
    Frame(Bytes),
    /// The stream cannot be followed any further.
    Fatal(FlowError),
}

/// Scanning window over one half flow's byte stream.
#[derive(Debug, Default)]
pub struct ScanBuffer {
    window: BytesMut,
}

impl ScanBuffer {
    /// Create an empty window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Whether the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Append stream bytes to the window.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.window.extend_from_slice(bytes);
    }

    /// Mutable access for direct pipe reads.
    pub(crate) fn window_mut(&mut self) -> &mut BytesMut {
        &mut self.window
    }

    /// Advance the scan by one step.
    ///
    /// `lost` is the sampled loss flag and must be consumed from the flow
    /// on every call: when set, the entire window is discarded no matter
    /// what it contains, because alignment within it is unknowable.
    pub fn next_frame(&mut self, lost: bool) -> ScanStep {
        if lost {
            tracing::warn!(
                bytes = self.window.len(),
                "discarding scan window after data loss"
            );
            self.window.clear();
            return ScanStep::NeedMore;
        }

        let magics: [&[u8]; 2] = [&IPC_MAGIC, &KEEPALIVE_MAGIC];
        let Some(start) = index_first(&self.window, &magics) else {
            // No magic anywhere. One could still begin in the final 15
            // bytes, so only the bytes before that are dead junk.
            if self.window.len() >= IPC_MAGIC.len() {
                let junk = self.window.len() - (IPC_MAGIC.len() - 1);
                self.window.advance(junk);
            }
            return ScanStep::NeedMore;
        };

        if start > 0 {
            // Drop junk ahead of the magic.
            self.window.advance(start);
        }

        let Some(length) = peek_length(&self.window) else {
            return ScanStep::NeedMore;
        };

        if length > MAX_FRAME_LEN {
            return ScanStep::Fatal(FlowError::OversizedFrame { declared: length });
        }

        if (length as usize) > self.window.len() {
            return ScanStep::NeedMore;
        }

        ScanStep::Frame(self.window.split_to(length as usize).freeze())
    }
}

/// Drain one half flow: scan for frames, decode, forward bundles.
///
/// Runs until the pipe reaches EOF, the bundle channel closes, or the flow
/// turns fatal. The [`FlowError`] stops at this boundary: it is logged
/// here and the task ends, taking the flow with it. Loss recovery happens
/// inside the scan; a frame that decodes badly means alignment is gone
/// for good.
pub(crate) async fn run_scanner(
    mut reader: HalfFlowReader,
    codec: BundleCodec,
    bundles: mpsc::Sender<Bundle>,
) {
    let (src, dst) = (reader.src, reader.dst);
    tracing::debug!(%src, %dst, "starting half flow scanner");

    match scan_half_flow(&mut reader, &codec, &bundles).await {
        Ok(()) => tracing::debug!(%src, %dst, "half flow drained"),
        Err(err) => tracing::error!(%src, %dst, %err, "abandoning flow"),
    }
}

async fn scan_half_flow(
    reader: &mut HalfFlowReader,
    codec: &BundleCodec,
    bundles: &mpsc::Sender<Bundle>,
) -> Result<(), FlowError> {
    let mut scan = ScanBuffer::new();

    loop {
        loop {
            match scan.next_frame(reader.take_lost()) {
                ScanStep::NeedMore => break,
                ScanStep::Frame(frame) => {
                    let bundle = codec.decode(&frame)?;
                    if bundles.send(bundle).await.is_err() {
                        tracing::debug!("bundle consumer gone, stopping scanner");
                        return Ok(());
                    }
                },
                ScanStep::Fatal(err) => return Err(err),
            }
        }

        match reader.read_into(scan.window_mut()).await {
            Ok(0) => {
                if !scan.is_empty() {
                    tracing::debug!(
                        remaining = scan.len(),
                        "discarding partial frame at stream end"
                    );
                }
                return Ok(());
            },
            Ok(_) => {},
            Err(err) => return Err(FlowError::Pipe(err)),
        }
    }
}
