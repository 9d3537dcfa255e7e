//! TCP reassembly adapter: packets in, ordered half-flow bytes out.
//!
//! Tracks one state per connection and one sequencer per direction. In-order
//! payload goes straight into the half-flow pipe; out-of-order payload is
//! buffered until the gap fills. Buffering is bounded: per-connection and
//! global page caps, plus an age limit enforced from the capture driver's
//! periodic tick. When a bound trips, the stream skips forward past the gap
//! and the loss is signaled to the frame scanner, which resynchronizes on
//! the next magic prefix.
//!
//! Accounting invariant: every payload byte accepted from a packet is
//! either written to its half-flow pipe, dropped as a duplicate of bytes
//! already written, or discarded under a loss signal.

use std::{
    collections::{BTreeMap, HashMap},
    time::Instant,
};

use bytes::Bytes;
use tokio::{sync::mpsc, task::JoinSet};

use aethertap_proto::{Bundle, BundleCodec};

use crate::{
    flow::{HalfFlowWriter, half_flow},
    scanner::run_scanner,
    tcp::{Direction, Endpoint, FlowKey, TcpPacket, TcpStateMachine},
};

/// Reassembly limits.
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Pending out-of-order pages allowed per connection.
    pub max_pending_pages_per_flow: usize,
    /// Pending out-of-order pages allowed across all connections.
    pub max_pending_pages_total: usize,
    /// Accept flows whose handshake predates the capture.
    pub tolerate_missing_establishment: bool,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            max_pending_pages_per_flow: 512,
            max_pending_pages_total: 2048,
            tolerate_missing_establishment: true,
        }
    }
}

/// Counts reported by a maintenance flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Halves that skipped past stale pending data.
    pub flushed: usize,
    /// Idle connections closed outright.
    pub closed: usize,
}

struct PendingChunk {
    data: Bytes,
    arrived: Instant,
}

/// One direction's sequencer plus its pipe writer.
struct HalfState {
    writer: Option<HalfFlowWriter>,
    /// Sequence number expected next; `None` until the first byte.
    next_seq: Option<u32>,
    /// Monotonic byte offset matching `next_seq`, immune to 32-bit wrap.
    next_offset: u64,
    /// Out-of-order chunks keyed by stream offset.
    pending: BTreeMap<u64, PendingChunk>,
}

impl HalfState {
    fn new(writer: HalfFlowWriter) -> Self {
        Self {
            writer: Some(writer),
            next_seq: None,
            next_offset: 0,
            pending: BTreeMap::new(),
        }
    }

    fn oldest_arrival(&self) -> Option<Instant> {
        self.pending.first_key_value().map(|(_, chunk)| chunk.arrived)
    }

    async fn deliver(&mut self, bytes: &[u8]) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.write(bytes).await {
                tracing::debug!(%err, "half flow consumer gone, dropping writer");
                self.writer = None;
            }
        }
    }

    fn advance(&mut self, n: u64) {
        self.next_offset += n;
        if let Some(seq) = self.next_seq {
            self.next_seq = Some(seq.wrapping_add(n as u32));
        }
    }
}

struct FlowState {
    client: Endpoint,
    fsm: TcpStateMachine,
    halves: [HalfState; 2],
    last_activity: Instant,
}

impl FlowState {
    fn pending_pages(&self) -> usize {
        self.halves[0].pending.len() + self.halves[1].pending.len()
    }
}

/// Consumes accepted packets and keeps every half-flow pipe fed in order.
///
/// Owns the per-connection scanner tasks; [`Assembler::join`] waits for
/// them after the pipes close.
pub struct Assembler {
    flows: HashMap<FlowKey, FlowState>,
    total_pending: usize,
    bundles: mpsc::Sender<Bundle>,
    codec: BundleCodec,
    tasks: JoinSet<()>,
    config: AssemblerConfig,
}

impl Assembler {
    /// Create an assembler forwarding decoded bundles into `bundles`.
    #[must_use]
    pub fn new(
        bundles: mpsc::Sender<Bundle>,
        codec: BundleCodec,
        config: AssemblerConfig,
    ) -> Self {
        Self {
            flows: HashMap::new(),
            total_pending: 0,
            bundles,
            codec,
            tasks: JoinSet::new(),
            config,
        }
    }

    /// Number of tracked connections.
    #[must_use]
    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    /// Out-of-order pages currently buffered across all connections.
    #[must_use]
    pub fn pending_pages(&self) -> usize {
        self.total_pending
    }

    /// Route one packet through connection tracking and reassembly.
    pub async fn handle_packet(&mut self, packet: TcpPacket, now: Instant) {
        let key = FlowKey::new(packet.src, packet.dst);

        if !self.flows.contains_key(&key) {
            let (to_server_w, to_server_r) = half_flow(packet.src, packet.dst);
            let (to_client_w, to_client_r) = half_flow(packet.dst, packet.src);

            self.tasks
                .spawn(run_scanner(to_server_r, self.codec.clone(), self.bundles.clone()));
            self.tasks
                .spawn(run_scanner(to_client_r, self.codec.clone(), self.bundles.clone()));

            tracing::debug!(%key, "tracking new connection");

            self.flows.insert(key, FlowState {
                client: packet.src,
                fsm: TcpStateMachine::new(self.config.tolerate_missing_establishment),
                halves: [HalfState::new(to_server_w), HalfState::new(to_client_w)],
                last_activity: now,
            });
        }

        let Some(flow) = self.flows.get_mut(&key) else {
            return;
        };

        let dir = if packet.src == flow.client {
            Direction::ToServer
        } else {
            Direction::ToClient
        };

        if !flow.fsm.accept(&packet, dir) {
            tracing::trace!(%key, "packet failed state check, ignoring");
            return;
        }

        flow.last_activity = now;

        if !packet.payload.is_empty() {
            // SYN occupies one sequence number ahead of the payload.
            let seq = if packet.syn { packet.seq.wrapping_add(1) } else { packet.seq };
            let half = &mut flow.halves[dir.index()];
            Self::feed(half, &mut self.total_pending, seq, packet.payload, now).await;

            if flow.pending_pages() > self.config.max_pending_pages_per_flow {
                tracing::debug!(%key, "connection exceeded its pending page cap");
                Self::skip_oldest_in_flow(flow, &mut self.total_pending);
            }
        }

        if packet.rst || flow.fsm.both_fins_seen() {
            self.close_flow(key, "connection closed");
        }

        if self.total_pending > self.config.max_pending_pages_total {
            tracing::debug!("total pending page cap exceeded");
            self.skip_globally_oldest();
        }
    }

    /// Feed one in-sequence-space chunk to a half's sequencer.
    async fn feed(
        half: &mut HalfState,
        total_pending: &mut usize,
        seq: u32,
        data: Bytes,
        now: Instant,
    ) {
        let next = match half.next_seq {
            Some(next) => next,
            None => {
                // Capture began mid-stream; the first byte seen defines
                // the expected sequence.
                half.next_seq = Some(seq);
                seq
            },
        };

        let delta = i64::from(seq.wrapping_sub(next) as i32);

        if delta > 0 {
            // Out of order: park it at its stream offset.
            let offset = half.next_offset + delta as u64;
            if half.pending.contains_key(&offset) {
                return;
            }
            half.pending.insert(offset, PendingChunk { data, arrived: now });
            *total_pending += 1;
            return;
        }

        // In order, possibly overlapping bytes already delivered.
        let overlap = (-delta) as u64;
        if (data.len() as u64) > overlap {
            half.deliver(&data[overlap as usize..]).await;
            half.advance(data.len() as u64 - overlap);
        }

        Self::drain_contiguous(half, total_pending).await;
    }

    /// Deliver buffered chunks that have become contiguous.
    async fn drain_contiguous(half: &mut HalfState, total_pending: &mut usize) {
        while let Some((&offset, _)) = half.pending.first_key_value() {
            if offset > half.next_offset {
                break;
            }

            let Some(chunk) = half.pending.remove(&offset) else {
                break;
            };
            *total_pending = total_pending.saturating_sub(1);

            let end = offset + chunk.data.len() as u64;
            if end <= half.next_offset {
                continue; // fully duplicate
            }

            let skip = (half.next_offset - offset) as usize;
            half.deliver(&chunk.data[skip..]).await;
            half.advance((chunk.data.len() - skip) as u64);
        }
    }

    /// Jump a half past its oldest gap, discarding the buffered run behind
    /// it, and signal the loss to the scanner.
    fn skip_past_gap(half: &mut HalfState, total_pending: &mut usize) -> bool {
        let Some((&first, _)) = half.pending.first_key_value() else {
            return false;
        };

        let gap = first - half.next_offset;

        // The contiguous run after the gap travels with the skip signal,
        // so its bytes are discarded rather than written.
        let mut cursor = first;
        while let Some((&offset, _)) = half.pending.first_key_value() {
            if offset > cursor {
                break;
            }
            let Some(chunk) = half.pending.remove(&offset) else {
                break;
            };
            *total_pending = total_pending.saturating_sub(1);

            let end = offset + chunk.data.len() as u64;
            if end > cursor {
                cursor = end;
            }
        }

        if let Some(writer) = half.writer.as_ref() {
            writer.mark_lost(gap);
        }

        let advance = cursor - half.next_offset;
        half.advance(advance);
        true
    }

    fn skip_oldest_in_flow(flow: &mut FlowState, total_pending: &mut usize) {
        let oldest_dir = match (
            flow.halves[0].oldest_arrival(),
            flow.halves[1].oldest_arrival(),
        ) {
            (Some(a), Some(b)) => usize::from(b < a),
            (Some(_), None) => 0,
            (None, Some(_)) => 1,
            (None, None) => return,
        };

        Self::skip_past_gap(&mut flow.halves[oldest_dir], total_pending);
    }

    fn skip_globally_oldest(&mut self) {
        let mut oldest: Option<(FlowKey, Instant)> = None;
        for (key, flow) in &self.flows {
            for half in &flow.halves {
                if let Some(arrived) = half.oldest_arrival() {
                    if oldest.is_none_or(|(_, t)| arrived < t) {
                        oldest = Some((*key, arrived));
                    }
                }
            }
        }

        if let Some((key, _)) = oldest {
            if let Some(flow) = self.flows.get_mut(&key) {
                Self::skip_oldest_in_flow(flow, &mut self.total_pending);
            }
        }
    }

    /// Skip stale pending data and close idle connections.
    ///
    /// Halves whose oldest buffered chunk predates `cutoff` are skipped
    /// forward; connections silent since `cutoff` with nothing buffered
    /// are closed.
    pub fn flush_older_than(&mut self, cutoff: Instant) -> FlushSummary {
        let mut summary = FlushSummary::default();

        for flow in self.flows.values_mut() {
            for half in &mut flow.halves {
                while half.oldest_arrival().is_some_and(|arrived| arrived < cutoff) {
                    if !Self::skip_past_gap(half, &mut self.total_pending) {
                        break;
                    }
                    summary.flushed += 1;
                }
            }
        }

        let idle: Vec<FlowKey> = self
            .flows
            .iter()
            .filter(|(_, flow)| flow.last_activity < cutoff && flow.pending_pages() == 0)
            .map(|(key, _)| *key)
            .collect();

        for key in idle {
            self.close_flow(key, "idle past flush age");
            summary.closed += 1;
        }

        summary
    }

    fn close_flow(&mut self, key: FlowKey, reason: &str) {
        if let Some(flow) = self.flows.remove(&key) {
            let pending = flow.pending_pages();
            self.total_pending = self.total_pending.saturating_sub(pending);
            tracing::debug!(%key, reason, pending, "closing connection");
            // Writers drop here; scanners drain and exit with EOF.
        }
    }

    /// Close every connection. Returns how many were open.
    pub fn close_all(&mut self) -> usize {
        let keys: Vec<FlowKey> = self.flows.keys().copied().collect();
        let count = keys.len();
        for key in keys {
            self.close_flow(key, "capture shutting down");
        }
        count
    }

    /// Wait for every scanner task to drain and exit.
    ///
    /// Meaningful only after [`Assembler::close_all`]; open pipes keep
    /// their scanners alive.
    pub async fn join(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }
}

impl std::fmt::Debug for Assembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assembler")
            .field("flows", &self.flows.len())
            .field("total_pending", &self.total_pending)
            .finish_non_exhaustive()
    }
}
