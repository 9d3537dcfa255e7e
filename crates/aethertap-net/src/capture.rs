//! Capture driver: the select loop between packet source and reassembly.
//!
//! The driver owns no capture device. It consumes timestamped link-layer
//! frames from a channel (fed by whatever opened the device or file),
//! slices them down to TCP, and drives the [`Assembler`]. A periodic tick
//! flushes stale reassembly state, and a watch signal requests shutdown.
//! On exit every connection is flushed, the half-flow tasks drain, and the
//! outbound bundle channel closes behind them.

use std::time::{Duration, Instant};

use bytes::Bytes;
use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use tokio::{
    sync::{mpsc, watch},
    time::MissedTickBehavior,
};

use aethertap_proto::{Bundle, BundleCodec};

use crate::{
    assembler::{Assembler, AssemblerConfig},
    tcp::{Endpoint, TcpPacket},
};

/// Link framing of captured packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Ethernet II frames.
    Ethernet,
    /// Raw IP packets (loopback and tunnel captures).
    Ip,
}

/// One captured packet, as handed over by the capture edge.
#[derive(Debug, Clone)]
pub struct CapturedPacket {
    /// Capture timestamp, milliseconds since the Unix epoch.
    pub epoch_ms: u64,
    /// Link framing of `data`.
    pub link: LinkKind,
    /// Raw packet bytes.
    pub data: Bytes,
}

/// Driver timings and reassembly limits.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// How often to attempt to flush stale reassembly state.
    pub flush_interval: Duration,
    /// How old pending data may get before its stream is skipped forward.
    pub flush_age: Duration,
    /// Reassembly limits.
    pub assembler: AssemblerConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(60),
            flush_age: Duration::from_secs(180),
            assembler: AssemblerConfig::default(),
        }
    }
}

/// Runs the capture event loop until the source drains or shutdown fires.
pub struct CaptureDriver {
    packets: mpsc::Receiver<CapturedPacket>,
    shutdown: watch::Receiver<bool>,
    codec: BundleCodec,
    config: CaptureConfig,
}

impl CaptureDriver {
    /// Build a driver over a packet source and a shutdown signal.
    #[must_use]
    pub fn new(
        packets: mpsc::Receiver<CapturedPacket>,
        shutdown: watch::Receiver<bool>,
        codec: BundleCodec,
        config: CaptureConfig,
    ) -> Self {
        Self {
            packets,
            shutdown,
            codec,
            config,
        }
    }

    /// Run to completion, emitting decoded bundles into `bundles`.
    ///
    /// Returns once the packet source is exhausted or shutdown is
    /// signaled, after all flows are closed and their tasks have drained.
    pub async fn run(mut self, bundles: mpsc::Sender<Bundle>) {
        let mut assembler = Assembler::new(bundles, self.codec.clone(), self.config.assembler.clone());

        let mut tick = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.flush_interval,
            self.config.flush_interval,
        );
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                packet = self.packets.recv() => {
                    match packet {
                        Some(packet) => {
                            if let Some(tcp) = slice_tcp(&packet) {
                                assembler.handle_packet(tcp, Instant::now()).await;
                            }
                        },
                        None => {
                            tracing::info!("no more packets to handle");
                            break;
                        },
                    }
                },
                _ = tick.tick() => {
                    tracing::debug!("starting periodic flush");
                    if let Some(cutoff) = Instant::now().checked_sub(self.config.flush_age) {
                        let summary = assembler.flush_older_than(cutoff);
                        tracing::debug!(
                            flushed = summary.flushed,
                            closed = summary.closed,
                            "periodic flush finished"
                        );
                    }
                },
                _ = self.shutdown.changed() => {
                    tracing::info!("capture shutdown requested");
                    break;
                },
            }
        }

        let closed = assembler.close_all();
        tracing::info!(closed, "closed all connections");
        assembler.join().await;
        // The bundle sender drops with the assembler, closing the channel
        // once every scanner task has finished.
    }
}

/// Slice a captured frame down to its TCP packet, if it is one.
fn slice_tcp(packet: &CapturedPacket) -> Option<TcpPacket> {
    let sliced = match packet.link {
        LinkKind::Ethernet => SlicedPacket::from_ethernet(&packet.data),
        LinkKind::Ip => SlicedPacket::from_ip(&packet.data),
    };

    let sliced = match sliced {
        Ok(sliced) => sliced,
        Err(err) => {
            tracing::trace!(%err, epoch_ms = packet.epoch_ms, "unparseable packet");
            return None;
        },
    };

    let net = sliced.net.as_ref()?;
    let (src_ip, dst_ip) = if let NetSlice::Ipv4(v4) = net {
        (
            std::net::IpAddr::V4(v4.header().source_addr()),
            std::net::IpAddr::V4(v4.header().destination_addr()),
        )
    } else if let NetSlice::Ipv6(v6) = net {
        (
            std::net::IpAddr::V6(v6.header().source_addr()),
            std::net::IpAddr::V6(v6.header().destination_addr()),
        )
    } else {
        return None;
    };

    let TransportSlice::Tcp(tcp) = sliced.transport.as_ref()? else {
        return None;
    };

    Some(TcpPacket {
        src: Endpoint::new(src_ip, tcp.source_port()),
        dst: Endpoint::new(dst_ip, tcp.destination_port()),
        seq: tcp.sequence_number(),
        syn: tcp.syn(),
        ack: tcp.ack(),
        fin: tcp.fin(),
        rst: tcp.rst(),
        payload: Bytes::copy_from_slice(tcp.payload()),
    })
}
