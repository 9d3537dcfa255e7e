//! Reassembly adapter scenarios: ordering, gaps, caps, teardown.

mod common;

use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;

use aethertap_net::{Assembler, AssemblerConfig, Endpoint, TcpPacket};
use aethertap_proto::{Bundle, BundleCodec};

use common::ipc_bundle;

fn client() -> Endpoint {
    Endpoint::new([10, 0, 0, 1].into(), 54321)
}

fn server() -> Endpoint {
    Endpoint::new([204, 2, 229, 9].into(), 55000)
}

fn data_packet(src: Endpoint, dst: Endpoint, seq: u32, payload: &[u8]) -> TcpPacket {
    TcpPacket {
        src,
        dst,
        seq,
        syn: false,
        ack: true,
        fin: false,
        rst: false,
        payload: Bytes::copy_from_slice(payload),
    }
}

fn rst_packet(src: Endpoint, dst: Endpoint, seq: u32) -> TcpPacket {
    TcpPacket {
        src,
        dst,
        seq,
        syn: false,
        ack: false,
        fin: false,
        rst: true,
        payload: Bytes::new(),
    }
}

/// Close the assembler, wait for its tasks, and collect every bundle.
async fn finish(mut assembler: Assembler, mut rx: mpsc::Receiver<Bundle>) -> Vec<Bundle> {
    assembler.close_all();
    assembler.join().await;
    drop(assembler);

    let mut bundles = Vec::new();
    while let Some(bundle) = rx.recv().await {
        bundles.push(bundle);
    }
    bundles
}

fn assembler_with(config: AssemblerConfig) -> (Assembler, mpsc::Receiver<Bundle>) {
    let (tx, rx) = mpsc::channel(64);
    (Assembler::new(tx, BundleCodec::default(), config), rx)
}

#[tokio::test]
async fn in_order_stream_decodes() {
    let (mut assembler, rx) = assembler_with(AssemblerConfig::default());
    let blob = ipc_bundle(1_624_314_019_411, 0x9c, 120);

    let now = Instant::now();
    let mut seq = 1000u32;
    for chunk in blob.chunks(60) {
        assembler
            .handle_packet(data_packet(client(), server(), seq, chunk), now)
            .await;
        seq = seq.wrapping_add(chunk.len() as u32);
    }

    assert_eq!(assembler.flow_count(), 1);
    let bundles = finish(assembler, rx).await;
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].epoch_ms, 1_624_314_019_411);
}

#[tokio::test]
async fn out_of_order_chunks_reassemble() {
    let (mut assembler, rx) = assembler_with(AssemblerConfig::default());
    let blob = ipc_bundle(1_624_314_019_411, 0x9c, 90);

    let third = blob.len() / 3;
    let (a, rest) = blob.split_at(third);
    let (b, c) = rest.split_at(third);

    let now = Instant::now();
    let base = 50_000u32;
    assembler.handle_packet(data_packet(client(), server(), base, a), now).await;
    assembler
        .handle_packet(
            data_packet(client(), server(), base + (a.len() + b.len()) as u32, c),
            now,
        )
        .await;
    assert_eq!(assembler.pending_pages(), 1);

    assembler
        .handle_packet(data_packet(client(), server(), base + a.len() as u32, b), now)
        .await;
    assert_eq!(assembler.pending_pages(), 0);

    let bundles = finish(assembler, rx).await;
    assert_eq!(bundles.len(), 1);
}

#[tokio::test]
async fn duplicates_and_overlaps_are_tolerated() {
    let (mut assembler, rx) = assembler_with(AssemblerConfig::default());
    let blob = ipc_bundle(1_624_314_019_411, 0x9c, 64);

    let mid = blob.len() / 2;
    let now = Instant::now();
    let base = 7_000u32;

    assembler
        .handle_packet(data_packet(client(), server(), base, &blob[..mid]), now)
        .await;
    // Exact retransmission of the first chunk.
    assembler
        .handle_packet(data_packet(client(), server(), base, &blob[..mid]), now)
        .await;
    // Overlapping chunk: re-sends the last 10 delivered bytes too.
    assembler
        .handle_packet(
            data_packet(client(), server(), base + (mid - 10) as u32, &blob[mid - 10..]),
            now,
        )
        .await;

    let bundles = finish(assembler, rx).await;
    assert_eq!(bundles.len(), 1);
}

#[tokio::test]
async fn sequence_wraparound_is_handled() {
    let (mut assembler, rx) = assembler_with(AssemblerConfig::default());
    let blob = ipc_bundle(1_624_314_019_411, 0x9c, 64);

    // Stream crosses the 32-bit sequence boundary mid-bundle.
    let mid = blob.len() / 2;
    let base = u32::MAX - (mid as u32) + 1;

    let now = Instant::now();
    assembler
        .handle_packet(data_packet(client(), server(), base, &blob[..mid]), now)
        .await;
    assembler
        .handle_packet(data_packet(client(), server(), 0, &blob[mid..]), now)
        .await;

    let bundles = finish(assembler, rx).await;
    assert_eq!(bundles.len(), 1);
}

#[tokio::test]
async fn gap_skips_forward_and_next_bundle_survives() {
    let (mut assembler, rx) = assembler_with(AssemblerConfig::default());

    let lost = ipc_bundle(1_624_314_020_072, 0x8f, 140);
    let buffered = ipc_bundle(1_624_314_021_000, 0x90, 80);
    let survivor = ipc_bundle(1_624_314_022_000, 0x9c, 60);

    let now = Instant::now();
    let base = 3_000u32;

    // First half of a bundle arrives, the rest of it never does.
    let half = lost.len() / 2;
    assembler
        .handle_packet(data_packet(client(), server(), base, &lost[..half]), now)
        .await;

    // The next bundle arrives beyond the gap and parks in the buffer.
    let after_gap = base + lost.len() as u32;
    assembler
        .handle_packet(data_packet(client(), server(), after_gap, &buffered), now)
        .await;
    assert_eq!(assembler.pending_pages(), 1);

    // Maintenance flush gives up on the gap. The buffered run rides the
    // skip signal and is discarded with it.
    let summary = assembler.flush_older_than(now + Duration::from_secs(1));
    assert_eq!(summary.flushed, 1);
    assert_eq!(assembler.pending_pages(), 0);

    // Stream continues in order; only this bundle should decode.
    assembler
        .handle_packet(
            data_packet(
                client(),
                server(),
                after_gap + buffered.len() as u32,
                &survivor,
            ),
            Instant::now(),
        )
        .await;

    let bundles = finish(assembler, rx).await;
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].epoch_ms, 1_624_314_022_000);
}

#[tokio::test]
async fn per_flow_page_cap_forces_a_skip() {
    let config = AssemblerConfig {
        max_pending_pages_per_flow: 3,
        ..AssemblerConfig::default()
    };
    let (mut assembler, rx) = assembler_with(config);

    let now = Instant::now();
    let base = 9_000u32;

    // Establish the expected sequence with one delivered byte.
    assembler
        .handle_packet(data_packet(client(), server(), base, &[0x00]), now)
        .await;

    // Pile up disjoint chunks beyond a gap until the cap trips.
    for i in 0..4u32 {
        assembler
            .handle_packet(
                data_packet(client(), server(), base + 1000 + i * 200, &[0x11; 100]),
                now,
            )
            .await;
    }

    assert!(assembler.pending_pages() <= 3);

    let bundles = finish(assembler, rx).await;
    assert!(bundles.is_empty());
}

#[tokio::test]
async fn both_directions_decode_independently() {
    let (mut assembler, rx) = assembler_with(AssemblerConfig::default());

    let outbound = ipc_bundle(1_624_314_019_000, 0x9c, 40);
    let inbound = ipc_bundle(1_624_314_019_500, 0x8f, 48);

    let now = Instant::now();
    assembler
        .handle_packet(data_packet(client(), server(), 100, &outbound), now)
        .await;
    assembler
        .handle_packet(data_packet(server(), client(), 900, &inbound), now)
        .await;

    assert_eq!(assembler.flow_count(), 1);

    let mut bundles = finish(assembler, rx).await;
    assert_eq!(bundles.len(), 2);
    bundles.sort_by_key(|bundle| bundle.epoch_ms);
    assert_eq!(bundles[0].epoch_ms, 1_624_314_019_000);
    assert_eq!(bundles[1].epoch_ms, 1_624_314_019_500);
}

#[tokio::test]
async fn reset_closes_the_flow() {
    let (mut assembler, rx) = assembler_with(AssemblerConfig::default());
    let blob = ipc_bundle(1_624_314_019_411, 0x9c, 32);

    let now = Instant::now();
    assembler
        .handle_packet(data_packet(client(), server(), 500, &blob), now)
        .await;
    assembler
        .handle_packet(rst_packet(server(), client(), 42), now)
        .await;

    assert_eq!(assembler.flow_count(), 0);

    let bundles = finish(assembler, rx).await;
    assert_eq!(bundles.len(), 1);
}

#[tokio::test]
async fn idle_flow_is_closed_by_maintenance() {
    let (mut assembler, rx) = assembler_with(AssemblerConfig::default());
    let blob = ipc_bundle(1_624_314_019_411, 0x9c, 32);

    let now = Instant::now();
    assembler
        .handle_packet(data_packet(client(), server(), 500, &blob), now)
        .await;

    let summary = assembler.flush_older_than(now + Duration::from_secs(1));
    assert_eq!(summary.closed, 1);
    assert_eq!(assembler.flow_count(), 0);

    let bundles = finish(assembler, rx).await;
    assert_eq!(bundles.len(), 1);
}
