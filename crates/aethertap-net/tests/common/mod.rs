//! Builders shared across the integration test binaries.
#![allow(dead_code)]

use aethertap_proto::{BundleHeader, KEEPALIVE_MAGIC, SegmentHeader, SegmentKind};

/// Serialize an uncompressed single-segment IPC bundle.
pub fn ipc_bundle(epoch_ms: u64, opcode: u16, data_len: usize) -> Vec<u8> {
    let segment_len = SegmentHeader::SIZE + 16 + data_len;

    let mut header = BundleHeader::default();
    header.set_epoch_ms(epoch_ms);
    header.set_length((BundleHeader::SIZE + segment_len) as u32);
    header.set_segment_count(1);
    header.set_encoding(1);

    let mut segment = SegmentHeader::default();
    segment.set_length(segment_len as u32);
    segment.set_source(0x106d_2563);
    segment.set_target(0x106d_2563);
    segment.set_kind(SegmentKind::Ipc);

    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(&segment.to_bytes());

    // IPC sub-header
    out.extend_from_slice(&0x0014u16.to_le_bytes());
    out.extend_from_slice(&opcode.to_le_bytes());
    out.extend_from_slice(&[0u8; 2]);
    out.extend_from_slice(&0x0222u16.to_le_bytes());
    out.extend_from_slice(&((epoch_ms / 1000) as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);

    out.extend_from_slice(&vec![0x5a; data_len]);
    out
}

/// Serialize a keep-alive bundle with one probe segment.
pub fn keep_alive_bundle(epoch_ms: u64, id: u32) -> Vec<u8> {
    let segment_len = SegmentHeader::SIZE + 8;

    let mut header = BundleHeader::default();
    header.set_magic(KEEPALIVE_MAGIC);
    header.set_epoch_ms(epoch_ms);
    header.set_length((BundleHeader::SIZE + segment_len) as u32);
    header.set_segment_count(1);

    let mut segment = SegmentHeader::default();
    segment.set_length(segment_len as u32);
    segment.set_kind(SegmentKind::ClientKeepAlive);

    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(&segment.to_bytes());
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&((epoch_ms / 1000) as u32).to_le_bytes());
    out
}
