//! Decode tests against real captured bundles.
//!
//! The two blobs are genuine wire captures: a 288-byte uncompressed bundle
//! and a 266-byte zlib-compressed bundle, each carrying one game message.

use aethertap_proto::{
    Bundle, BundleCodec, BundleHeader, Compression, DecodeError, IPC_MAGIC, KEEPALIVE_MAGIC,
    SegmentKind, SegmentPayload, peek_length,
};

pub const UNCOMPRESSED_IPC: [u8; 288] = [
    0x52, 0x52, 0xa0, 0x41, 0xff, 0x5d, 0x46, 0xe2,
    0x7f, 0x2a, 0x64, 0x4d, 0x7b, 0x99, 0xc4, 0x75,
    0x53, 0xfe, 0xa8, 0x30, 0x7a, 0x01, 0x00, 0x00,
    0x20, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00,
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xf8, 0x00, 0x00, 0x00, 0x63, 0x25, 0x6d, 0x10,
    0x63, 0x25, 0x6d, 0x10, 0x03, 0x00, 0x00, 0x00,
    0x14, 0x00, 0x9c, 0x00, 0x00, 0x00, 0x22, 0x02,
    0xa3, 0x10, 0xd1, 0x60, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x20, 0x00, 0x80, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x02, 0x22, 0x53, 0x6f, 0x6d, 0x65, 0x74,
    0x69, 0x6d, 0x65, 0x73, 0x20, 0x6d, 0x79, 0x20,
    0x67, 0x65, 0x6e, 0x69, 0x75, 0x73, 0x20, 0x69,
    0x73, 0x2e, 0x2e, 0x2e, 0x20, 0x69, 0x74, 0x27,
    0x73, 0x20, 0x61, 0x6c, 0x6d, 0x6f, 0x73, 0x74,
    0x20, 0x66, 0x72, 0x69, 0x67, 0x68, 0x74, 0x65,
    0x6e, 0x69, 0x6e, 0x67, 0x2e, 0x22, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

pub const COMPRESSED_IPC: [u8; 266] = [
    0x52, 0x52, 0xa0, 0x41, 0xff, 0x5d, 0x46, 0xe2,
    0x7f, 0x2a, 0x64, 0x4d, 0x7b, 0x99, 0xc4, 0x75,
    0xe8, 0x00, 0xa9, 0x30, 0x7a, 0x01, 0x00, 0x00,
    0x0a, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00,
    0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x78, 0x9c, 0x7b, 0xc1, 0xcc, 0xc0, 0x90, 0xac,
    0x9a, 0x2b, 0x00, 0xc2, 0x40, 0x26, 0x83, 0x08,
    0x43, 0x3f, 0x90, 0x52, 0x62, 0x5a, 0x22, 0x70,
    0x31, 0x81, 0x01, 0x0e, 0x2c, 0x19, 0xf0, 0x01,
    0x26, 0x0c, 0x06, 0x0e, 0x3e, 0x14, 0x38, 0xa0,
    0xd1, 0x02, 0x68, 0xca, 0x59, 0xf0, 0xda, 0x86,
    0x50, 0x87, 0x6e, 0xbc, 0x03, 0x1a, 0x5f, 0x01,
    0x8d, 0x2f, 0x80, 0x46, 0xc3, 0xf4, 0xa3, 0xbb,
    0x07, 0x5d, 0x3d, 0x4c, 0x1c, 0x97, 0xbd, 0x30,
    0x3e, 0xba, 0x7a, 0x16, 0x34, 0x1a, 0xdd, 0x5e,
    0x06, 0x1c, 0xf2, 0x30, 0xba, 0x01, 0x87, 0xb9,
    0x0e, 0x68, 0xe2, 0xe8, 0xfe, 0x60, 0x41, 0xe3,
    0x33, 0xe0, 0xe0, 0x13, 0x03, 0x38, 0x18, 0x18,
    0xc1, 0x74, 0x1f, 0x23, 0xaa, 0x78, 0x2e, 0x8e,
    0xb8, 0x95, 0x60, 0x84, 0x48, 0xbc, 0x61, 0x82,
    0xd0, 0x62, 0x50, 0x3e, 0xcc, 0x1c, 0x76, 0x5c,
    0x89, 0x02, 0x0a, 0x98, 0xa0, 0xea, 0x60, 0x34,
    0x0c, 0xbc, 0x63, 0x42, 0xd5, 0xb7, 0x09, 0x8d,
    0xff, 0x18, 0xca, 0xb7, 0x86, 0x9a, 0xcf, 0x08,
    0xd5, 0xff, 0x1d, 0x2a, 0x2e, 0x8d, 0xa6, 0x7e,
    0x3d, 0x94, 0xff, 0x01, 0x4a, 0xe3, 0xb2, 0x17,
    0xc6, 0xdf, 0x8a, 0xa6, 0x5e, 0x06, 0xea, 0x2f,
    0x49, 0xa8, 0x7d, 0xbf, 0xd1, 0xcc, 0x81, 0x01,
    0x4f, 0xa8, 0xb8, 0x14, 0x94, 0x86, 0x99, 0xc3,
    0x0d, 0x55, 0x67, 0x0f, 0xd5, 0xcf, 0xc7, 0xcc,
    0x84, 0xe2, 0xcf, 0xd9, 0x4c, 0xa8, 0xfe, 0x80,
    0x89, 0xb3, 0xc1, 0xc2, 0x93, 0x19, 0xd5, 0x3f,
    0x7c, 0xcc, 0xf8, 0xc3, 0x15, 0x00, 0x64, 0x23,
    0x19, 0x43,
];

fn decode(bytes: &[u8]) -> Result<Bundle, DecodeError> {
    BundleCodec::default().decode(bytes)
}

#[test]
fn uncompressed_ipc_bundle() {
    let bundle = decode(&UNCOMPRESSED_IPC).unwrap();

    assert_eq!(bundle.magic, IPC_MAGIC);
    assert_eq!(bundle.epoch_ms, 1_624_314_019_411);
    assert_eq!(bundle.length, 288);
    assert_eq!(bundle.connection_type, 0);
    assert_eq!(bundle.encoding, 1);
    assert_eq!(bundle.compression, Compression::None);
    assert!(!bundle.is_compressed());

    assert_eq!(bundle.segments.len(), 1);
    let segment = &bundle.segments[0];
    assert_eq!(segment.length, 248);
    assert_eq!(segment.source, 0x106d_2563);
    assert_eq!(segment.target, 0x106d_2563);
    assert_eq!(segment.kind, SegmentKind::Ipc);

    let SegmentPayload::Ipc(ipc) = &segment.payload else {
        panic!("expected an IPC payload");
    };
    assert_eq!(ipc.magic, 0x0014);
    assert_eq!(ipc.opcode, 0x009c);
    assert_eq!(ipc.server_id, 0x0222);
    assert_eq!(ipc.epoch_s, 1_624_314_019);
    assert_eq!(ipc.data.len(), 248 - 16 - 16);
}

#[test]
fn compressed_ipc_bundle() {
    let bundle = decode(&COMPRESSED_IPC).unwrap();

    assert_eq!(bundle.magic, IPC_MAGIC);
    assert_eq!(bundle.epoch_ms, 1_624_314_020_072);
    assert_eq!(bundle.length, 266);
    assert_eq!(bundle.connection_type, 0);
    assert_eq!(bundle.encoding, 1);
    assert_eq!(bundle.compression, Compression::Zlib);
    assert!(bundle.is_compressed());

    assert_eq!(bundle.segments.len(), 1);
    let segment = &bundle.segments[0];
    assert_eq!(segment.length, 1000);
    assert_eq!(segment.source, 0x106d_2563);
    assert_eq!(segment.target, 0x106d_2563);
    assert_eq!(segment.kind, SegmentKind::Ipc);

    let SegmentPayload::Ipc(ipc) = &segment.payload else {
        panic!("expected an IPC payload");
    };
    assert_eq!(ipc.magic, 0x0014);
    assert_eq!(ipc.opcode, 0x038f);
    assert_eq!(ipc.server_id, 0x0222);
    assert_eq!(ipc.epoch_s, 1_624_314_020);
}

#[test]
fn segment_bytes_account_for_payload() {
    // Decompressed payload must equal the sum of segment lengths exactly.
    for blob in [&UNCOMPRESSED_IPC[..], &COMPRESSED_IPC[..]] {
        let bundle = decode(blob).unwrap();
        let total: u32 = bundle.segments.iter().map(|s| s.length).sum();
        if bundle.compression == Compression::None {
            assert_eq!(total, bundle.length - BundleHeader::SIZE as u32);
        } else {
            assert_eq!(total, 1000);
        }
    }
}

#[test]
fn peek_matches_parsed_length() {
    for blob in [&UNCOMPRESSED_IPC[..], &COMPRESSED_IPC[..]] {
        let bundle = decode(blob).unwrap();
        assert_eq!(peek_length(blob), Some(bundle.length));
    }
}

#[test]
fn wall_clock_conversion() {
    use std::time::{Duration, UNIX_EPOCH};

    let bundle = decode(&UNCOMPRESSED_IPC).unwrap();
    assert_eq!(
        bundle.time(),
        UNIX_EPOCH + Duration::from_millis(1_624_314_019_411)
    );
}

#[test]
fn keep_alive_bundle() {
    // 64-byte keep-alive bundle: 40-byte header plus one 24-byte segment.
    let mut blob = Vec::new();
    blob.extend_from_slice(&KEEPALIVE_MAGIC);
    blob.extend_from_slice(&1_624_314_021_000u64.to_le_bytes());
    blob.extend_from_slice(&64u32.to_le_bytes());
    blob.extend_from_slice(&0u16.to_le_bytes());
    blob.extend_from_slice(&1u16.to_le_bytes());
    blob.push(1); // encoding
    blob.push(0); // compression
    blob.extend_from_slice(&[0u8; 2]);
    blob.extend_from_slice(&0u32.to_le_bytes());

    // Segment header
    blob.extend_from_slice(&24u32.to_le_bytes());
    blob.extend_from_slice(&0u32.to_le_bytes());
    blob.extend_from_slice(&0u32.to_le_bytes());
    blob.extend_from_slice(&7u16.to_le_bytes());
    blob.extend_from_slice(&[0u8; 2]);

    // Keep-alive payload
    blob.extend_from_slice(&0x0000_4d2fu32.to_le_bytes());
    blob.extend_from_slice(&1_624_314_021u32.to_le_bytes());

    let bundle = decode(&blob).unwrap();
    assert!(bundle.is_keep_alive());
    assert_eq!(bundle.segments.len(), 1);

    let segment = &bundle.segments[0];
    assert_eq!(segment.kind, SegmentKind::ClientKeepAlive);
    let SegmentPayload::KeepAlive(ka) = &segment.payload else {
        panic!("expected a keep-alive payload");
    };
    assert_eq!(ka.id, 0x0000_4d2f);
    assert_eq!(ka.epoch_s, 1_624_314_021);
}

#[test]
fn truncated_zlib_stream_errors() {
    let mut blob = COMPRESSED_IPC.to_vec();
    blob.truncate(200);
    blob[24..28].copy_from_slice(&200u32.to_le_bytes());

    assert!(matches!(decode(&blob), Err(DecodeError::Zlib(_))));
}

#[test]
fn oodle_without_codec_fails_decompression() {
    // Compression tag 2 on a build without the proprietary codec.
    let mut header = BundleHeader::default();
    header.set_length(48);
    header.set_compression(Compression::Oodle);
    header.set_uncompressed_length(64);

    let mut blob = header.to_bytes().to_vec();
    blob.extend_from_slice(&[0u8; 8]);

    assert!(matches!(decode(&blob), Err(DecodeError::Oodle(_))));
}

#[test]
fn truncated_bundle_is_not_enough_data() {
    assert!(matches!(
        decode(&UNCOMPRESSED_IPC[..100]),
        Err(DecodeError::NotEnoughData { needed: 288, available: 100 })
    ));
    assert!(matches!(
        decode(&UNCOMPRESSED_IPC[..30]),
        Err(DecodeError::NotEnoughData { .. })
    ));
}

#[test]
fn corrupt_segment_length_rejected() {
    let mut blob = UNCOMPRESSED_IPC.to_vec();
    // Declare a segment longer than the remaining payload.
    blob[40..44].copy_from_slice(&10_000u32.to_le_bytes());

    assert!(matches!(decode(&blob), Err(DecodeError::BadSegment { .. })));
}

#[test]
fn json_output_schema() {
    let bundle = decode(&UNCOMPRESSED_IPC).unwrap();
    let value: serde_json::Value = serde_json::to_value(&bundle).unwrap();

    assert_eq!(value["epoch"], 1_624_314_019_411u64);
    assert_eq!(value["connectionType"], 0);
    assert!(value.get("length").is_none());
    assert!(value.get("compression").is_none());

    let segment = &value["segments"][0];
    assert_eq!(segment["source"], 0x106d_2563);
    assert_eq!(segment["target"], 0x106d_2563);
    assert_eq!(segment["type"], 3);
    assert_eq!(segment["payload"]["type"], 0x009c);
    assert_eq!(segment["payload"]["serverId"], 0x0222);
    assert_eq!(segment["payload"]["epoch"], 1_624_314_019);
    assert!(segment["payload"]["data"].is_string());
    assert!(segment["payload"].get("magic").is_none());
}
