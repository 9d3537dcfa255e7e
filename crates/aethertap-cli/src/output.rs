//! Bundle rendering: NDJSON for machines, indented text for humans.

use std::io::Write;

use aethertap_proto::{Bundle, SegmentPayload};

use crate::opcodes::{IpcList, OpcodeTable};

/// Write one bundle as a single JSON line.
pub fn write_json<W: Write>(out: &mut W, bundle: &Bundle) -> std::io::Result<()> {
    serde_json::to_writer(&mut *out, bundle).map_err(std::io::Error::from)?;
    out.write_all(b"\n")?;
    out.flush()
}

/// Write one bundle as indented text, resolving opcode names when a table
/// is available.
pub fn write_pretty<W: Write>(
    out: &mut W,
    bundle: &Bundle,
    table: Option<&OpcodeTable>,
) -> std::io::Result<()> {
    writeln!(
        out,
        "* Bundle ({} bytes, epoch {} ms)",
        bundle.length, bundle.epoch_ms
    )?;

    for (i, segment) in bundle.segments.iter().enumerate() {
        writeln!(
            out,
            "    [{}] Segment - {} ({} bytes, {:#010x} -> {:#010x})",
            i + 1,
            segment.kind,
            segment.length,
            segment.source,
            segment.target
        )?;

        if let SegmentPayload::Ipc(ipc) = &segment.payload {
            if let Some(table) = table {
                writeln!(
                    out,
                    "        ServerZone: {:?} | ClientZone: {:?}",
                    table.name_of(IpcList::ServerZone, ipc.opcode).unwrap_or(""),
                    table.name_of(IpcList::ClientZone, ipc.opcode).unwrap_or(""),
                )?;
            }
        }
    }

    out.flush()
}
