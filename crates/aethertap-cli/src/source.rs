//! Capture handles: live devices, offline files, and the BPF filter.
//!
//! libpcap reads block, so each capture handle gets a plain thread that
//! pumps packets into the driver's channel. Backpressure comes from the
//! bounded channel; the thread ends when the capture drains or the driver
//! goes away.

use std::path::Path;

use bytes::Bytes;
use pcap::{Activated, Capture, Device};
use thiserror::Error;
use tokio::sync::mpsc;

use aethertap_net::{CapturedPacket, LinkKind};
use aethertap_proto::ip::DATA_CENTER_CIDRS;

/// Environment variable overriding the default BPF filter.
const BPF_ENV: &str = "AETHERTAP_BPF";

/// Snapshot length; bundles never exceed the game's MTU-sized segments.
const SNAPLEN: i32 = 2048;

/// Capture setup failures. These are fatal at startup.
#[derive(Debug, Error)]
pub enum SourceError {
    /// No interface to capture on could be determined.
    #[error("no default capture device found")]
    NoDefaultDevice,

    /// Device open, file open, or BPF compile failed.
    #[error(transparent)]
    Pcap(#[from] pcap::Error),
}

/// Open a live capture and start pumping packets into `tx`.
pub fn start_live(
    interface: Option<&str>,
    promiscuous: bool,
    tx: mpsc::Sender<CapturedPacket>,
) -> Result<(), SourceError> {
    let name = match interface {
        Some(name) => {
            tracing::info!(device = name, "capturing on specified device");
            name.to_string()
        },
        None => {
            let name = default_device()?;
            tracing::info!(device = %name, "capturing on default device");
            name
        },
    };

    let capture = Capture::from_device(name.as_str())?
        .promisc(promiscuous)
        .snaplen(SNAPLEN)
        .immediate_mode(true)
        .open()?;

    let capture = install_filter(capture)?;
    spawn_reader(capture, tx);
    Ok(())
}

/// Open a capture file and start pumping packets into `tx`.
pub fn start_file(path: &Path, tx: mpsc::Sender<CapturedPacket>) -> Result<(), SourceError> {
    tracing::info!(file = %path.display(), "parsing capture file");

    let capture = Capture::from_file(path)?;
    let capture = install_filter(capture)?;
    spawn_reader(capture, tx);
    Ok(())
}

/// The BPF filter from the environment, or the default when unset.
pub fn bpf_expression() -> String {
    match std::env::var(BPF_ENV) {
        Ok(expr) => {
            tracing::warn!(new_bpf = %expr, "default BPF filter overridden in environment");
            expr
        },
        Err(_) => default_bpf(),
    }
}

/// Filter selecting ephemeral-port TCP to and from known game networks.
fn default_bpf() -> String {
    let nets = DATA_CENTER_CIDRS
        .iter()
        .map(|cidr| format!("net {cidr}"))
        .collect::<Vec<_>>()
        .join(" or ");

    format!(
        "tcp and src portrange 49152-65535 and dst portrange 49152-65535 and ({nets})"
    )
}

/// Name of the capture device for the default route.
fn default_device() -> Result<String, SourceError> {
    Device::lookup()?
        .map(|device| device.name)
        .ok_or(SourceError::NoDefaultDevice)
}

fn install_filter<T: Activated>(mut capture: Capture<T>) -> Result<Capture<T>, SourceError> {
    let expr = bpf_expression();
    tracing::debug!(filter = %expr, "installing BPF filter");
    capture.filter(&expr, true)?;
    Ok(capture)
}

fn link_kind(linktype: pcap::Linktype) -> LinkKind {
    if linktype == pcap::Linktype::ETHERNET {
        LinkKind::Ethernet
    } else {
        LinkKind::Ip
    }
}

fn spawn_reader<T: Activated + Send + 'static>(
    mut capture: Capture<T>,
    tx: mpsc::Sender<CapturedPacket>,
) {
    let link = link_kind(capture.get_datalink());

    std::thread::spawn(move || {
        loop {
            match capture.next_packet() {
                Ok(packet) => {
                    let secs = u64::try_from(packet.header.ts.tv_sec).unwrap_or(0);
                    let micros = u64::try_from(packet.header.ts.tv_usec).unwrap_or(0);
                    let captured = CapturedPacket {
                        epoch_ms: secs * 1000 + micros / 1000,
                        link,
                        data: Bytes::copy_from_slice(packet.data),
                    };

                    if tx.blocking_send(captured).is_err() {
                        tracing::debug!("packet consumer gone, stopping reader");
                        break;
                    }
                },
                Err(pcap::Error::TimeoutExpired) => {},
                Err(pcap::Error::NoMorePackets) => break,
                Err(err) => {
                    tracing::error!(%err, "capture read failed");
                    break;
                },
            }
        }

        tracing::debug!("packet reader finished");
    });
}
