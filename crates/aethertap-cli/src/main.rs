//! Game traffic capture binary.
//!
//! Decodes captured traffic into one JSON object per bundle per line on
//! standard output. Logs go to standard error.
//!
//! # Usage
//!
//! ```bash
//! # Capture from the default interface
//! aethertap live
//!
//! # Capture from a specific interface, seeing all traffic
//! aethertap live --promiscuous enp0s2
//!
//! # Decode a saved capture
//! aethertap file ./packets.pcapng
//! ```

mod opcodes;
mod output;
mod source;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use aethertap_net::{CaptureConfig, CaptureDriver};
use aethertap_proto::{BundleCodec, oodle};

/// Game traffic capture tool
#[derive(Parser, Debug)]
#[command(name = "aethertap")]
#[command(about = "Lightweight tool for capturing the game's network traffic")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Print bundles as text with opcode names instead of JSON lines
    #[arg(long)]
    pretty: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode traffic from a network interface in real time
    Live {
        /// Capture all network traffic instead of just this computer's
        #[arg(long)]
        promiscuous: bool,

        /// Interface to capture on (default: the default route's interface)
        interface: Option<String>,
    },

    /// Decode traffic from a pcap-compatible file
    File {
        /// Capture file to decode
        filename: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Setup failures (device open, BPF compile) surface here, before any
    // output is produced.
    let (packet_tx, packet_rx) = mpsc::channel(256);
    match &args.command {
        Command::Live { promiscuous, interface } => {
            source::start_live(interface.as_deref(), *promiscuous, packet_tx)?;
        },
        Command::File { filename } => {
            source::start_file(filename, packet_tx)?;
        },
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let (bundle_tx, mut bundle_rx) = mpsc::channel(100);
    let codec = BundleCodec::new(oodle::default_decoder());
    let driver = CaptureDriver::new(packet_rx, shutdown_rx, codec, CaptureConfig::default());
    let driver_task = tokio::spawn(driver.run(bundle_tx));

    let table = if args.pretty {
        let table = opcodes::OpcodeTable::for_region(opcodes::REGION_GLOBAL);
        if table.is_none() {
            tracing::warn!("no opcode table for the global region, names unavailable");
        }
        table
    } else {
        None
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    while let Some(bundle) = bundle_rx.recv().await {
        if args.pretty {
            output::write_pretty(&mut out, &bundle, table.as_ref())?;
        } else {
            output::write_json(&mut out, &bundle)?;
        }
    }

    driver_task.await?;
    Ok(())
}
