//! TCP reassembly and frame recovery for captured game traffic.
//!
//! Turns a lossy, bidirectional packet capture into a stream of decoded
//! bundles. The layering, leaves first:
//!
//! - [`flow`]: bounded byte pipe per connection direction, with a loss flag
//! - [`scanner`]: scans a half flow for bundle frames, resyncing on loss
//! - [`tcp`]: connection identity and packet acceptance
//! - [`assembler`]: per-direction sequencing into the pipes
//! - [`capture`]: the event loop tying a packet source to everything above
//!
//! Every byte consumed from a TCP substream is either accounted for in a
//! parsed bundle or skipped as unrecoverable loss; nothing is silently
//! reinterpreted after a gap.

pub mod assembler;
pub mod capture;
pub mod error;
pub mod flow;
pub mod scanner;
pub mod tcp;

pub use assembler::{Assembler, AssemblerConfig, FlushSummary};
pub use capture::{CaptureConfig, CaptureDriver, CapturedPacket, LinkKind};
pub use error::FlowError;
pub use scanner::{MAX_FRAME_LEN, ScanBuffer, ScanStep, index_first};
pub use tcp::{Direction, Endpoint, FlowKey, TcpPacket, TcpState, TcpStateMachine};
