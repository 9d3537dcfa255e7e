//! TCP flow identity and connection state tracking.
//!
//! The capture may begin in the middle of a connection, so the state
//! machine tolerates a missing three-way handshake: the first packet seen
//! on an unknown flow establishes it, and its sender is taken to be the
//! client side. When a handshake is observed it is tracked properly.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐   SYN    ┌─────────┐  SYN+ACK / ACK  ┌─────────────┐
//! │ Closed │─────────>│ SynSent │────────────────>│ Established │
//! └────────┘          └─────────┘                 └─────────────┘
//!      │ any data (tolerating missing establishment)      │ RST
//!      └─────────────────────────────────────────────────>└──> Reset
//! ```

use std::{fmt, net::IpAddr};

use bytes::Bytes;

/// One side of a TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    /// IP address.
    pub ip: IpAddr,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint from address and port.
    #[must_use]
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Connection identity: the unordered pair of endpoints.
///
/// Both directions of one connection normalize to the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    lo: Endpoint,
    hi: Endpoint,
}

impl FlowKey {
    /// Key for the connection between `a` and `b`, direction-independent.
    #[must_use]
    pub fn new(a: Endpoint, b: Endpoint) -> Self {
        if a <= b { Self { lo: a, hi: b } } else { Self { lo: b, hi: a } }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.lo, self.hi)
    }
}

/// Direction of a packet within its connection.
///
/// The client is whichever endpoint sent the first packet observed on the
/// flow, matching mid-capture tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    ToServer,
    /// Server to client.
    ToClient,
}

impl Direction {
    /// Index for direction-keyed pairs.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::ToServer => 0,
            Self::ToClient => 1,
        }
    }

    /// The opposite direction.
    #[must_use]
    pub fn flip(self) -> Self {
        match self {
            Self::ToServer => Self::ToClient,
            Self::ToClient => Self::ToServer,
        }
    }
}

/// A captured TCP packet, already sliced out of its link/IP framing.
#[derive(Debug, Clone)]
pub struct TcpPacket {
    /// Sending endpoint.
    pub src: Endpoint,
    /// Receiving endpoint.
    pub dst: Endpoint,
    /// Sequence number of the first payload byte.
    pub seq: u32,
    /// SYN flag.
    pub syn: bool,
    /// ACK flag.
    pub ack: bool,
    /// FIN flag.
    pub fin: bool,
    /// RST flag.
    pub rst: bool,
    /// Reassembly payload.
    pub payload: Bytes,
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    /// Nothing observed yet.
    Closed,
    /// SYN seen, waiting for the handshake to complete.
    SynSent,
    /// Data may flow.
    Established,
    /// Connection was reset; nothing further is accepted.
    Reset,
}

/// Per-connection packet acceptance, tolerant of mid-stream capture start.
///
/// No TCP option checking is applied: streams whose options were
/// negotiated before the capture started must still be accepted.
#[derive(Debug, Clone)]
pub struct TcpStateMachine {
    state: TcpState,
    tolerate_missing_establishment: bool,
    handshake_dir: Option<Direction>,
    fin_seen: [bool; 2],
}

impl TcpStateMachine {
    /// Create a fresh machine.
    #[must_use]
    pub fn new(tolerate_missing_establishment: bool) -> Self {
        Self {
            state: TcpState::Closed,
            tolerate_missing_establishment,
            handshake_dir: None,
            fin_seen: [false, false],
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TcpState {
        self.state
    }

    /// Whether both sides have sent FIN.
    #[must_use]
    pub fn both_fins_seen(&self) -> bool {
        self.fin_seen[0] && self.fin_seen[1]
    }

    /// Consult the machine for one packet; `true` means accept it.
    ///
    /// The RST packet itself is accepted (so the teardown is observed);
    /// everything after it is rejected.
    pub fn accept(&mut self, packet: &TcpPacket, dir: Direction) -> bool {
        if self.state == TcpState::Reset {
            return false;
        }

        if packet.rst {
            self.state = TcpState::Reset;
            return true;
        }

        if packet.fin {
            self.fin_seen[dir.index()] = true;
        }

        match self.state {
            TcpState::Closed => {
                if packet.syn && !packet.ack {
                    self.state = TcpState::SynSent;
                    self.handshake_dir = Some(dir);
                    true
                } else if self.tolerate_missing_establishment {
                    self.state = TcpState::Established;
                    true
                } else {
                    false
                }
            },
            TcpState::SynSent => {
                match self.handshake_dir {
                    // SYN+ACK answers from the other side; a plain ACK (or
                    // data) from the initiator completes the handshake.
                    Some(initiator) => {
                        if packet.syn && packet.ack && dir == initiator.flip() {
                            true
                        } else if dir == initiator && packet.ack {
                            self.state = TcpState::Established;
                            true
                        } else if self.tolerate_missing_establishment {
                            self.state = TcpState::Established;
                            true
                        } else {
                            false
                        }
                    },
                    None => {
                        if self.tolerate_missing_establishment {
                            self.state = TcpState::Established;
                            true
                        } else {
                            false
                        }
                    },
                }
            },
            TcpState::Established => true,
            TcpState::Reset => false,
        }
    }
}
