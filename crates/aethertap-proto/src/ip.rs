//! Known data-center address blocks.
//!
//! Found by resolving each lobby domain to its IPv4 address, then looking
//! up the assigned address block that contains it in the regional registry.
//! This is configuration data for the capture filter, not protocol logic;
//! the decoder itself accepts traffic from any address.

use std::net::Ipv4Addr;

/// Theorized public data-center networks, in CIDR notation.
pub const DATA_CENTER_CIDRS: [&str; 5] = [
    // neolobby01, neolobby03, neolobby05
    "124.150.152.0/21",
    // neolobby02, neolobby04, neolobby08, neolobby11
    "204.0.0.0/14",
    // neolobby06, neolobby07
    "80.239.145.0/24",
    // neolobby09
    "153.254.80.0/22",
    // neolobby10
    "202.67.48.0/20",
];

const DATA_CENTER_NETS: [(Ipv4Addr, u32); 5] = [
    (Ipv4Addr::new(124, 150, 152, 0), 21),
    (Ipv4Addr::new(204, 0, 0, 0), 14),
    (Ipv4Addr::new(80, 239, 145, 0), 24),
    (Ipv4Addr::new(153, 254, 80, 0), 22),
    (Ipv4Addr::new(202, 67, 48, 0), 20),
];

/// Whether `ip` falls inside a known data-center block.
#[must_use]
pub fn is_datacenter_ip(ip: Ipv4Addr) -> bool {
    DATA_CENTER_NETS
        .iter()
        .any(|&(net, prefix)| contains(net, prefix, ip))
}

fn contains(net: Ipv4Addr, prefix: u32, ip: Ipv4Addr) -> bool {
    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    u32::from(net) & mask == u32::from(ip) & mask
}
