//! Turns a captured LAN-side Ethernet frame into a host observation.

use std::net::Ipv4Addr;

use host_traffic_common::{Direction, MacAddr};

use crate::table::Observation;

const ETH_P_IPV4: u16 = 0x0800;
const ETH_P_8021Q: u16 = 0x8100;
pub const ETH_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const IPV4_MIN_HEADER: usize = 20;

/// `sll_pkttype` of a captured frame, as reported by AF_PACKET.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PacketType {
    Host,
    Broadcast,
    Multicast,
    OtherHost,
    /// Sent by this machine, i.e. toward a LAN host.
    Outgoing,
    Unknown(u8),
}

impl PacketType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            libc::PACKET_HOST => Self::Host,
            libc::PACKET_BROADCAST => Self::Broadcast,
            libc::PACKET_MULTICAST => Self::Multicast,
            libc::PACKET_OTHERHOST => Self::OtherHost,
            libc::PACKET_OUTGOING => Self::Outgoing,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Classified<'a> {
    Observe(Observation<'a>),
    /// The host address is a sentinel; the frame must not be counted.
    Drop,
    /// Not IPv4, truncated, not routed through this box, or not addressed to
    /// a single host.
    Ignore,
}

/// The router as seen from one LAN interface.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Gateway {
    /// Hardware address of the capturing interface.
    pub mac: MacAddr,
    /// Every IPv4 address assigned to this machine.
    pub local_addrs: Vec<Ipv4Addr>,
}

impl Gateway {
    pub fn is_local(&self, ip: Ipv4Addr) -> bool {
        self.local_addrs.contains(&ip)
    }
}

/// Classifies a frame seen on a LAN interface.
///
/// Only routed traffic counts: the frame's other Ethernet endpoint must be the
/// gateway itself, and neither IP endpoint may be one of its own addresses.
/// Frames the gateway sends toward the LAN are downloads of their destination
/// host; frames a host sends to the gateway are uploads of that host. The byte
/// count is the IPv4 total length plus the Ethernet header.
pub fn classify<'a>(
    frame: &'a [u8],
    pkttype: PacketType,
    device: &'a str,
    gateway: &Gateway,
) -> Classified<'a> {
    let Some((ether_type, l3_offset)) = ether_type(frame) else {
        return Classified::Ignore;
    };
    if ether_type != ETH_P_IPV4 {
        return Classified::Ignore;
    }
    let Some(ip) = parse_ipv4(&frame[l3_offset..]) else {
        return Classified::Ignore;
    };

    // (direction, host MAC, gateway-side MAC, host IP, remote IP)
    let (direction, mac, peer, addr, remote) = match pkttype {
        PacketType::Outgoing => (Direction::Inbound, &frame[0..6], &frame[6..12], ip.dst, ip.src),
        PacketType::Host => (Direction::Outbound, &frame[6..12], &frame[0..6], ip.src, ip.dst),
        _ => return Classified::Ignore,
    };
    if peer != gateway.mac.0.as_slice() || gateway.is_local(remote) {
        return Classified::Ignore;
    }

    let mut octets = [0u8; 6];
    octets.copy_from_slice(mac);
    let parsed = MacAddr(octets);
    if parsed == MacAddr::ZERO {
        return Classified::Drop;
    }
    if !parsed.is_valid() || parsed.is_multicast() {
        return Classified::Ignore;
    }

    Classified::Observe(Observation {
        mac,
        ip: addr,
        device,
        direction,
        bytes: u64::from(ip.total_len) + ETH_HEADER_LEN as u64,
    })
}

fn ether_type(frame: &[u8]) -> Option<(u16, usize)> {
    if frame.len() < ETH_HEADER_LEN {
        return None;
    }
    let outer = u16::from_be_bytes([frame[12], frame[13]]);
    if outer != ETH_P_8021Q {
        return Some((outer, ETH_HEADER_LEN));
    }
    let inner_at = ETH_HEADER_LEN + VLAN_TAG_LEN;
    if frame.len() < inner_at {
        return None;
    }
    Some((u16::from_be_bytes([frame[16], frame[17]]), inner_at))
}

struct Ipv4Fields {
    src: Ipv4Addr,
    dst: Ipv4Addr,
    total_len: u16,
}

fn parse_ipv4(payload: &[u8]) -> Option<Ipv4Fields> {
    if payload.len() < IPV4_MIN_HEADER {
        return None;
    }
    let version_ihl = payload[0];
    if version_ihl >> 4 != 4 {
        return None;
    }
    let ihl_bytes = ((version_ihl & 0x0f) as usize) * 4;
    if payload.len() < ihl_bytes || ihl_bytes < IPV4_MIN_HEADER {
        return None;
    }
    let total_len = u16::from_be_bytes([payload[2], payload[3]]);
    let src: [u8; 4] = payload[12..16].try_into().ok()?;
    let dst: [u8; 4] = payload[16..20].try_into().ok()?;
    Some(Ipv4Fields {
        src: Ipv4Addr::from(src),
        dst: Ipv4Addr::from(dst),
        total_len,
    })
}
