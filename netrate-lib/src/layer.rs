//! Payload size at a protocol layer.
//!
//! Sizes come from header length fields rather than the captured byte count,
//! so a short snaplen still yields on-wire sizes as long as the headers that
//! need reading were captured.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DecodeError};

/// Preamble, SFD, FCS and the inter-frame gap.
pub const ETHERNET_FRAMING_OVERHEAD: usize = 7 + 1 + 4 + 12;

/// Default UDP port measurement markers are sent to.
pub const DEFAULT_MARKER_PORT: u16 = 4000;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88A8;

const IPPROTO_ICMP: u8 = 1;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

const ICMP_DEST_UNREACH: u8 = 3;
const ICMP_PORT_UNREACH: u8 = 3;

/// Protocol layer a packet's size is measured at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Frame plus Ethernet framing overhead.
    Physical,
    /// Everything on the wire from the link header on.
    #[default]
    Link,
    /// Payload of the link layer.
    Network,
    /// Payload of the network layer.
    Transport,
    /// Payload of the transport layer.
    Application,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Physical,
        Level::Link,
        Level::Network,
        Level::Transport,
        Level::Application,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Level::Physical => "physical",
            Level::Link => "link",
            Level::Network => "network",
            Level::Transport => "transport",
            Level::Application => "application",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Level {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .into_iter()
            .find(|level| level.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownLevel(s.to_string()))
    }
}

/// Link-layer framing of a capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    /// Bare IPv4/IPv6, no link header.
    RawIp,
    Other(i32),
}

impl LinkType {
    /// Map a DLT/LINKTYPE number as reported by libpcap.
    pub fn from_dlt(dlt: i32) -> Self {
        match dlt {
            1 => LinkType::Ethernet,
            12 | 14 | 101 => LinkType::RawIp,
            other => LinkType::Other(other),
        }
    }
}

/// Bytes a raw frame occupies at `level`.
///
/// `wire_len` is the original frame length, `data` the captured bytes.
pub fn layer_size(
    level: Level,
    link: LinkType,
    wire_len: usize,
    data: &[u8],
) -> Result<usize, DecodeError> {
    match level {
        Level::Physical => Ok(match link {
            LinkType::Ethernet => wire_len + ETHERNET_FRAMING_OVERHEAD,
            _ => wire_len,
        }),
        Level::Link => Ok(wire_len),
        Level::Network => {
            let (offset, _) = link_header(link, data)?;
            Ok(wire_len.saturating_sub(offset))
        }
        Level::Transport => {
            let net = network_header(link, data)?;
            Ok(net.payload_len)
        }
        Level::Application => {
            let net = network_header(link, data)?;
            let header = transport_header_len(&net, data)?;
            Ok(net.payload_len.saturating_sub(header))
        }
    }
}

/// True for measurement markers and the ICMP port-unreachable replies they
/// provoke. Such packets are skipped while a stream has no reference time yet.
pub fn is_control_packet(link: LinkType, data: &[u8], marker_port: u16) -> bool {
    let Ok(net) = network_header(link, data) else {
        return false;
    };
    let l4 = &data[net.payload_offset.min(data.len())..];
    match net.protocol {
        IPPROTO_UDP if l4.len() >= 4 => u16::from_be_bytes([l4[2], l4[3]]) == marker_port,
        IPPROTO_ICMP if l4.len() >= 2 && net.version == 4 => {
            l4[0] == ICMP_DEST_UNREACH && l4[1] == ICMP_PORT_UNREACH
        }
        _ => false,
    }
}

/// Offset of the network header and the ethertype found there.
fn link_header(link: LinkType, data: &[u8]) -> Result<(usize, u16), DecodeError> {
    match link {
        LinkType::Ethernet => {
            if data.len() < 14 {
                return Err(DecodeError::Truncated("ethernet"));
            }
            let mut offset = 12;
            let mut ethertype = u16::from_be_bytes([data[offset], data[offset + 1]]);
            while ethertype == ETHERTYPE_VLAN || ethertype == ETHERTYPE_QINQ {
                offset += 4;
                if data.len() < offset + 2 {
                    return Err(DecodeError::Truncated("802.1Q"));
                }
                ethertype = u16::from_be_bytes([data[offset], data[offset + 1]]);
            }
            Ok((offset + 2, ethertype))
        }
        LinkType::RawIp => match data.first().map(|b| b >> 4) {
            Some(4) => Ok((0, ETHERTYPE_IPV4)),
            Some(6) => Ok((0, ETHERTYPE_IPV6)),
            Some(_) => Err(DecodeError::UnknownEtherType(0)),
            None => Err(DecodeError::Truncated("ip")),
        },
        LinkType::Other(dlt) => Err(DecodeError::UnsupportedLinkType(dlt)),
    }
}

struct NetworkHeader {
    version: u8,
    protocol: u8,
    /// Offset of the transport header within the frame.
    payload_offset: usize,
    payload_len: usize,
}

fn network_header(link: LinkType, data: &[u8]) -> Result<NetworkHeader, DecodeError> {
    let (offset, ethertype) = link_header(link, data)?;
    let ip = &data[offset..];
    match ethertype {
        ETHERTYPE_IPV4 => {
            if ip.len() < 20 {
                return Err(DecodeError::Truncated("ipv4"));
            }
            let header_len = usize::from(ip[0] & 0x0F) * 4;
            let total_len = usize::from(u16::from_be_bytes([ip[2], ip[3]]));
            Ok(NetworkHeader {
                version: 4,
                protocol: ip[9],
                payload_offset: offset + header_len,
                payload_len: total_len.saturating_sub(header_len),
            })
        }
        ETHERTYPE_IPV6 => {
            if ip.len() < 40 {
                return Err(DecodeError::Truncated("ipv6"));
            }
            let payload_len = usize::from(u16::from_be_bytes([ip[4], ip[5]]));
            let (protocol, ext_len) = skip_ipv6_extensions(ip[6], &ip[40..])?;
            Ok(NetworkHeader {
                version: 6,
                protocol,
                payload_offset: offset + 40 + ext_len,
                payload_len: payload_len.saturating_sub(ext_len),
            })
        }
        other => Err(DecodeError::UnknownEtherType(other)),
    }
}

/// Walks hop-by-hop, routing, fragment and destination option headers.
fn skip_ipv6_extensions(mut next: u8, mut rest: &[u8]) -> Result<(u8, usize), DecodeError> {
    let mut skipped = 0;
    loop {
        let len = match next {
            0 | 43 | 60 => {
                if rest.len() < 2 {
                    return Err(DecodeError::Truncated("ipv6 extension"));
                }
                (usize::from(rest[1]) + 1) * 8
            }
            44 => 8,
            _ => return Ok((next, skipped)),
        };
        if rest.len() < len {
            return Err(DecodeError::Truncated("ipv6 extension"));
        }
        next = rest[0];
        rest = &rest[len..];
        skipped += len;
    }
}

fn transport_header_len(net: &NetworkHeader, data: &[u8]) -> Result<usize, DecodeError> {
    match net.protocol {
        IPPROTO_TCP => {
            let tcp = data
                .get(net.payload_offset..)
                .filter(|tcp| tcp.len() >= 20)
                .ok_or(DecodeError::Truncated("tcp"))?;
            Ok(usize::from(tcp[12] >> 4) * 4)
        }
        IPPROTO_UDP => Ok(8),
        other => Err(DecodeError::UnsupportedTransport(other)),
    }
}
