//! SOCKS5-style addressing.
//!
//! Target descriptors travel as `type byte || address bytes || port (BE)`,
//! the SOCKS5 address encoding. UDP payloads additionally carry the 3-byte
//! SOCKS5 UDP request header in front of the address.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::{Error, Result};

/// SOCKS5 address type: IPv4
pub const ATYP_IPV4: u8 = 0x01;
/// SOCKS5 address type: domain name
pub const ATYP_DOMAIN: u8 = 0x03;
/// SOCKS5 address type: IPv6
pub const ATYP_IPV6: u8 = 0x04;

/// A SOCKS5-style target address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocksAddr {
    /// IPv4 address and port
    Ipv4(Ipv4Addr, u16),
    /// Domain name and port
    Domain(String, u16),
    /// IPv6 address and port
    Ipv6(Ipv6Addr, u16),
}

impl SocksAddr {
    /// Parse an address off the front of `buf`; returns the address and the
    /// number of bytes it occupied.
    pub fn parse(buf: &[u8]) -> Option<(SocksAddr, usize)> {
        let atyp = *buf.first()?;
        match atyp {
            ATYP_IPV4 => {
                if buf.len() < 1 + 4 + 2 {
                    return None;
                }
                let ip = Ipv4Addr::new(buf[1], buf[2], buf[3], buf[4]);
                let port = u16::from_be_bytes([buf[5], buf[6]]);
                Some((SocksAddr::Ipv4(ip, port), 7))
            }
            ATYP_DOMAIN => {
                let len = *buf.get(1)? as usize;
                if len == 0 || buf.len() < 2 + len + 2 {
                    return None;
                }
                let domain = std::str::from_utf8(&buf[2..2 + len]).ok()?.to_string();
                let port = u16::from_be_bytes([buf[2 + len], buf[3 + len]]);
                Some((SocksAddr::Domain(domain, port), 2 + len + 2))
            }
            ATYP_IPV6 => {
                if buf.len() < 1 + 16 + 2 {
                    return None;
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[1..17]);
                let port = u16::from_be_bytes([buf[17], buf[18]]);
                Some((SocksAddr::Ipv6(Ipv6Addr::from(octets), port), 19))
            }
            _ => None,
        }
    }

    /// Append the wire encoding to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            SocksAddr::Ipv4(ip, port) => {
                out.push(ATYP_IPV4);
                out.extend_from_slice(&ip.octets());
                out.extend_from_slice(&port.to_be_bytes());
            }
            SocksAddr::Domain(domain, port) => {
                out.push(ATYP_DOMAIN);
                out.push(domain.len() as u8);
                out.extend_from_slice(domain.as_bytes());
                out.extend_from_slice(&port.to_be_bytes());
            }
            SocksAddr::Ipv6(ip, port) => {
                out.push(ATYP_IPV6);
                out.extend_from_slice(&ip.octets());
                out.extend_from_slice(&port.to_be_bytes());
            }
        }
    }

    /// The wire encoding as an owned buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 255 + 2);
        self.write_to(&mut out);
        out
    }

    /// The port component.
    pub fn port(&self) -> u16 {
        match self {
            SocksAddr::Ipv4(_, port) | SocksAddr::Domain(_, port) | SocksAddr::Ipv6(_, port) => {
                *port
            }
        }
    }
}

impl From<SocketAddr> for SocksAddr {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => SocksAddr::Ipv4(*v4.ip(), v4.port()),
            SocketAddr::V6(v6) => SocksAddr::Ipv6(*v6.ip(), v6.port()),
        }
    }
}

impl std::str::FromStr for SocksAddr {
    type Err = Error;

    /// Parse a `host:port` literal. IPs become IP addresses; anything else
    /// a domain. No resolution happens here.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(sockaddr) = s.parse::<SocketAddr>() {
            return Ok(sockaddr.into());
        }
        let (host, port) = s.rsplit_once(':').ok_or(Error::TargetInvalid)?;
        let port: u16 = port.parse().map_err(|_| Error::TargetInvalid)?;
        if host.is_empty() || host.len() > 255 {
            return Err(Error::TargetInvalid);
        }
        Ok(SocksAddr::Domain(host.to_string(), port))
    }
}

impl std::fmt::Display for SocksAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocksAddr::Ipv4(ip, port) => write!(f, "{ip}:{port}"),
            SocksAddr::Domain(domain, port) => write!(f, "{domain}:{port}"),
            SocksAddr::Ipv6(ip, port) => write!(f, "[{ip}]:{port}"),
        }
    }
}

/// Build a SOCKS5 UDP packet: 3-byte header, address, datagram data.
pub fn encode_udp_packet(addr: &SocksAddr, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + 19 + data.len());
    out.extend_from_slice(&[0x00, 0x00, 0x00]); // RSV, RSV, FRAG
    addr.write_to(&mut out);
    out.extend_from_slice(data);
    out
}

/// Split a SOCKS5 UDP packet into its address and datagram data. Fragmented
/// packets and undecodable addresses yield `None`.
pub fn decode_udp_packet(buf: &[u8]) -> Option<(SocksAddr, &[u8])> {
    if buf.len() < 4 || buf[2] != 0x00 {
        return None;
    }
    let (addr, consumed) = SocksAddr::parse(&buf[3..])?;
    Some((addr, &buf[3 + consumed..]))
}
