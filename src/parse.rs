//! SOCKS5 address and port parsing utilities.
//!
//! This module defines [`AddrPort`], a representation of a destination
//! address and port (IPv4, IPv6, or domain), and [`Parse`], a helper for
//! decoding such addresses from raw SOCKS5 protocol bytes.
//!
//! The address formats are defined in
//! [RFC 1928 §5, "Addressing"](<https://www.rfc-editor.org/rfc/rfc1928#section-5>).
//!
//! Example usage:
//! ```rust
//! use socks5rs::parse::{AddrPort, Parse};
//!
//! // Example: IPv4 address 127.0.0.1:8080
//! let buf = [127, 0, 0, 1, 0x1F, 0x90]; // 127.0.0.1:8080
//! let (addr, used) = Parse::parse_ip_port(&buf, 0x01).unwrap();
//! assert_eq!(addr.to_string(), "127.0.0.1:8080");
//! assert_eq!(used, 6);
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::ATYP;
use crate::error::SocksError;

/// Represents a destination address and port.
///
/// SOCKS5 requests and replies contain an address field that may be:
/// - An IPv4 address (`ATYP = 0x01`).
/// - An IPv6 address (`ATYP = 0x04`).
/// - A domain name (`ATYP = 0x03`), which is represented here as [`AddrPort::Domain`].
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum AddrPort {
    /// An IPv4 address and port.
    V4(Ipv4Addr, u16),

    /// An IPv6 address and port.
    V6(Ipv6Addr, u16),

    /// A domain name and port.
    Domain(String, u16),
}

impl fmt::Display for AddrPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddrPort::V4(ip, port) => write!(f, "{}:{}", ip, port),
            AddrPort::V6(ip, port) => write!(f, "[{}]:{}", ip, port),
            AddrPort::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl AddrPort {
    /// The `ATYP` octet this address would be encoded with on the wire.
    pub fn atyp(&self) -> ATYP {
        match self {
            AddrPort::V4(..) => ATYP::V4,
            AddrPort::V6(..) => ATYP::V6,
            AddrPort::Domain(..) => ATYP::DomainName,
        }
    }

    /// Serializes the address/port pair in the `ATYP | ADDR | PORT` wire
    /// encoding shared by requests, replies, and UDP headers.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![self.atyp() as u8];
        match self {
            AddrPort::V4(ip, port) => {
                buf.extend_from_slice(&ip.octets());
                buf.extend_from_slice(&port.to_be_bytes());
            }
            AddrPort::V6(ip, port) => {
                buf.extend_from_slice(&ip.octets());
                buf.extend_from_slice(&port.to_be_bytes());
            }
            AddrPort::Domain(name, port) => {
                buf.push(name.len() as u8);
                buf.extend_from_slice(name.as_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
            }
        }
        buf
    }

    /// Builds an [`AddrPort`] from a resolved [`SocketAddr`], the way a
    /// BND.ADDR/PORT field is derived from a local or peer socket address
    /// once a dial, bind, or accept has completed.
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        match addr.ip() {
            IpAddr::V4(ip) => AddrPort::V4(ip, addr.port()),
            IpAddr::V6(ip) => AddrPort::V6(ip, addr.port()),
        }
    }

    /// Resolves this address to a [`SocketAddr`], performing a DNS lookup
    /// through the system resolver for [`AddrPort::Domain`] and taking the
    /// first address returned (spec: "at least one address or an error").
    pub async fn resolve(&self) -> Result<SocketAddr, SocksError> {
        match self {
            AddrPort::V4(ip, port) => Ok(SocketAddr::new(IpAddr::V4(*ip), *port)),
            AddrPort::V6(ip, port) => Ok(SocketAddr::new(IpAddr::V6(*ip), *port)),
            AddrPort::Domain(host, port) => tokio::net::lookup_host((host.as_str(), *port))
                .await
                .map_err(|e| SocksError::ResolveFailed(e.to_string()))?
                .next()
                .ok_or_else(|| SocksError::ResolveFailed(host.clone())),
        }
    }
}

/// Provides parsing utilities for extracting addresses from raw bytes.
pub struct Parse;

impl Parse {
    /// Parses an IP address and port from a byte slice.
    ///
    /// # Arguments
    ///
    /// * `buf` - The byte slice containing the raw address data.
    /// * `atyp` - The address type byte (`ATYP`) as defined by RFC 1928:
    ///   - `0x01`: IPv4 address (4 bytes) + port (2 bytes).
    ///   - `0x04`: IPv6 address (16 bytes) + port (2 bytes).
    ///
    /// # Returns
    ///
    /// Returns `Some((AddrPort, used_bytes))` on success, where `used_bytes` is the
    /// number of bytes consumed. Returns `None` if the buffer is too short or if
    /// the `atyp` is unsupported (e.g., domain names are not handled here).
    pub fn parse_ip_port(buf: &[u8], atyp: u8) -> Option<(AddrPort, usize)> {
        match atyp {
            0x01 => {
                // IPv4
                if buf.len() < 6 {
                    return None;
                }
                let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
                let port = u16::from_be_bytes([buf[4], buf[5]]);
                Some((AddrPort::V4(ip, port), 6))
            }
            0x04 => {
                // IPv6
                if buf.len() < 18 {
                    return None;
                }
                let ip = Ipv6Addr::new(
                    ((buf[0] as u16) << 8) | buf[1] as u16,
                    ((buf[2] as u16) << 8) | buf[3] as u16,
                    ((buf[4] as u16) << 8) | buf[5] as u16,
                    ((buf[6] as u16) << 8) | buf[7] as u16,
                    ((buf[8] as u16) << 8) | buf[9] as u16,
                    ((buf[10] as u16) << 8) | buf[11] as u16,
                    ((buf[12] as u16) << 8) | buf[13] as u16,
                    ((buf[14] as u16) << 8) | buf[15] as u16,
                );
                let port = u16::from_be_bytes([buf[16], buf[17]]);
                Some((AddrPort::V6(ip, port), 18))
            }
            _ => None,
        }
    }

    /// Parses a SOCKS5 address field (IPv4, IPv6, or domain name) followed
    /// by its 2-byte port, given the preceding `ATYP` octet.
    ///
    /// Returns the parsed [`AddrPort`] and the number of bytes consumed.
    /// Used by the request/reply frames (RFC 1928 §4/§6) and by the UDP
    /// request header (RFC 1928 §7), which all share this address encoding.
    pub fn parse_addr(buf: &[u8], atyp: u8) -> Result<(AddrPort, usize), SocksError> {
        match atyp {
            0x01 | 0x04 => Self::parse_ip_port(buf, atyp).ok_or(SocksError::ConnRequestTooShort),
            0x03 => {
                if buf.is_empty() {
                    return Err(SocksError::InvalidDomain);
                }
                let len = buf[0] as usize;
                if buf.len() < 1 + len + 2 {
                    return Err(SocksError::InvalidDomain);
                }
                let domain = String::from_utf8(buf[1..1 + len].to_vec())
                    .map_err(|_| SocksError::InvalidDomain)?;
                let port = u16::from_be_bytes([buf[1 + len], buf[2 + len]]);
                Ok((AddrPort::Domain(domain, port), 1 + len + 2))
            }
            other => Err(SocksError::InvalidAddressType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_v4() {
        let addr = AddrPort::V4(Ipv4Addr::new(93, 184, 216, 34), 80);
        let bytes = addr.to_bytes();
        let (parsed, used) = Parse::parse_addr(&bytes[1..], bytes[0]).unwrap();
        assert_eq!(used, bytes.len() - 1);
        assert_eq!(parsed, addr);
    }

    #[test]
    fn round_trips_v6() {
        let addr = AddrPort::V6(Ipv6Addr::LOCALHOST, 443);
        let bytes = addr.to_bytes();
        let (parsed, _) = Parse::parse_addr(&bytes[1..], bytes[0]).unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn round_trips_domain() {
        let addr = AddrPort::Domain("example.com".to_string(), 443);
        let bytes = addr.to_bytes();
        let (parsed, used) = Parse::parse_addr(&bytes[1..], bytes[0]).unwrap();
        assert_eq!(used, bytes.len() - 1);
        assert_eq!(parsed, addr);
    }

    #[test]
    fn rejects_unknown_atyp() {
        let err = Parse::parse_addr(&[1, 2, 3], 0x7f).unwrap_err();
        assert!(matches!(err, SocksError::InvalidAddressType(0x7f)));
    }

    #[test]
    fn rejects_truncated_domain() {
        let err = Parse::parse_addr(&[5, b'e', b'x'], 0x03).unwrap_err();
        assert!(matches!(err, SocksError::InvalidDomain));
    }
}
