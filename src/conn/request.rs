//! SOCKS5 client connection request (RFC 1928 §4).
//!
//! After negotiation, the client sends a request message:
//!
//! ```text
//! +----+-----+-------+------+----------+----------+
//! |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
//! +----+-----+-------+------+----------+----------+
//! | 1  |  1  | X'00' |  1   | Variable |    2     |
//! +----+-----+-------+------+----------+----------+
//!
//! o VER      - protocol version: X'05'
//! o CMD      - command code:
//!                0x01 = CONNECT
//!                0x02 = BIND
//!                0x03 = UDP ASSOCIATE
//! o RSV      - reserved, must be 0x00
//! o ATYP     - address type of DST.ADDR
//!                0x01 = IPv4 address
//!                0x03 = Domain name
//!                0x04 = IPv6 address
//! o DST.ADDR - destination address
//! o DST.PORT - destination port in network byte order
//! ```

use crate::ATYP;
use crate::error::SocksError;
use crate::parse::{AddrPort, Parse};
use std::fmt;

/// The command (`CMD`) of a SOCKS5 request (RFC 1928 §4).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CMD {
    /// CONNECT command (0x01): establishes a TCP connection to the target host.
    Connect,
    /// BIND command (0x02): listens for and relays a single inbound connection.
    Bind,
    /// UDP ASSOCIATE command (0x03): establishes a UDP relay.
    UdpAssociate,
    /// An unrecognized command byte. Syntactically well-formed (the rest of
    /// the request still parses); the caller replies REP=7 and closes
    /// (spec.md §4.3) rather than treating the frame itself as malformed.
    Other(u8),
}

impl CMD {
    fn from_u8(byte: u8) -> Self {
        match byte {
            0x01 => CMD::Connect,
            0x02 => CMD::Bind,
            0x03 => CMD::UdpAssociate,
            other => CMD::Other(other),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            CMD::Connect => 0x01,
            CMD::Bind => 0x02,
            CMD::UdpAssociate => 0x03,
            CMD::Other(byte) => byte,
        }
    }
}

impl fmt::Display for CMD {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CMD::Connect => write!(f, "CONNECT"),
            CMD::Bind => write!(f, "BIND"),
            CMD::UdpAssociate => write!(f, "UDP_ASSOCIATE"),
            CMD::Other(byte) => write!(f, "UNKNOWN(0x{byte:02x})"),
        }
    }
}

/// Represents a SOCKS5 connection request (RFC 1928 §4).
#[derive(Debug)]
pub struct ConnRequest {
    /// Protocol version (`VER`), must be 0x05.
    pub ver: u8,
    /// Command (`CMD`): CONNECT, BIND, or UDP ASSOCIATE.
    pub cmd: CMD,
    /// Reserved byte (`RSV`), must be 0x00.
    pub rsv: u8,
    /// Address type (`ATYP`): IPv4, IPv6, or domain name.
    pub atyp: ATYP,
    /// Destination address and port (`DST.ADDR`, `DST.PORT`).
    pub dst: AddrPort,
}

impl ConnRequest {
    /// Creates a new `ConnRequest`.
    pub fn new(ver: u8, cmd: CMD, rsv: u8, atyp: ATYP, dst: AddrPort) -> Self {
        Self {
            ver,
            cmd,
            rsv,
            atyp,
            dst,
        }
    }

    /// Serializes the request into the SOCKS5 wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![self.ver, self.cmd.to_u8(), self.rsv];
        buf.extend_from_slice(&self.dst.to_bytes());
        buf
    }
}

impl fmt::Display for ConnRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SOCKS5 Request {{")?;
        writeln!(f, "  CMD : {}", self.cmd)?;
        writeln!(f, "  ATYP: {}", self.atyp)?;
        writeln!(f, "  DST : {}", self.dst)?;
        writeln!(f, "  VER : {}", self.ver)?;
        writeln!(f, "  RSV : {}", self.rsv)?;
        write!(f, "}}")
    }
}

impl TryFrom<&[u8]> for ConnRequest {
    type Error = SocksError;

    /// Parses a SOCKS5 connection request from raw bytes.
    fn try_from(buf: &[u8]) -> Result<Self, Self::Error> {
        if buf.len() < 4 {
            return Err(SocksError::ConnRequestTooShort);
        }

        let ver = buf[0];

        let cmd = CMD::from_u8(buf[1]);

        let rsv = buf[2];

        let atyp = match buf[3] {
            0x01 => ATYP::V4,
            0x03 => ATYP::DomainName,
            0x04 => ATYP::V6,
            other => return Err(SocksError::InvalidAddressType(other)),
        };

        let (dst, _) = Parse::parse_addr(&buf[4..], buf[3])?;

        Ok(ConnRequest {
            ver,
            cmd,
            rsv,
            atyp,
            dst,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn parses_connect_to_ipv4() {
        // CONNECT 93.184.216.34:80
        let buf = [0x05, 0x01, 0x00, 0x01, 93, 184, 216, 34, 0x00, 0x50];
        let req = ConnRequest::try_from(&buf[..]).unwrap();
        assert_eq!(req.ver, 0x05);
        assert_eq!(req.cmd, CMD::Connect);
        assert_eq!(req.atyp, ATYP::V4);
        assert_eq!(req.dst, AddrPort::V4(Ipv4Addr::new(93, 184, 216, 34), 80));
    }

    #[test]
    fn round_trips_through_to_bytes() {
        let req = ConnRequest::new(
            0x05,
            CMD::Connect,
            0x00,
            ATYP::V4,
            AddrPort::V4(Ipv4Addr::new(192, 0, 2, 1), 443),
        );
        let bytes = req.to_bytes();
        let parsed = ConnRequest::try_from(&bytes[..]).unwrap();
        assert_eq!(parsed.cmd, CMD::Connect);
        assert_eq!(parsed.dst, req.dst);
    }

    #[test]
    fn parses_unsupported_command_without_erroring() {
        let buf = [0x05, 0x09, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
        let req = ConnRequest::try_from(&buf[..]).unwrap();
        assert_eq!(req.cmd, CMD::Other(0x09));
    }

    #[test]
    fn rejects_too_short() {
        let err = ConnRequest::try_from(&[0x05, 0x01][..]).unwrap_err();
        assert!(matches!(err, SocksError::ConnRequestTooShort));
    }
}
