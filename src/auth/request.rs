//! Authentication request message for SOCKS5 username/password authentication.
//!
//! Defined in [RFC 1929, section 2](https://www.rfc-editor.org/rfc/rfc1929#section-2).
//!
//! After selecting username/password authentication during method negotiation
//! ([RFC 1928, section 3](https://www.rfc-editor.org/rfc/rfc1928#section-3)),
//! the client sends a request of the form:
//!
//! ```text
//! +----+------+----------+------+----------+
//! |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
//! +----+------+----------+------+----------+
//! |  1 |  1   | 1–255    |  1   | 1–255    |
//! +----+------+----------+------+----------+
//!
//! o VER     - subnegotiation version (always 0x01)
//! o ULEN    - length of username in bytes
//! o UNAME   - username (1–255 bytes)
//! o PLEN    - length of password in bytes
//! o PASSWD  - password (1–255 bytes)
//! ```

use crate::error::SocksError;

/// Represents an authentication request from a client (RFC 1929 §2).
pub struct AuthRequest {
    /// Authentication protocol version (`VER`), always `0x01`.
    pub ver: u8,
    /// The username (`UNAME`).
    pub uname: String,
    /// The password (`PASSWD`).
    pub passwd: String,
}

impl AuthRequest {
    /// Creates a new `AuthRequest`.
    ///
    /// # Arguments
    ///
    /// * `uname` - Username for authentication.
    /// * `passwd` - Password for authentication.
    pub fn new(uname: String, passwd: String) -> Self {
        Self {
            ver: 0x01,
            uname,
            passwd,
        }
    }
}

impl TryFrom<&[u8]> for AuthRequest {
    type Error = SocksError;

    /// Parses an authentication request from raw bytes.
    ///
    /// # Errors
    /// - [`SocksError::AuthMessageTooShort`] if the message is shorter than 2 bytes.
    /// - [`SocksError::UnsupportedAuthVersion`] if `VER != 0x01`.
    /// - [`SocksError::AuthFailed`] if the username or password are invalid UTF-8,
    ///   the buffer is truncated before expected fields, or `ULEN`/`PLEN` is 0.
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() < 2 {
            return Err(SocksError::AuthMessageTooShort);
        }

        let ver = bytes[0];
        if ver != 0x01 {
            return Err(SocksError::UnsupportedAuthVersion(ver));
        }

        let ulen = bytes[1] as usize;
        if ulen < 1 {
            return Err(SocksError::AuthFailed("ULEN must be at least 1".into()));
        }
        if bytes.len() < 2 + ulen + 1 {
            return Err(SocksError::AuthFailed("truncated before username".into()));
        }

        let uname = String::from_utf8(bytes[2..2 + ulen].to_vec())
            .map_err(|_| SocksError::AuthFailed("invalid UTF-8 in username".into()))?;

        let plen_index = 2 + ulen;
        let plen = bytes[plen_index] as usize;
        if plen < 1 {
            return Err(SocksError::AuthFailed("PLEN must be at least 1".into()));
        }

        if bytes.len() < plen_index + 1 + plen {
            return Err(SocksError::AuthFailed("truncated before password".into()));
        }

        let passwd = String::from_utf8(bytes[plen_index + 1..plen_index + 1 + plen].to_vec())
            .map_err(|_| SocksError::AuthFailed("invalid UTF-8 in password".into()))?;

        Ok(Self { ver, uname, passwd })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_request() {
        let buf = [0x01, 0x05, b'a', b'l', b'i', b'c', b'e', 0x03, b'p', b'w', b'd'];
        let req = AuthRequest::try_from(&buf[..]).unwrap();
        assert_eq!(req.uname, "alice");
        assert_eq!(req.passwd, "pwd");
    }

    #[test]
    fn rejects_zero_ulen() {
        let buf = [0x01, 0x00, 0x00];
        let err = AuthRequest::try_from(&buf[..]).unwrap_err();
        assert!(matches!(err, SocksError::AuthFailed(_)));
    }

    #[test]
    fn rejects_zero_plen() {
        let buf = [0x01, 0x01, b'a', 0x00];
        let err = AuthRequest::try_from(&buf[..]).unwrap_err();
        assert!(matches!(err, SocksError::AuthFailed(_)));
    }

    #[test]
    fn rejects_unsupported_version() {
        let buf = [0x02, 0x01, b'a', 0x01, b'b'];
        let err = AuthRequest::try_from(&buf[..]).unwrap_err();
        assert!(matches!(err, SocksError::UnsupportedAuthVersion(0x02)));
    }
}
