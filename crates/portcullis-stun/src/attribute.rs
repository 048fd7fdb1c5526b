//! Attribute containers for the legacy STUN dialect.
//!
//! Attribute numbering follows the early Google TURN draft, not RFC 5766.
//! Values are written back to back with no inter-attribute padding.

use crate::error::StunError;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// MAPPED-ADDRESS attribute type
pub const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
/// USERNAME attribute type
pub const ATTR_USERNAME: u16 = 0x0006;
/// ERROR-CODE attribute type
pub const ATTR_ERROR_CODE: u16 = 0x0009;
/// MAGIC-COOKIE attribute type
pub const ATTR_MAGIC_COOKIE: u16 = 0x000f;
/// DESTINATION-ADDRESS attribute type
pub const ATTR_DESTINATION_ADDRESS: u16 = 0x0011;
/// SOURCE-ADDRESS2 attribute type
pub const ATTR_SOURCE_ADDRESS2: u16 = 0x0012;
/// DATA attribute type
pub const ATTR_DATA: u16 = 0x0013;
/// OPTIONS attribute type
pub const ATTR_OPTIONS: u16 = 0x8001;

/// The 4-byte sentinel the relay dialect carries as the first attribute of
/// every framed message. Inbound packets are STUN iff these bytes appear at
/// offset 24 (header plus one attribute header).
pub const TURN_MAGIC_COOKIE: [u8; 4] = [0x72, 0xc6, 0x4b, 0xc6];

/// An address attribute value as it appears on the wire.
///
/// The family byte is preserved verbatim; only family 1 (IPv4) carries a
/// usable address in this dialect, and callers are expected to check it via
/// [`StunAddress::socket_addr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StunAddress {
    /// Address family byte; 1 means IPv4
    pub family: u8,
    /// Port in host order
    pub port: u16,
    /// The four address bytes, meaningful only when `family == 1`
    pub ip: Ipv4Addr,
}

impl StunAddress {
    /// Build a family-1 address from an IPv4 socket address.
    ///
    /// Returns `None` for IPv6 input; the wire format cannot carry it.
    #[must_use]
    pub fn from_socket_addr(addr: SocketAddr) -> Option<Self> {
        match addr.ip() {
            IpAddr::V4(ip) => Some(Self {
                family: 1,
                port: addr.port(),
                ip,
            }),
            IpAddr::V6(_) => None,
        }
    }

    /// The socket address, if the family byte marks this as IPv4.
    #[must_use]
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        (self.family == 1).then(|| SocketAddr::new(IpAddr::V4(self.ip), self.port))
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(0);
        out.push(self.family);
        out.extend_from_slice(&self.port.to_be_bytes());
        out.extend_from_slice(&self.ip.octets());
    }

    fn decode(attr: u16, value: &[u8]) -> Result<Self, StunError> {
        if value.len() != 8 {
            return Err(StunError::InvalidLength {
                attr,
                len: value.len(),
            });
        }
        Ok(Self {
            family: value[1],
            port: u16::from_be_bytes([value[2], value[3]]),
            ip: Ipv4Addr::new(value[4], value[5], value[6], value[7]),
        })
    }
}

impl fmt::Display for StunAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (family {})", self.ip, self.port, self.family)
    }
}

/// An ERROR-CODE attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCode {
    /// Numeric code, class * 100 + number
    pub code: u16,
    /// UTF-8 reason phrase
    pub reason: String,
}

impl ErrorCode {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[0, 0]);
        out.push((self.code / 100) as u8);
        out.push((self.code % 100) as u8);
        out.extend_from_slice(self.reason.as_bytes());
    }

    fn decode(value: &[u8]) -> Result<Self, StunError> {
        if value.len() < 4 {
            return Err(StunError::InvalidLength {
                attr: ATTR_ERROR_CODE,
                len: value.len(),
            });
        }
        let class = u16::from(value[2] & 0x7);
        let number = u16::from(value[3]);
        Ok(Self {
            code: class * 100 + number,
            reason: String::from_utf8_lossy(&value[4..]).into_owned(),
        })
    }
}

/// A decoded STUN attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StunAttribute {
    /// MAPPED-ADDRESS: the relayed address allocated for this client
    MappedAddress(StunAddress),
    /// USERNAME: the ICE username fragment, raw bytes with no terminator
    Username(Vec<u8>),
    /// ERROR-CODE: code and reason from an error response
    ErrorCode(ErrorCode),
    /// MAGIC-COOKIE: the framing sentinel
    MagicCookie(Vec<u8>),
    /// DESTINATION-ADDRESS: where the relay should forward a Send request
    DestinationAddress(StunAddress),
    /// SOURCE-ADDRESS2: the external sender of a Data indication
    SourceAddress2(StunAddress),
    /// DATA: opaque payload bytes
    Data(Vec<u8>),
    /// OPTIONS: bit flags; bit 0 requests/acknowledges destination locking
    Options(u32),
    /// Any attribute this dialect does not interpret
    Unknown(u16, Vec<u8>),
}

impl StunAttribute {
    /// The wire type number of this attribute.
    #[must_use]
    pub fn attr_type(&self) -> u16 {
        match self {
            Self::MappedAddress(_) => ATTR_MAPPED_ADDRESS,
            Self::Username(_) => ATTR_USERNAME,
            Self::ErrorCode(_) => ATTR_ERROR_CODE,
            Self::MagicCookie(_) => ATTR_MAGIC_COOKIE,
            Self::DestinationAddress(_) => ATTR_DESTINATION_ADDRESS,
            Self::SourceAddress2(_) => ATTR_SOURCE_ADDRESS2,
            Self::Data(_) => ATTR_DATA,
            Self::Options(_) => ATTR_OPTIONS,
            Self::Unknown(t, _) => *t,
        }
    }

    /// Append the attribute (type, length, value) to `out`.
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.attr_type().to_be_bytes());
        let len_offset = out.len();
        out.extend_from_slice(&[0, 0]);
        match self {
            Self::MappedAddress(a) | Self::DestinationAddress(a) | Self::SourceAddress2(a) => {
                a.encode(out);
            }
            Self::Username(b) | Self::MagicCookie(b) | Self::Data(b) | Self::Unknown(_, b) => {
                out.extend_from_slice(b);
            }
            Self::ErrorCode(e) => e.encode(out),
            Self::Options(v) => out.extend_from_slice(&v.to_be_bytes()),
        }
        let len = (out.len() - len_offset - 2) as u16;
        out[len_offset..len_offset + 2].copy_from_slice(&len.to_be_bytes());
    }

    /// Decode one attribute value.
    pub(crate) fn decode(attr_type: u16, value: &[u8]) -> Result<Self, StunError> {
        match attr_type {
            ATTR_MAPPED_ADDRESS => Ok(Self::MappedAddress(StunAddress::decode(attr_type, value)?)),
            ATTR_DESTINATION_ADDRESS => Ok(Self::DestinationAddress(StunAddress::decode(
                attr_type, value,
            )?)),
            ATTR_SOURCE_ADDRESS2 => Ok(Self::SourceAddress2(StunAddress::decode(
                attr_type, value,
            )?)),
            ATTR_USERNAME => Ok(Self::Username(value.to_vec())),
            ATTR_MAGIC_COOKIE => Ok(Self::MagicCookie(value.to_vec())),
            ATTR_DATA => Ok(Self::Data(value.to_vec())),
            ATTR_ERROR_CODE => Ok(Self::ErrorCode(ErrorCode::decode(value)?)),
            ATTR_OPTIONS => {
                if value.len() != 4 {
                    return Err(StunError::InvalidLength {
                        attr: attr_type,
                        len: value.len(),
                    });
                }
                Ok(Self::Options(u32::from_be_bytes([
                    value[0], value[1], value[2], value[3],
                ])))
            }
            other => Ok(Self::Unknown(other, value.to_vec())),
        }
    }
}
