//! # Portcullis STUN
//!
//! Wire codec and transaction management for the legacy "Google TURN" STUN
//! dialect used by the portcullis relay port.
//!
//! This crate provides:
//! - Message encoding and decoding (20-byte header, 16-byte transaction IDs)
//! - Typed attribute containers (addresses, byte strings, options, error codes)
//! - A time-driven request manager with per-request retransmission schedules
//!
//! The dialect predates RFC 5389/5766: there is no magic cookie in the
//! header, addresses carry an explicit family byte (only IPv4, family 1, is
//! meaningful), and attribute values are written back to back without
//! padding. Framed relay traffic is instead discriminated by a 4-byte
//! sentinel carried as the first attribute of each message.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribute;
pub mod error;
pub mod message;
pub mod request;

pub use attribute::{ErrorCode, StunAddress, StunAttribute, TURN_MAGIC_COOKIE};
pub use error::StunError;
pub use message::{MessageType, StunMessage, TransactionId};
pub use request::{ManagerEvent, ResponseKind, Retransmit, StunRequest, StunRequestManager};
