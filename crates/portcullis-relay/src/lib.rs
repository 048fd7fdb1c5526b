//! # Portcullis Relay
//!
//! Client-side relay port for ICE candidate gathering: the
//! traversal-of-last-resort that allocates a publicly reachable address on a
//! relay server and tunnels user datagrams through it.
//!
//! This crate provides:
//! - The [`RelayPort`] gatherer facade (entries, server list, candidates)
//! - The per-destination entry state machine (server/protocol failover,
//!   keep-alive, selective STUN Send wrapping and Data unwrapping)
//! - Allocation transactions with exponential retransmission
//! - Socket and factory traits the embedder implements for real I/O
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        RelayPort                          │
//! │   (server list, options, candidates, event queue)         │
//! ├───────────────────────────────────────────────────────────┤
//! │                       RelayEntry                          │
//! │   (one tunnel per destination: failover, lock, wrap)      │
//! ├───────────────────────────────────────────────────────────┤
//! │                     RelayConnection                       │
//! │   (one socket to one server; allocate transactions)       │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! The port is sans-IO and single-threaded: every public entry point takes
//! an explicit `Instant`, delays are expressed through an internal timer
//! queue, and socket I/O happens through the [`socket::AsyncPacketSocket`]
//! trait. An embedder (see the `portcullis-transport` crate) feeds socket
//! events in and drains [`event::PortEvent`]s out.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod candidate;
pub mod config;
pub mod entry;
pub mod error;
pub mod event;
pub mod port;
pub mod proto;
pub mod socket;

mod allocate;
mod timer;

pub use candidate::{Candidate, CandidateOrigin, CandidateType, ICE_TYPE_PREFERENCE_RELAY};
pub use config::RelayPortConfig;
pub use entry::{EntryState, KEEP_ALIVE_DELAY, RETRY_TIMEOUT, SOFT_CONNECT_TIMEOUT};
pub use error::SendError;
pub use event::PortEvent;
pub use port::RelayPort;
pub use proto::{OptionValue, ProtocolAddress, ProtocolType, ProxyInfo, ProxyType, SocketOption};
pub use socket::{AsyncPacketSocket, PacketSocketFactory, SocketEvent, SocketId};
