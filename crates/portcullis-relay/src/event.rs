//! Events the port surfaces to the ICE layer.

use crate::candidate::Candidate;
use crate::proto::{ProtocolAddress, ProtocolType};
use std::net::SocketAddr;

/// Signals drained from [`crate::RelayPort::poll_event`].
///
/// These are the rendition of the original signal/slot surface as a queue
/// of event values: the embedder drains them after each call into the port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// A relayed local candidate became available.
    CandidateReady(Candidate),

    /// The primary allocation succeeded and all candidates are published.
    /// Emitted at most once per port.
    AddressReady,

    /// A server attempt failed and the entry is moving on.
    ConnectFailure(ProtocolAddress),

    /// A stream connect did not complete within the soft timeout and the
    /// entry is moving on ahead of the OS-level timeout.
    SoftTimeout(ProtocolAddress),

    /// Inbound payload for a remote the ICE layer has a connection for.
    PeerPacket {
        /// Sending peer
        remote: SocketAddr,
        /// Payload bytes
        data: Vec<u8>,
        /// Protocol the payload logically arrived over
        proto: ProtocolType,
    },

    /// Inbound payload from an unknown remote; the ICE layer demultiplexes
    /// it (connectivity-check requests and the like).
    UnmatchedPacket {
        /// Sending peer
        remote: SocketAddr,
        /// Payload bytes
        data: Vec<u8>,
        /// Protocol the payload logically arrived over
        proto: ProtocolType,
    },
}
