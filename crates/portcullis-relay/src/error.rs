//! Error surface of the relay port.

use std::io;
use thiserror::Error;

/// Errors returned by [`crate::RelayPort::send_to`].
///
/// Nothing in the port propagates as an exceptional control transfer:
/// connect-path failures are retried internally, and this type only covers
/// the per-call send surface. The kind of the most recent failure is also
/// retained on the port and readable through
/// [`crate::RelayPort::last_error`].
#[derive(Debug, Error)]
pub enum SendError {
    /// No connected entry could take the packet yet. Maps to the
    /// `EWOULDBLOCK` surface of the original interface.
    #[error("no connected relay entry available")]
    WouldBlock,

    /// The underlying socket rejected the write.
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),
}

impl SendError {
    /// The `io::ErrorKind` equivalent recorded on the port.
    #[must_use]
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Self::WouldBlock => io::ErrorKind::WouldBlock,
            Self::Socket(err) => err.kind(),
        }
    }
}
