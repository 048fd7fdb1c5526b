//! # Portcullis Transport
//!
//! Tokio adapters for the portcullis relay port.
//!
//! This crate provides:
//! - [`TokioSocketFactory`]: a [`portcullis_relay::PacketSocketFactory`]
//!   backed by tokio UDP sockets and length-prefix-framed TCP streams
//! - [`RelayDriver`]: a current-thread loop that owns a
//!   [`portcullis_relay::RelayPort`], routes socket events, and sleeps
//!   until the port's next timer deadline
//!
//! TLS client sockets and proxy traversal are not provided here; an
//! embedder with those needs supplies its own factory, and the port treats
//! the creation failure as an ordinary failover step.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod driver;
mod factory;
mod tcp;
mod udp;

pub use driver::RelayDriver;
pub use factory::TokioSocketFactory;

use tokio::task::JoinHandle;

/// Aborts the wrapped task when the owning socket handle is dropped, so a
/// disposed connection stops producing events.
pub(crate) struct AbortOnDrop(pub(crate) JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
