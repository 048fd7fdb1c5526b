//! A loop that drives a relay port on a tokio runtime.

use crate::factory::TokioSocketFactory;
use portcullis_relay::{PortEvent, RelayPort, RelayPortConfig, SendError, SocketEvent};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;

/// Owns a [`RelayPort`] wired to a [`TokioSocketFactory`] and drives it:
/// socket events are routed in as they arrive, and the port's timer
/// deadlines are honored with real sleeps.
///
/// The port is single-thread-affine; the driver is intended to be polled
/// from one task (a current-thread runtime, or without spawning).
pub struct RelayDriver {
    port: RelayPort,
    events: mpsc::UnboundedReceiver<SocketEvent>,
    events_closed: bool,
}

impl RelayDriver {
    /// Create a driver and its port. Call from within a tokio runtime; the
    /// factory spawns socket I/O tasks on it.
    #[must_use]
    pub fn new(config: RelayPortConfig) -> Self {
        let (factory, event_rx) = TokioSocketFactory::new();
        Self {
            port: RelayPort::new(config, Box::new(factory)),
            events: event_rx,
            events_closed: false,
        }
    }

    /// The driven port.
    #[must_use]
    pub fn port(&self) -> &RelayPort {
        &self.port
    }

    /// Mutable access to the driven port, e.g. to add server addresses.
    pub fn port_mut(&mut self) -> &mut RelayPort {
        &mut self.port
    }

    /// Start gathering on the primary entry.
    pub fn prepare_address(&mut self) {
        self.port.prepare_address(Instant::now());
    }

    /// Send payload toward `dest` through the relay.
    ///
    /// # Errors
    ///
    /// See [`RelayPort::send_to`].
    pub fn send_to(
        &mut self,
        data: &[u8],
        dest: SocketAddr,
        payload: bool,
    ) -> Result<usize, SendError> {
        self.port.send_to(data, dest, payload, Instant::now())
    }

    /// Run the port until it surfaces the next event.
    pub async fn next_event(&mut self) -> PortEvent {
        loop {
            if let Some(event) = self.port.poll_event() {
                return event;
            }
            tokio::select! {
                event = self.events.recv(), if !self.events_closed => {
                    match event {
                        Some(event) => self.port.handle_socket_event(event, Instant::now()),
                        None => self.events_closed = true,
                    }
                }
                () = sleep_until(self.port.poll_timeout()) => {
                    self.port.handle_timeout(Instant::now());
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
