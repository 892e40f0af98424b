//! Transport seam.
//!
//! The relay session is the single reader and writer of wire bytes, but the
//! socket itself (and its TLS/certificate setup) lives behind this trait and
//! is owned by the embedding application. Events flow back through a channel
//! handed over at connect time, so the session driver can select over them
//! alongside its own command queue and timers.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use relaymux_core::Result;

/// Events a connection delivers to the session driver.
#[derive(Debug)]
pub enum TransportEvent {
    /// Connection established and ready for frames.
    Opened,
    /// Connection ended. `reason` is transport-specific and only logged.
    Closed { reason: String },
    /// One complete inbound frame.
    Frame(Bytes),
    /// Liveness acknowledgment for an earlier `ping()`.
    PingAck,
}

/// A broker connection factory plus the write half of the current connection.
#[async_trait]
pub trait Transport: Send {
    /// Open a connection to `url`. On success the returned receiver yields
    /// this connection's events, beginning with [`TransportEvent::Opened`]
    /// once the connection is usable.
    async fn connect(&mut self, url: &str) -> Result<mpsc::Receiver<TransportEvent>>;

    /// Write one frame to the current connection.
    async fn send(&mut self, frame: Bytes) -> Result<()>;

    /// Send a transport-level liveness probe, answered by
    /// [`TransportEvent::PingAck`].
    async fn ping(&mut self) -> Result<()>;

    /// Close the current connection gracefully. The event receiver yields
    /// [`TransportEvent::Closed`] when teardown finishes.
    async fn close(&mut self) -> Result<()>;
}
