//! relayMux client library entry.
//!
//! This crate wires the frame codec, correlation store, inbound command
//! queue, and transport seam into the relay session: one persistent
//! bidirectional connection to a relay broker, multiplexing many logical
//! request/response and fire-and-forget exchanges with named backend
//! receivers. It is intended to be embedded by desktop and service hosts and
//! by integration tests.

pub mod config;
pub mod dispatch;
pub mod obs;
pub mod queue;
pub mod session;
pub mod transport;

pub use relaymux_core::{RelayError, Result};
