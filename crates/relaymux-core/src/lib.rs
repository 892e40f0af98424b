//! relayMux core: transport-agnostic protocol primitives and the correlation
//! store.
//!
//! This crate defines the relay wire format, the shared error surface, and the
//! thread-safe table that ties `execute` requests to their eventual
//! `response` frames. It intentionally carries no transport or runtime
//! dependencies so it can be reused in multiple contexts (the client session,
//! test harnesses, administrative tooling).
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `RelayError`/`Result` so embedding
//! processes do not crash on malformed input or bad traffic.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod correlation;
pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{RelayError, Result};
