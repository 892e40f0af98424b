//! Relay wire protocol.
//!
//! A relay frame is newline-framed text: three header fields (verb, receiver
//! URL, correlation id) followed by an opaque payload that keeps any embedded
//! newlines. All parsers are panic-free: malformed input is reported as
//! `RelayError` instead of panicking, keeping the session resilient to
//! hostile or corrupted traffic.

pub mod control;
pub mod frame;
