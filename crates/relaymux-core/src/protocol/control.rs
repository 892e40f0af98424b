//! Control-channel payload tokens.
//!
//! `control` frames carry no receiver and no correlation id; the payload
//! alone selects the action.

/// Payload of the locally synthesized emergency-shutdown command dispatched
/// when the transport drops without a prior `prepare_session_closing`.
pub const SHUTDOWN: &str = "shutdown";
