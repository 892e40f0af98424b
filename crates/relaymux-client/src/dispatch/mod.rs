//! Action dispatch seam and the default receiver registry.

pub mod registry;

use async_trait::async_trait;

use relaymux_core::protocol::frame::Verb;
use relaymux_core::Result;

pub use registry::{ReceiverHandler, ReceiverRegistry};

/// Executes inbound commands the relay pushes to this client.
///
/// Injected into the session at construction; the session guarantees calls
/// are sequential, never overlapping, and in strict arrival order. For
/// `execute` commands the returned string becomes the payload of the
/// `response` frame written back to the relay; for `queue` and `control` it
/// is discarded.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(&self, verb: Verb, receiver_url: &str, payload: &str) -> Result<String>;
}
