//! Top-level facade crate for relayMux.
//!
//! Re-exports the protocol core and the client library so embedders can
//! depend on a single crate.

pub mod core {
    pub use relaymux_core::*;
}

pub mod client {
    pub use relaymux_client::*;
}
