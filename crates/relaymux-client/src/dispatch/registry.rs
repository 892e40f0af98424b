use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use relaymux_core::protocol::frame::Verb;
use relaymux_core::{RelayError, Result};

use crate::dispatch::ActionDispatcher;

/// Handler for one receiver URL.
#[async_trait]
pub trait ReceiverHandler: Send + Sync {
    async fn handle(&self, verb: Verb, payload: &str) -> Result<String>;
}

/// Default [`ActionDispatcher`]: routes commands to handlers by receiver URL.
///
/// `control` commands carry an empty receiver; register a handler under `""`
/// to observe them here (the session also reports connection loss through
/// its event channel).
#[derive(Default)]
pub struct ReceiverRegistry {
    handlers: DashMap<String, Arc<dyn ReceiverHandler>>,
}

impl ReceiverRegistry {
    pub fn new() -> Self {
        Self { handlers: DashMap::new() }
    }

    pub fn register(&self, receiver_url: impl Into<String>, handler: Arc<dyn ReceiverHandler>) {
        self.handlers.insert(receiver_url.into(), handler);
    }

    pub fn registered_receivers(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }
}

#[async_trait]
impl ActionDispatcher for ReceiverRegistry {
    async fn dispatch(&self, verb: Verb, receiver_url: &str, payload: &str) -> Result<String> {
        let handler = self
            .handlers
            .get(receiver_url)
            .ok_or_else(|| RelayError::UnknownReceiver(receiver_url.to_owned()))?
            .value()
            .clone();
        handler.handle(verb, payload).await
    }
}
