//! Receiver registry dispatch tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use async_trait::async_trait;

use relaymux_client::dispatch::{ActionDispatcher, ReceiverHandler, ReceiverRegistry};
use relaymux_core::error::ErrorCode;
use relaymux_core::protocol::frame::Verb;
use relaymux_core::Result;

struct EchoHandler {
    tag: &'static str,
}

#[async_trait]
impl ReceiverHandler for EchoHandler {
    async fn handle(&self, verb: Verb, payload: &str) -> Result<String> {
        Ok(format!("{}:{}:{}", self.tag, verb, payload))
    }
}

#[tokio::test]
async fn routes_by_receiver_url() {
    let registry = ReceiverRegistry::new();
    registry.register("svc://model", Arc::new(EchoHandler { tag: "model" }));
    registry.register("svc://editor", Arc::new(EchoHandler { tag: "editor" }));

    let out = registry.dispatch(Verb::Execute, "svc://model", "PING").await.unwrap();
    assert_eq!(out, "model:execute:PING");

    let out = registry.dispatch(Verb::Queue, "svc://editor", "SAVE").await.unwrap();
    assert_eq!(out, "editor:queue:SAVE");
}

#[tokio::test]
async fn unknown_receiver_is_an_error() {
    let registry = ReceiverRegistry::new();
    let err = registry.dispatch(Verb::Execute, "svc://nowhere", "PING").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownReceiver);
}

#[tokio::test]
async fn control_commands_route_to_the_empty_receiver() {
    let registry = ReceiverRegistry::new();
    registry.register("", Arc::new(EchoHandler { tag: "session" }));

    let out = registry.dispatch(Verb::Control, "", "shutdown").await.unwrap();
    assert_eq!(out, "session:control:shutdown");

    let mut receivers = registry.registered_receivers();
    receivers.sort();
    assert_eq!(receivers, vec!["".to_string()]);
}
