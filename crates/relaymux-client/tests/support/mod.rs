//! Shared test doubles: an in-memory transport and scripted dispatchers.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Notify};

use relaymux_client::config::ClientConfig;
use relaymux_client::dispatch::ActionDispatcher;
use relaymux_client::session::RelayHandle;
use relaymux_client::transport::{Transport, TransportEvent};
use relaymux_core::protocol::frame::{decode_frame, RelayMessage, Verb};
use relaymux_core::{RelayError, Result};

const WAIT_DEADLINE: Duration = Duration::from_secs(2);
const WAIT_TICK: Duration = Duration::from_millis(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();
}

/// Config with short timers so scenarios finish quickly. Heartbeat starts
/// disabled; tests that exercise it opt in.
pub fn fast_config() -> ClientConfig {
    let mut cfg = ClientConfig::default();
    cfg.session.heartbeat.enabled = false;
    cfg.session.heartbeat.interval_ms = 30;
    cfg.session.reconnect_delay_ms = 20;
    cfg
}

/// Poll `cond` until it holds or the deadline expires.
pub async fn eventually(cond: impl Fn() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + WAIT_DEADLINE;
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(WAIT_TICK).await;
    }
}

// --------------------
// Mock transport
// --------------------

struct LinkInner {
    events_tx: Option<mpsc::Sender<TransportEvent>>,
    sent: VecDeque<Bytes>,
}

/// Test-side view of the wire: frames the session wrote, plus a way to push
/// events at it.
pub struct MockLink {
    inner: Mutex<LinkInner>,
    sent_signal: Notify,
    pub connects: AtomicUsize,
    pub pings: AtomicUsize,
    pub closes: AtomicUsize,
    auto_ack_pings: AtomicBool,
}

impl MockLink {
    fn new() -> Self {
        Self {
            inner: Mutex::new(LinkInner { events_tx: None, sent: VecDeque::new() }),
            sent_signal: Notify::new(),
            connects: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            auto_ack_pings: AtomicBool::new(true),
        }
    }

    pub fn set_auto_ack_pings(&self, on: bool) {
        self.auto_ack_pings.store(on, Ordering::SeqCst);
    }

    fn events_tx(&self) -> Option<mpsc::Sender<TransportEvent>> {
        self.inner.lock().unwrap().events_tx.clone()
    }

    /// Push one event at the session, as the broker side of the wire.
    pub async fn inject(&self, ev: TransportEvent) {
        let tx = self.events_tx().expect("no live connection to inject into");
        tx.send(ev).await.expect("session dropped its event receiver");
    }

    /// Inject one inbound frame.
    pub async fn inject_frame(&self, frame: Bytes) {
        self.inject(TransportEvent::Frame(frame)).await;
    }

    /// Report the connection as dead, broker side.
    pub async fn drop_connection(&self, reason: &str) {
        self.inject(TransportEvent::Closed { reason: reason.into() }).await;
    }

    /// Await and decode the next frame the session wrote.
    pub async fn next_frame(&self) -> RelayMessage {
        let deadline = tokio::time::Instant::now() + WAIT_DEADLINE;
        loop {
            let notified = self.sent_signal.notified();
            if let Some(bytes) = self.inner.lock().unwrap().sent.pop_front() {
                return decode_frame(&bytes).expect("session wrote an undecodable frame");
            }
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for a frame");
            let _ = tokio::time::timeout(WAIT_TICK, notified).await;
        }
    }

    pub fn sent_count(&self) -> usize {
        self.inner.lock().unwrap().sent.len()
    }
}

/// In-memory [`Transport`]: connects instantly (optionally failing the first
/// N attempts) and records everything the session writes.
pub struct MockTransport {
    link: Arc<MockLink>,
    fail_connects: usize,
}

impl MockTransport {
    pub fn new() -> (Self, Arc<MockLink>) {
        let link = Arc::new(MockLink::new());
        (Self { link: Arc::clone(&link), fail_connects: 0 }, link)
    }

    pub fn failing_first(n: usize) -> (Self, Arc<MockLink>) {
        let (mut t, link) = Self::new();
        t.fail_connects = n;
        (t, link)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self, _url: &str) -> Result<mpsc::Receiver<TransportEvent>> {
        self.link.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connects > 0 {
            self.fail_connects -= 1;
            return Err(RelayError::Disconnected);
        }
        let (tx, rx) = mpsc::channel(64);
        tx.send(TransportEvent::Opened).await.map_err(|_| RelayError::Disconnected)?;
        self.link.inner.lock().unwrap().events_tx = Some(tx);
        Ok(rx)
    }

    async fn send(&mut self, frame: Bytes) -> Result<()> {
        self.link.inner.lock().unwrap().sent.push_back(frame);
        self.link.sent_signal.notify_waiters();
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.link.pings.fetch_add(1, Ordering::SeqCst);
        if self.link.auto_ack_pings.load(Ordering::SeqCst) {
            if let Some(tx) = self.link.events_tx() {
                let _ = tx.send(TransportEvent::PingAck).await;
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.link.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.link.events_tx() {
            let _ = tx.send(TransportEvent::Closed { reason: "closed by client".into() }).await;
        }
        Ok(())
    }
}

// --------------------
// Scripted dispatchers
// --------------------

/// Records every dispatched command; can be held open to keep a dispatch
/// in flight while a scenario arranges the next arrival.
pub struct RecordingDispatcher {
    calls: Mutex<Vec<(Verb, String, String)>>,
    call_signal: Notify,
    hold: AtomicBool,
    release_signal: Notify,
}

impl RecordingDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            call_signal: Notify::new(),
            hold: AtomicBool::new(false),
            release_signal: Notify::new(),
        })
    }

    /// Keep the next dispatches in flight until [`release`](Self::release).
    pub fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.release_signal.notify_waiters();
    }

    pub fn calls(&self) -> Vec<(Verb, String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Wait until at least `n` commands entered dispatch.
    pub async fn wait_calls(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + WAIT_DEADLINE;
        loop {
            let notified = self.call_signal.notified();
            if self.call_count() >= n {
                return;
            }
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {n} dispatches");
            let _ = tokio::time::timeout(WAIT_TICK, notified).await;
        }
    }
}

#[async_trait]
impl ActionDispatcher for RecordingDispatcher {
    async fn dispatch(&self, verb: Verb, receiver_url: &str, payload: &str) -> Result<String> {
        self.calls.lock().unwrap().push((verb, receiver_url.to_owned(), payload.to_owned()));
        self.call_signal.notify_waiters();
        loop {
            let notified = self.release_signal.notified();
            if !self.hold.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
        Ok(format!("ok:{payload}"))
    }
}

/// Dispatcher whose `execute` handler performs a nested `send_message`
/// through the session it serves.
pub struct NestedSendDispatcher {
    handle: Mutex<Option<RelayHandle>>,
    pub inner: Arc<RecordingDispatcher>,
}

impl NestedSendDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { handle: Mutex::new(None), inner: RecordingDispatcher::new() })
    }

    pub fn bind(&self, handle: RelayHandle) {
        *self.handle.lock().unwrap() = Some(handle);
    }
}

#[async_trait]
impl ActionDispatcher for NestedSendDispatcher {
    async fn dispatch(&self, verb: Verb, receiver_url: &str, payload: &str) -> Result<String> {
        let _ = self.inner.dispatch(verb, receiver_url, payload).await;
        if verb == Verb::Execute && receiver_url == "svc://outer" {
            let handle = self.handle.lock().unwrap().clone().expect("handle not bound");
            let nested = handle.send_message(Verb::Execute, "svc://inner", "NESTED").await?;
            return Ok(format!("outer+{nested}"));
        }
        Ok(format!("ok:{payload}"))
    }
}
