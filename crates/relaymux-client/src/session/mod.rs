//! Relay session.
//!
//! Owns the transport connection lifecycle (connect, reconnect, heartbeat,
//! graceful/abrupt close) and composes the frame codec, correlation store,
//! and inbound command queue into the externally visible contract:
//!
//! - [`RelayHandle::send_message`] multiplexes correlated (`execute`) and
//!   fire-and-forget (`queue`) sends over the one connection, and does not
//!   return until the matching response arrived or the connection left the
//!   `Connected` state.
//! - Inbound commands are handed to the injected [`ActionDispatcher`] one at
//!   a time, in arrival order, never underneath a blocked send.
//! - A connection that dies without a prior [`RelayHandle::prepare_session_closing`]
//!   is an abrupt disconnect: the session synthesizes an emergency-shutdown
//!   `control` command so the application can unwind, instead of going idle
//!   silently.
//!
//! One driver task is the single reader and writer of wire bytes; handles
//! talk to it over a command channel and observe it through a state watch.

mod driver;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{mpsc, watch, Notify};

use relaymux_core::correlation::CorrelationTable;
use relaymux_core::protocol::frame::{encode_frame, Verb, NO_CORRELATION};
use relaymux_core::{RelayError, Result};

use crate::config::{ClientConfig, HeartbeatPolicy};
use crate::dispatch::ActionDispatcher;
use crate::obs::MetricsSnapshot;
use crate::transport::Transport;

use driver::SessionDriver;

const CMD_CHANNEL_CAPACITY: usize = 64;

/// Connection lifecycle. `Closing` is entered only by an explicit
/// `prepare_session_closing`; reaching `Disconnected` any other way is an
/// abrupt disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Notifications surfaced to the embedding application.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The connection ended. `graceful` distinguishes a prepared close from
    /// an abrupt drop.
    ConnectionClosed { graceful: bool, reason: String },
    /// A correlated response arrived and was recorded in the store.
    ResponseReceived { correlation_id: u64 },
}

/// Session construction errors.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("transport is required")]
    MissingTransport,
    #[error("dispatcher is required")]
    MissingDispatcher,
    #[error("invalid config: {0}")]
    Config(#[from] RelayError),
}

/// Handle-to-driver commands.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Start connecting to the configured relay URL.
    Connect,
    /// Write one already-encoded frame.
    WriteFrame { frame: bytes::Bytes },
    /// Enter the graceful shutdown path.
    PrepareClosing,
    UpdateHeartbeat { policy: HeartbeatPolicy },
    /// A blocked `send_message` resolved; parked commands may now run.
    SendFinished,
}

/// State shared between handles and the driver task.
///
/// The correlation table is independently lockable by design: administrative
/// and test code may query it from arbitrary threads while the driver runs.
pub(crate) struct Shared {
    pub(crate) correlation: CorrelationTable,
    /// Pulsed on every inbound `response` frame and on connection loss.
    pub(crate) response_signal: Notify,
    pub(crate) metrics: crate::obs::SessionMetrics,
    /// Latched by `prepare_session_closing`; never cleared.
    pub(crate) closing: AtomicBool,
    /// Bumped on every connection loss so blocked senders can detect a drop
    /// even if the state flaps back to `Connected` before they wake.
    pub(crate) connection_epoch: AtomicU64,
    relay_url: Mutex<Option<String>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            correlation: CorrelationTable::new(),
            response_signal: Notify::new(),
            metrics: crate::obs::SessionMetrics::default(),
            closing: AtomicBool::new(false),
            connection_epoch: AtomicU64::new(0),
            relay_url: Mutex::new(None),
        }
    }

    pub(crate) fn relay_url(&self) -> Option<String> {
        match self.relay_url.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_relay_url(&self, url: String) {
        match self.relay_url.lock() {
            Ok(mut guard) => *guard = Some(url),
            Err(poisoned) => *poisoned.into_inner() = Some(url),
        }
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Relaxed)
    }
}

/// Entry point: `RelaySession::builder()`.
pub struct RelaySession;

impl RelaySession {
    pub fn builder() -> RelaySessionBuilder {
        RelaySessionBuilder::new()
    }
}

/// Wires the injected collaborators together and spawns the driver task.
pub struct RelaySessionBuilder {
    transport: Option<Box<dyn Transport>>,
    dispatcher: Option<Arc<dyn ActionDispatcher>>,
    config: ClientConfig,
    events: Option<mpsc::Sender<SessionEvent>>,
}

impl RelaySessionBuilder {
    fn new() -> Self {
        Self { transport: None, dispatcher: None, config: ClientConfig::default(), events: None }
    }

    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Subscribe to session events. Delivery is lossy under backpressure; a
    /// slow subscriber never stalls the driver.
    pub fn events(mut self, tx: mpsc::Sender<SessionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Validate the configuration and spawn the driver task. Must be called
    /// from within a tokio runtime.
    pub fn spawn(self) -> std::result::Result<RelayHandle, BuildError> {
        let transport = self.transport.ok_or(BuildError::MissingTransport)?;
        let dispatcher = self.dispatcher.ok_or(BuildError::MissingDispatcher)?;
        self.config.validate()?;

        let shared = Arc::new(Shared::new());
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

        let driver = SessionDriver::new(
            transport,
            dispatcher,
            self.config.session,
            Arc::clone(&shared),
            state_tx,
            cmd_rx,
            self.events,
        );
        tokio::spawn(driver.run());

        Ok(RelayHandle { cmd_tx, state_rx, shared })
    }
}

/// Cloneable handle to a running relay session.
#[derive(Clone)]
pub struct RelayHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
    state_rx: watch::Receiver<SessionState>,
    shared: Arc<Shared>,
}

impl RelayHandle {
    /// Connect to the relay broker and wait until the session is `Connected`.
    ///
    /// The URL is remembered; later sends reconnect to it automatically if
    /// the connection dropped in the meantime.
    pub async fn connect(&self, url: &str) -> Result<()> {
        if self.shared.is_closing() {
            return Err(RelayError::Closing);
        }
        self.shared.set_relay_url(url.to_owned());
        self.ensure_connected().await
    }

    /// Announce a deliberate shutdown. Reconnect attempts stop, blocked sends
    /// fail promptly, and the subsequent disconnect is reported as graceful
    /// (no emergency-shutdown command is synthesized).
    pub async fn prepare_session_closing(&self) -> Result<()> {
        self.shared.closing.store(true, Ordering::Relaxed);
        self.send_cmd(SessionCommand::PrepareClosing).await
    }

    /// Replace the heartbeat policy; the timer restarts with the new period.
    pub async fn update_heartbeat_policy(&self, policy: HeartbeatPolicy) -> Result<()> {
        policy.validate()?;
        self.send_cmd(SessionCommand::UpdateHeartbeat { policy }).await
    }

    /// Send one message to a named receiver.
    ///
    /// `Execute` allocates a correlation id and does not return until the
    /// matching response arrives; the response payload is returned. `Queue`
    /// is fire-and-forget and returns an empty string immediately after the
    /// frame is handed to the transport. If the session is disconnected the
    /// call first blocks through unbounded reconnect attempts, cancellable
    /// only by `prepare_session_closing`.
    pub async fn send_message(&self, verb: Verb, receiver_url: &str, payload: &str) -> Result<String> {
        if !matches!(verb, Verb::Execute | Verb::Queue) {
            return Err(RelayError::Internal(format!("send_message cannot send {verb} frames")));
        }
        // Captured before the connectivity check so a drop anywhere between
        // here and the response is detectable.
        let epoch = self.shared.connection_epoch.load(Ordering::Acquire);
        self.ensure_connected().await?;

        if verb == Verb::Queue {
            let frame = encode_frame(Verb::Queue, receiver_url, NO_CORRELATION, payload);
            self.send_cmd(SessionCommand::WriteFrame { frame }).await?;
            return Ok(String::new());
        }

        let id = self.shared.correlation.allocate_id()?;
        let frame = encode_frame(Verb::Execute, receiver_url, id, payload);
        if let Err(e) = self.send_cmd(SessionCommand::WriteFrame { frame }).await {
            let _ = self.shared.correlation.take(id);
            return Err(e);
        }

        let outcome = self.await_response(id, epoch).await;
        // Wake the driver: commands parked behind this call may now run.
        let _ = self.cmd_tx.send(SessionCommand::SendFinished).await;
        outcome
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Counter snapshot for admin surfaces and tests.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Direct access to the correlation table for administrative queries.
    pub fn correlation(&self) -> &CorrelationTable {
        &self.shared.correlation
    }

    async fn send_cmd(&self, cmd: SessionCommand) -> Result<()> {
        self.cmd_tx.send(cmd).await.map_err(|_| RelayError::Disconnected)
    }

    /// Block until the session is `Connected`, kicking off reconnect
    /// attempts whenever it is observed `Disconnected`.
    async fn ensure_connected(&self) -> Result<()> {
        let mut state_rx = self.state_rx.clone();
        loop {
            let state = *state_rx.borrow_and_update();
            match state {
                SessionState::Connected => return Ok(()),
                SessionState::Closing => return Err(RelayError::Closing),
                SessionState::Disconnected => {
                    if self.shared.is_closing() {
                        return Err(RelayError::Closing);
                    }
                    if self.shared.relay_url().is_none() {
                        return Err(RelayError::Internal("no relay url: call connect() first".into()));
                    }
                    self.send_cmd(SessionCommand::Connect).await?;
                }
                SessionState::Connecting => {}
            }
            state_rx.changed().await.map_err(|_| RelayError::Disconnected)?;
        }
    }

    /// Block until the correlated response arrived, then collect it.
    ///
    /// Fails with `Disconnected` when the connection drops out from under
    /// the call; the entry is discarded so parked inbound commands are not
    /// held back by a dead request.
    async fn await_response(&self, id: u64, epoch: u64) -> Result<String> {
        let mut state_rx = self.state_rx.clone();
        loop {
            // Arm the wakeup before checking so a response landing between
            // the check and the await cannot be missed.
            let notified = self.shared.response_signal.notified();

            if !self.shared.correlation.is_pending(id) {
                return Ok(self.shared.correlation.take(id));
            }
            let state = *state_rx.borrow_and_update();
            let dropped = self.shared.connection_epoch.load(Ordering::Acquire) != epoch;
            if dropped || state != SessionState::Connected {
                let _ = self.shared.correlation.take(id);
                return Err(RelayError::Disconnected);
            }

            tokio::select! {
                _ = notified => {}
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        let _ = self.shared.correlation.take(id);
                        return Err(RelayError::Disconnected);
                    }
                }
            }
        }
    }
}
