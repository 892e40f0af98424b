//! Session driver task: the single owner of the transport connection.
//!
//! One loop selects over handle commands, transport events, the heartbeat
//! timer, and the reconnect timer. Dispatches run in spawned tasks so the
//! loop keeps pumping while a command executes; completions come back
//! through an internal channel, which is what lets a handler issue its own
//! `send_message` without deadlocking the session.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use relaymux_core::protocol::control;
use relaymux_core::protocol::frame::{decode_frame, encode_frame, RelayMessage, Verb, NO_CORRELATION};

use crate::config::{HeartbeatPolicy, SessionSection};
use crate::dispatch::ActionDispatcher;
use crate::obs::bump;
use crate::queue::{CommandQueue, QueuedCommand};
use crate::transport::{Transport, TransportEvent};

use super::{SessionCommand, SessionEvent, SessionState, Shared};

const DISPATCH_CHANNEL_CAPACITY: usize = 16;

/// Completion record of one spawned dispatch.
struct DispatchDone {
    verb: Verb,
    receiver_url: String,
    correlation_id: u64,
    result: relaymux_core::Result<String>,
}

pub(super) struct SessionDriver {
    transport: Box<dyn Transport>,
    dispatcher: Arc<dyn ActionDispatcher>,
    heartbeat: HeartbeatPolicy,
    reconnect_delay: Duration,
    max_frame_bytes: usize,
    shared: Arc<Shared>,
    queue: CommandQueue,
    state_tx: watch::Sender<SessionState>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    /// Event stream of the current connection; `None` while disconnected.
    events: Option<mpsc::Receiver<TransportEvent>>,
    session_events: Option<mpsc::Sender<SessionEvent>>,
    dispatch_tx: mpsc::Sender<DispatchDone>,
    dispatch_rx: mpsc::Receiver<DispatchDone>,
    retry_at: Option<Instant>,
    awaiting_ping_ack: bool,
    heartbeat_dirty: bool,
}

impl SessionDriver {
    pub(super) fn new(
        transport: Box<dyn Transport>,
        dispatcher: Arc<dyn ActionDispatcher>,
        session: SessionSection,
        shared: Arc<Shared>,
        state_tx: watch::Sender<SessionState>,
        cmd_rx: mpsc::Receiver<SessionCommand>,
        session_events: Option<mpsc::Sender<SessionEvent>>,
    ) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(DISPATCH_CHANNEL_CAPACITY);
        Self {
            transport,
            dispatcher,
            heartbeat: session.heartbeat,
            reconnect_delay: session.reconnect_delay(),
            max_frame_bytes: session.max_frame_bytes,
            shared,
            queue: CommandQueue::new(),
            state_tx,
            cmd_rx,
            events: None,
            session_events,
            dispatch_tx,
            dispatch_rx,
            retry_at: None,
            awaiting_ping_ack: false,
            heartbeat_dirty: false,
        }
    }

    pub(super) async fn run(mut self) {
        let mut heartbeat = heartbeat_timer(self.heartbeat.interval());
        loop {
            if self.heartbeat_dirty {
                heartbeat = heartbeat_timer(self.heartbeat.interval());
                self.heartbeat_dirty = false;
            }
            if self.shared.is_closing()
                && self.state() == SessionState::Disconnected
                && !self.queue.is_processing()
            {
                debug!("session driver stopped after close");
                return;
            }

            let heartbeat_armed = self.heartbeat.enabled && self.state() == SessionState::Connected;
            let retry_at = self.retry_at;

            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        // Every handle is gone; tear the connection down.
                        self.shared.closing.store(true, Ordering::Relaxed);
                        let _ = self.transport.close().await;
                        self.set_state(SessionState::Disconnected);
                        return;
                    }
                },
                Some(done) = self.dispatch_rx.recv() => self.on_dispatch_done(done).await,
                ev = next_event(&mut self.events) => self.on_transport_event(ev).await,
                _ = heartbeat.tick(), if heartbeat_armed => self.on_heartbeat_tick().await,
                _ = sleep_until_opt(retry_at), if retry_at.is_some() => self.attempt_connect().await,
            }
        }
    }

    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.session_events {
            // Lossy: a slow subscriber must not stall the driver.
            let _ = tx.try_send(event);
        }
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Connect => {
                if self.shared.is_closing() {
                    return;
                }
                if self.state() == SessionState::Disconnected {
                    self.set_state(SessionState::Connecting);
                    self.attempt_connect().await;
                }
            }
            SessionCommand::WriteFrame { frame } => self.write_frame(frame).await,
            SessionCommand::PrepareClosing => {
                self.retry_at = None;
                match self.state() {
                    SessionState::Connected | SessionState::Connecting => {
                        self.set_state(SessionState::Closing);
                        if self.events.is_none() {
                            // No live connection to wait on.
                            self.finish_close("closed before connect completed".into());
                        } else if let Err(e) = self.transport.close().await {
                            warn!(error = %e, "transport close failed");
                            self.finish_close(format!("close failed: {e}"));
                        }
                    }
                    SessionState::Disconnected | SessionState::Closing => {}
                }
            }
            SessionCommand::UpdateHeartbeat { policy } => {
                info!(enabled = policy.enabled, interval_ms = policy.interval_ms, "heartbeat policy updated");
                self.heartbeat = policy;
                self.heartbeat_dirty = true;
                self.awaiting_ping_ack = false;
            }
            SessionCommand::SendFinished => self.pump_queue(),
        }
    }

    async fn attempt_connect(&mut self) {
        self.retry_at = None;
        if self.shared.is_closing() {
            self.set_state(SessionState::Disconnected);
            return;
        }
        let Some(url) = self.shared.relay_url() else {
            self.set_state(SessionState::Disconnected);
            return;
        };
        bump(&self.shared.metrics.reconnect_attempts);
        match self.transport.connect(&url).await {
            Ok(events) => {
                debug!(%url, "transport connect accepted, awaiting open");
                self.events = Some(events);
            }
            Err(e) => {
                warn!(error = %e, %url, "relay connect attempt failed");
                self.retry_at = Some(Instant::now() + self.reconnect_delay);
            }
        }
    }

    async fn write_frame(&mut self, frame: Bytes) {
        if self.state() != SessionState::Connected {
            debug!("dropping outbound frame while not connected");
            return;
        }
        if let Err(e) = self.transport.send(frame).await {
            warn!(error = %e, "transport send failed");
            self.on_connection_lost(format!("send failed: {e}"));
        }
    }

    async fn on_transport_event(&mut self, ev: Option<TransportEvent>) {
        let ev = ev.unwrap_or_else(|| TransportEvent::Closed { reason: "event channel dropped".into() });
        match ev {
            TransportEvent::Opened => {
                if self.state() == SessionState::Connecting {
                    info!("relay connection established");
                    self.awaiting_ping_ack = false;
                    self.heartbeat_dirty = true;
                    self.set_state(SessionState::Connected);
                }
            }
            TransportEvent::PingAck => self.awaiting_ping_ack = false,
            TransportEvent::Frame(bytes) => self.on_frame(bytes),
            TransportEvent::Closed { reason } => {
                self.events = None;
                if self.state() == SessionState::Closing {
                    self.finish_close(reason);
                } else {
                    self.on_connection_lost(reason);
                }
            }
        }
    }

    fn on_frame(&mut self, bytes: Bytes) {
        if bytes.len() > self.max_frame_bytes {
            warn!(len = bytes.len(), max = self.max_frame_bytes, "dropping oversized frame");
            bump(&self.shared.metrics.frames_dropped);
            return;
        }
        let msg = match decode_frame(&bytes) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                bump(&self.shared.metrics.frames_dropped);
                return;
            }
        };
        bump(&self.shared.metrics.frames_decoded);

        match msg.verb {
            Verb::Response => {
                let RelayMessage { correlation_id, payload, .. } = msg;
                if self.shared.correlation.on_response_received(correlation_id, payload) {
                    bump(&self.shared.metrics.responses_matched);
                    self.emit(SessionEvent::ResponseReceived { correlation_id });
                } else {
                    bump(&self.shared.metrics.responses_orphaned);
                }
                // Wake blocked senders either way; each caller re-checks its
                // own id.
                self.shared.response_signal.notify_waiters();
            }
            Verb::Execute | Verb::Queue | Verb::Control => self.submit_command(msg),
        }
    }

    fn submit_command(&mut self, message: RelayMessage) {
        let send_in_flight = self.shared.correlation.any_pending();
        match self.queue.submit(message, send_in_flight) {
            Some(cmd) => self.start_dispatch(cmd),
            None => {
                bump(&self.shared.metrics.commands_deferred);
                debug!(parked = self.queue.deferred_len(), "inbound command deferred");
            }
        }
    }

    fn start_dispatch(&mut self, cmd: QueuedCommand) {
        bump(&self.shared.metrics.commands_dispatched);
        let QueuedCommand { message, arrival_seq } = cmd;
        debug!(
            seq = arrival_seq,
            verb = %message.verb,
            receiver = %message.receiver_url,
            "dispatching inbound command"
        );
        let dispatcher = Arc::clone(&self.dispatcher);
        let done_tx = self.dispatch_tx.clone();
        tokio::spawn(async move {
            let result = dispatcher
                .dispatch(message.verb, &message.receiver_url, &message.payload)
                .await;
            let done = DispatchDone {
                verb: message.verb,
                receiver_url: message.receiver_url,
                correlation_id: message.correlation_id,
                result,
            };
            let _ = done_tx.send(done).await;
        });
    }

    async fn on_dispatch_done(&mut self, done: DispatchDone) {
        let result = match done.result {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, receiver = %done.receiver_url, "action dispatch failed");
                String::new()
            }
        };
        if done.verb == Verb::Execute {
            // The reply goes out before the next command is pulled.
            let frame = encode_frame(Verb::Response, &done.receiver_url, done.correlation_id, &result);
            self.write_frame(frame).await;
        }
        if let Some(next) = self.queue.on_dispatch_complete(self.shared.correlation.any_pending()) {
            self.start_dispatch(next);
        }
    }

    fn pump_queue(&mut self) {
        if let Some(next) = self.queue.next_ready(self.shared.correlation.any_pending()) {
            self.start_dispatch(next);
        }
    }

    /// Abrupt-disconnect path: fail blocked senders, then push an
    /// emergency-shutdown `control` command through the regular dispatch
    /// queue so the application can unwind in order.
    fn on_connection_lost(&mut self, reason: String) {
        if self.state() == SessionState::Disconnected {
            return;
        }
        warn!(%reason, "relay connection lost");
        self.events = None;
        self.awaiting_ping_ack = false;
        self.retry_at = None;
        self.set_state(SessionState::Disconnected);
        self.shared.connection_epoch.fetch_add(1, Ordering::Release);
        self.shared.response_signal.notify_waiters();
        self.emit(SessionEvent::ConnectionClosed { graceful: false, reason });

        let msg = RelayMessage {
            verb: Verb::Control,
            receiver_url: String::new(),
            correlation_id: NO_CORRELATION,
            payload: control::SHUTDOWN.to_owned(),
        };
        self.submit_command(msg);
    }

    /// Graceful teardown: no synthetic command is dispatched.
    fn finish_close(&mut self, reason: String) {
        info!(%reason, "relay session closed");
        self.events = None;
        self.awaiting_ping_ack = false;
        self.set_state(SessionState::Disconnected);
        self.shared.connection_epoch.fetch_add(1, Ordering::Release);
        self.shared.response_signal.notify_waiters();
        self.emit(SessionEvent::ConnectionClosed { graceful: true, reason });
    }

    async fn on_heartbeat_tick(&mut self) {
        if self.awaiting_ping_ack {
            bump(&self.shared.metrics.heartbeat_misses);
            warn!("heartbeat unacknowledged, treating connection as dead");
            self.on_connection_lost("heartbeat timeout".into());
            return;
        }
        self.awaiting_ping_ack = true;
        if let Err(e) = self.transport.ping().await {
            warn!(error = %e, "transport ping failed");
            self.on_connection_lost(format!("ping failed: {e}"));
        }
    }
}

fn heartbeat_timer(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn next_event(events: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
