//! Inbound command queue.
//!
//! Commands the relay pushes to this client (`execute`, `queue`, `control`)
//! must be handled one at a time, in strict arrival order, and never
//! underneath a local send that is blocked on its response. This queue is a
//! plain synchronous state machine; the session driver owns it and feeds the
//! "a local send is in flight" predicate in from the correlation table.
//!
//! A command that cannot run immediately is parked; it is replayed only once
//! the current dispatch finishes and no blocking send remains, so a command
//! arriving mid-drain can never jump ahead of one parked earlier.

use std::collections::VecDeque;

use relaymux_core::protocol::frame::RelayMessage;

/// One inbound command awaiting local dispatch.
#[derive(Debug)]
pub struct QueuedCommand {
    pub message: RelayMessage,
    /// Position in the arrival order, for logs and tests.
    pub arrival_seq: u64,
}

/// Single-flight, arrival-ordered dispatch gate.
#[derive(Debug, Default)]
pub struct CommandQueue {
    processing: bool,
    deferred: VecDeque<QueuedCommand>,
    next_seq: u64,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a newly arrived command.
    ///
    /// Returns the command if it should be dispatched right now. `None` means
    /// it was parked behind the current dispatch, a blocking send, or earlier
    /// parked commands.
    pub fn submit(&mut self, message: RelayMessage, send_in_flight: bool) -> Option<QueuedCommand> {
        let cmd = QueuedCommand { message, arrival_seq: self.next_seq };
        self.next_seq += 1;

        if self.processing || send_in_flight || !self.deferred.is_empty() {
            self.deferred.push_back(cmd);
            return None;
        }
        self.processing = true;
        Some(cmd)
    }

    /// Record that the in-flight dispatch finished and pull the next runnable
    /// command, if any.
    pub fn on_dispatch_complete(&mut self, send_in_flight: bool) -> Option<QueuedCommand> {
        self.processing = false;
        self.next_ready(send_in_flight)
    }

    /// Re-check the head of the queue. Used when a blocking send resolves and
    /// parked commands may have become runnable.
    pub fn next_ready(&mut self, send_in_flight: bool) -> Option<QueuedCommand> {
        if self.processing || send_in_flight {
            return None;
        }
        let cmd = self.deferred.pop_front()?;
        self.processing = true;
        Some(cmd)
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymux_core::protocol::frame::Verb;

    fn msg(payload: &str) -> RelayMessage {
        RelayMessage {
            verb: Verb::Queue,
            receiver_url: "svc://test".into(),
            correlation_id: 0,
            payload: payload.into(),
        }
    }

    #[test]
    fn idle_queue_dispatches_immediately() {
        let mut q = CommandQueue::new();
        let cmd = q.submit(msg("a"), false);
        assert_eq!(cmd.unwrap().message.payload, "a");
        assert!(q.is_processing());
    }

    #[test]
    fn second_arrival_defers_until_first_completes() {
        let mut q = CommandQueue::new();
        assert!(q.submit(msg("a"), false).is_some());
        assert!(q.submit(msg("b"), false).is_none());
        assert_eq!(q.deferred_len(), 1);

        let next = q.on_dispatch_complete(false).unwrap();
        assert_eq!(next.message.payload, "b");
        assert!(q.is_processing());
        assert!(q.on_dispatch_complete(false).is_none());
        assert!(!q.is_processing());
    }

    #[test]
    fn preserves_arrival_order() {
        let mut q = CommandQueue::new();
        assert!(q.submit(msg("a"), false).is_some());
        for p in ["b", "c", "d", "e"] {
            assert!(q.submit(msg(p), false).is_none());
        }

        let mut seen = Vec::new();
        while let Some(cmd) = q.on_dispatch_complete(false) {
            seen.push(cmd.message.payload.clone());
        }
        assert_eq!(seen, ["b", "c", "d", "e"]);
    }

    #[test]
    fn arrival_seq_is_monotonic() {
        let mut q = CommandQueue::new();
        let a = q.submit(msg("a"), false).unwrap();
        q.submit(msg("b"), false);
        let b = q.on_dispatch_complete(false).unwrap();
        assert!(b.arrival_seq > a.arrival_seq);
    }

    #[test]
    fn blocking_send_defers_even_when_idle() {
        let mut q = CommandQueue::new();
        assert!(q.submit(msg("a"), true).is_none());
        assert!(!q.is_processing());

        // Still held back while the send is outstanding.
        assert!(q.next_ready(true).is_none());

        // Runnable once the send resolves.
        let cmd = q.next_ready(false).unwrap();
        assert_eq!(cmd.message.payload, "a");
        assert!(q.is_processing());
    }

    #[test]
    fn completion_under_blocking_send_leaves_queue_parked() {
        let mut q = CommandQueue::new();
        assert!(q.submit(msg("a"), false).is_some());
        assert!(q.submit(msg("b"), false).is_none());

        // Dispatch of "a" finishes while a send is blocked; "b" must wait.
        assert!(q.on_dispatch_complete(true).is_none());
        assert_eq!(q.deferred_len(), 1);

        let cmd = q.next_ready(false).unwrap();
        assert_eq!(cmd.message.payload, "b");
    }

    #[test]
    fn new_arrival_cannot_jump_parked_commands() {
        let mut q = CommandQueue::new();
        assert!(q.submit(msg("a"), true).is_none());
        // The queue is idle but "a" is parked; "b" must line up behind it.
        assert!(q.submit(msg("b"), false).is_none());

        assert_eq!(q.next_ready(false).unwrap().message.payload, "a");
        assert_eq!(q.on_dispatch_complete(false).unwrap().message.payload, "b");
    }
}
