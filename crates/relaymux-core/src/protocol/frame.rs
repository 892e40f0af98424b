//! Relay frame codec (panic-free).
//!
//! Wire layout, text with case-sensitive lower-case verbs:
//!
//! ```text
//! <verb>\n<receiver_url>\n<correlation_id>\n<payload...>
//! ```
//!
//! Only the first three newlines delimit fields; the payload is the raw
//! remainder and may itself contain newlines. It is never re-split.

use bytes::Bytes;

use crate::error::{RelayError, Result};

/// Correlation id meaning "no correlation expected/established".
///
/// Used by `queue` and `control` frames, and as the failure marker when an
/// inbound `response` cannot be matched.
pub const NO_CORRELATION: u64 = 0;

/// Message kind on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Reply to an earlier `execute`; unblocks the local sender.
    Response,
    /// Correlated request; the receiver must answer with a `response`.
    Execute,
    /// Fire-and-forget request; no reply is expected.
    Queue,
    /// Session-level command; no receiver, no correlation.
    Control,
}

impl Verb {
    /// Wire token.
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Response => "response",
            Verb::Execute => "execute",
            Verb::Queue => "queue",
            Verb::Control => "control",
        }
    }

    /// Parse a wire token. Tokens are case-sensitive.
    pub fn parse(token: &str) -> Option<Verb> {
        match token {
            "response" => Some(Verb::Response),
            "execute" => Some(Verb::Execute),
            "queue" => Some(Verb::Queue),
            "control" => Some(Verb::Control),
            _ => None,
        }
    }

    /// Whether a sender of this verb awaits a correlated `response`.
    pub fn expects_response(self) -> bool {
        matches!(self, Verb::Execute)
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One wire unit. Immutable once constructed; built and torn down per
/// send/receive event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub verb: Verb,
    /// Logical destination; empty for `control`.
    pub receiver_url: String,
    /// `NO_CORRELATION` unless the verb is correlated.
    pub correlation_id: u64,
    /// Opaque content, typically JSON. May contain newlines.
    pub payload: String,
}

impl RelayMessage {
    /// Encode this message into a wire frame.
    pub fn encode(&self) -> Bytes {
        encode_frame(self.verb, &self.receiver_url, self.correlation_id, &self.payload)
    }
}

/// Encode a frame.
///
/// `queue` and `control` frames are pinned to correlation id 0, and `control`
/// additionally to an empty receiver, regardless of the arguments.
pub fn encode_frame(verb: Verb, receiver_url: &str, correlation_id: u64, payload: &str) -> Bytes {
    let (receiver_url, correlation_id) = match verb {
        Verb::Control => ("", NO_CORRELATION),
        Verb::Queue => (receiver_url, NO_CORRELATION),
        Verb::Response | Verb::Execute => (receiver_url, correlation_id),
    };
    Bytes::from(format!("{}\n{}\n{}\n{}", verb.as_str(), receiver_url, correlation_id, payload))
}

/// Decode a frame.
///
/// Splits on the first three newlines only. Fails if the verb is unknown, a
/// header field is missing, or the correlation id is not a decimal u64; the
/// caller must log and drop the frame, never partially process it.
pub fn decode_frame(raw: &[u8]) -> Result<RelayMessage> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| RelayError::Malformed(format!("frame is not utf-8: {e}")))?;

    let Some((verb_token, rest)) = text.split_once('\n') else {
        // No header newline at all. Report the more specific problem when the
        // whole string is not even a verb.
        return Err(match Verb::parse(text) {
            Some(_) => RelayError::Malformed("missing receiver field".into()),
            None => RelayError::Malformed(format!("unknown verb: {text:?}")),
        });
    };
    let verb = Verb::parse(verb_token)
        .ok_or_else(|| RelayError::Malformed(format!("unknown verb: {verb_token:?}")))?;

    let Some((receiver_url, rest)) = rest.split_once('\n') else {
        return Err(RelayError::Malformed("missing receiver field".into()));
    };
    let Some((id_token, payload)) = rest.split_once('\n') else {
        return Err(RelayError::Malformed("missing correlation-id field".into()));
    };
    let correlation_id = id_token
        .parse::<u64>()
        .map_err(|_| RelayError::Malformed(format!("invalid correlation id: {id_token:?}")))?;

    Ok(RelayMessage {
        verb,
        receiver_url: receiver_url.to_owned(),
        correlation_id,
        payload: payload.to_owned(),
    })
}
