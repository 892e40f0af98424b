use std::time::Duration;

use serde::Deserialize;

use relaymux_core::{RelayError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub version: u32,

    #[serde(default)]
    pub session: SessionSection,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(RelayError::Malformed("config version must be 1".into()));
        }
        self.session.validate()?;
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { version: 1, session: SessionSection::default() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSection {
    #[serde(default)]
    pub heartbeat: HeartbeatPolicy,

    /// Delay between reconnect attempts while a send is blocked on a dead
    /// connection. Retries are unbounded; only `prepare_session_closing`
    /// stops them.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Inbound frames larger than this are dropped before decoding.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatPolicy::default(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl SessionSection {
    pub fn validate(&self) -> Result<()> {
        self.heartbeat.validate()?;
        if !(10..=60_000).contains(&self.reconnect_delay_ms) {
            return Err(RelayError::Malformed(
                "session.reconnect_delay_ms must be between 10 and 60000".into(),
            ));
        }
        if !(64..=16_777_216).contains(&self.max_frame_bytes) {
            return Err(RelayError::Malformed(
                "session.max_frame_bytes must be between 64 and 16777216".into(),
            ));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Liveness probing while connected. A ping is sent every `interval_ms`; a
/// ping still unacknowledged at the next tick counts as a dead connection.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatPolicy {
    #[serde(default = "default_heartbeat_enabled")]
    pub enabled: bool,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            enabled: default_heartbeat_enabled(),
            interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl HeartbeatPolicy {
    pub fn validate(&self) -> Result<()> {
        if !(10..=120_000).contains(&self.interval_ms) {
            return Err(RelayError::Malformed(
                "session.heartbeat.interval_ms must be between 10 and 120000".into(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}
fn default_max_frame_bytes() -> usize {
    1_048_576
}
fn default_heartbeat_enabled() -> bool {
    true
}
fn default_heartbeat_interval_ms() -> u64 {
    20000
}
