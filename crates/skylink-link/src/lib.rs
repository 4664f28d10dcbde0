pub mod doctor;
pub mod frame;
mod uplink;

pub use uplink::{Endpoint, Uplink};

use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use skylink_proto::message::Envelope;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// What the channel reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    StateChanged(LinkState),
    Message(Envelope),
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("channel not connected")]
    NotConnected,
    #[error("bad endpoint: {0}")]
    Endpoint(String),
    #[error("frame: {0}")]
    Frame(String),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("tls: {0}")]
    Tls(String),
    #[error("connect timed out")]
    Timeout,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound half of the operator channel. Sends never queue: while the
/// channel is down they fail with [`LinkError::NotConnected`].
pub trait DuplexChannel: Send + Sync {
    fn is_connected(&self) -> bool;
    fn publish(&self, topic: &str, payload: Value) -> Result<(), LinkError>;
    fn publish_binary(&self, topic: &str, payload: Bytes) -> Result<(), LinkError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct UplinkConfig {
    /// "tls://host:port" or "tcp://host:port"
    pub endpoint: String,
    #[serde(default = "default_reconnect_min")]
    pub reconnect_min_ms: u64,
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_max_frame")]
    pub max_frame_bytes: usize,
}

impl UplinkConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            reconnect_min_ms: default_reconnect_min(),
            reconnect_max_ms: default_reconnect_max(),
            connect_timeout_ms: default_connect_timeout(),
            max_frame_bytes: default_max_frame(),
        }
    }
}

fn default_reconnect_min() -> u64 { 1000 }
fn default_reconnect_max() -> u64 { 5000 }
fn default_connect_timeout() -> u64 { 10_000 }
fn default_max_frame() -> usize { 4 * 1024 * 1024 }

/// Randomized reconnect delay bounded to `[min, max]`. The upper bound
/// doubles after each failed attempt and resets once connected.
#[derive(Debug, Clone)]
pub struct Backoff {
    min_ms: u64,
    max_ms: u64,
    ceiling_ms: u64,
}

impl Backoff {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        let max_ms = max_ms.max(min_ms);
        Self { min_ms, max_ms, ceiling_ms: min_ms }
    }

    pub fn next_delay(&mut self) -> Duration {
        let ms = rand::thread_rng().gen_range(self.min_ms..=self.ceiling_ms);
        self.ceiling_ms = (self.ceiling_ms.saturating_mul(2)).clamp(self.min_ms, self.max_ms);
        Duration::from_millis(ms)
    }

    pub fn reset(&mut self) {
        self.ceiling_ms = self.min_ms;
    }
}
