pub mod doctor;
pub mod mjpeg;
mod process;

pub use process::ProcessStreamer;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;

/// Receives encoded frames as they are produced.
pub trait FrameSink: Send + Sync {
    fn frame(&self, data: Bytes);
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("video.command is empty")]
    NoCommand,
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("encoder stdout unavailable")]
    NoOutput,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait StreamingCapability: Send + Sync {
    /// Starts delivering frames to `sink`. Starting twice is a no-op.
    async fn start(&self, sink: Arc<dyn FrameSink>) -> Result<(), StreamError>;
    /// Stops delivery. Stopping while idle is a no-op.
    async fn stop(&self) -> Result<(), StreamError>;
    fn is_streaming(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Split the encoder output on JPEG start/end markers.
    #[default]
    Mjpeg,
    /// Forward stdout reads as they come.
    Chunk,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    /// Encoder argv; must write the stream to stdout.
    #[serde(default = "default_command")]
    pub command: Vec<String>,
    #[serde(default)]
    pub framing: Framing,
    #[serde(default = "default_read_chunk")]
    pub read_chunk_bytes: usize,
    #[serde(default = "default_first_frame_timeout")]
    pub first_frame_timeout_ms: u64,
    #[serde(default = "default_log_every")]
    pub log_every_frames: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            framing: Framing::default(),
            read_chunk_bytes: default_read_chunk(),
            first_frame_timeout_ms: default_first_frame_timeout(),
            log_every_frames: default_log_every(),
        }
    }
}

fn default_command() -> Vec<String> {
    [
        "libcamera-vid", "-n", "-t", "0",
        "--codec", "mjpeg",
        "--width", "640", "--height", "480",
        "--framerate", "15",
        "-o", "-",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_read_chunk() -> usize { 64 * 1024 }
fn default_first_frame_timeout() -> u64 { 2000 }
fn default_log_every() -> u64 { 30 }
