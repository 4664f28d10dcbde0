use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mjpeg::MjpegSplitter;
use crate::{FrameSink, Framing, StreamError, StreamingCapability, VideoConfig};

struct Active {
    child: Child,
    pump: JoinHandle<()>,
    watchdog: JoinHandle<()>,
}

/// Runs an external encoder and forwards what it writes on stdout.
pub struct ProcessStreamer {
    cfg: VideoConfig,
    active: Mutex<Option<Active>>,
}

impl ProcessStreamer {
    pub fn new(cfg: VideoConfig) -> Self {
        Self { cfg, active: Mutex::new(None) }
    }
}

#[async_trait]
impl StreamingCapability for ProcessStreamer {
    async fn start(&self, sink: Arc<dyn FrameSink>) -> Result<(), StreamError> {
        let mut active = self.active.lock();
        if let Some(a) = active.as_ref() {
            if !a.pump.is_finished() {
                warn!("video: already streaming");
                return Ok(());
            }
        }

        let (program, args) = self.cfg.command.split_first().ok_or(StreamError::NoCommand)?;
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::null()).kill_on_drop(true);
        let mut child = cmd
            .spawn()
            .map_err(|source| StreamError::Spawn { program: program.clone(), source })?;
        let stdout = child.stdout.take().ok_or(StreamError::NoOutput)?;

        let frames = Arc::new(AtomicU64::new(0));
        let pump = tokio::spawn(pump(stdout, sink, frames.clone(), self.cfg.clone()));

        let first_frame = Duration::from_millis(self.cfg.first_frame_timeout_ms);
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(first_frame).await;
            if frames.load(Ordering::Relaxed) == 0 {
                warn!("video: no frames received {:?} after start", first_frame);
            }
        });

        info!("video: started {}", program);
        // an exited previous encoder is simply replaced
        *active = Some(Active { child, pump, watchdog });
        Ok(())
    }

    async fn stop(&self) -> Result<(), StreamError> {
        let Some(mut a) = self.active.lock().take() else {
            debug!("video: stop while idle");
            return Ok(());
        };
        a.watchdog.abort();
        a.pump.abort();
        if let Err(e) = a.child.kill().await {
            // already exited
            debug!("video: kill encoder: {}", e);
        }
        info!("video: stopped");
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.active.lock().as_ref().map_or(false, |a| !a.pump.is_finished())
    }
}

async fn pump(mut stdout: ChildStdout, sink: Arc<dyn FrameSink>, frames: Arc<AtomicU64>, cfg: VideoConfig) {
    let mut buf = vec![0u8; cfg.read_chunk_bytes.max(1024)];
    let mut splitter = MjpegSplitter::new(cfg.read_chunk_bytes.saturating_mul(16));
    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) => {
                info!("video: encoder closed its output after {} frames", frames.load(Ordering::Relaxed));
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("video: read encoder output: {}", e);
                return;
            }
        };
        let out = match cfg.framing {
            Framing::Mjpeg => splitter.push(&buf[..n]),
            Framing::Chunk => vec![Bytes::copy_from_slice(&buf[..n])],
        };
        for frame in out {
            sink.frame(frame);
            let count = frames.fetch_add(1, Ordering::Relaxed) + 1;
            if cfg.log_every_frames > 0 && count % cfg.log_every_frames == 0 {
                debug!("video: {} frames sent", count);
            }
        }
    }
}
