use anyhow::Result;

use crate::VideoConfig;

pub fn check_video(cfg: &VideoConfig) -> Result<()> {
    let program = cfg.command.first().map(String::as_str).unwrap_or("");
    anyhow::ensure!(!program.trim().is_empty(), "video.command is empty");
    anyhow::ensure!(cfg.read_chunk_bytes >= 1024, "video.read_chunk_bytes too small; set >= 1024");
    anyhow::ensure!(cfg.first_frame_timeout_ms >= 100, "video.first_frame_timeout_ms too small");
    Ok(())
}
