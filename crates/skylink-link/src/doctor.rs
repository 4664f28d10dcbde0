use anyhow::Result;

use crate::{Endpoint, UplinkConfig};

pub fn check_uplink(cfg: &UplinkConfig) -> Result<()> {
    Endpoint::parse(&cfg.endpoint)?;
    anyhow::ensure!(cfg.reconnect_min_ms >= 100, "uplink.reconnect_min_ms too small");
    anyhow::ensure!(
        cfg.reconnect_max_ms >= cfg.reconnect_min_ms,
        "uplink.reconnect_max_ms must be >= reconnect_min_ms"
    );
    anyhow::ensure!(cfg.max_frame_bytes >= 64 * 1024, "uplink.max_frame_bytes too small; set >= 64KiB");
    Ok(())
}
