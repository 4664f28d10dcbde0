use anyhow::{Context, Result};

use crate::mav::serial_device;
use crate::motion::MotionConfig;
use crate::{FcConfig, FcKind};

pub fn check_fc(fc: &FcConfig) -> Result<()> {
    if fc.kind == FcKind::Mavlink {
        let conn = fc.connection.as_deref().unwrap_or("");
        anyhow::ensure!(!conn.is_empty(), "fc.connection missing (fc.kind=mavlink)");
        anyhow::ensure!(
            ["serial:", "udpin:", "udpout:", "tcpin:", "tcpout:"].iter().any(|p| conn.starts_with(p)),
            "fc.connection has unknown scheme: {}",
            conn
        );
        serial_device(conn).context("fc.connection")?;
    }
    anyhow::ensure!(fc.ack_timeout_ms >= 100, "fc.ack_timeout_ms too small");
    anyhow::ensure!(fc.arrival_radius_m > 0.0, "fc.arrival_radius_m must be > 0");
    anyhow::ensure!(fc.takeoff_alt_m >= 1.0, "fc.takeoff_alt_m too low");
    if let Some(hz) = fc.send_heartbeat_hz {
        anyhow::ensure!(hz > 0.0 && hz <= 10.0, "fc.send_heartbeat_hz should be (0, 10]");
    }
    Ok(())
}

pub fn check_motion(m: &MotionConfig) -> Result<()> {
    anyhow::ensure!(m.max_velocity_mps > 0.0 && m.max_velocity_mps <= 20.0, "motion.max_velocity_mps out of range");
    anyhow::ensure!(
        m.magnitude_fraction > 0.0 && m.magnitude_fraction <= 1.0,
        "motion.magnitude_fraction must be in (0, 1]"
    );
    anyhow::ensure!(m.safety_stop_ms >= 100, "motion.safety_stop_ms too small");
    Ok(())
}
