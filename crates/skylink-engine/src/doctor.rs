use anyhow::Result;
use std::path::Path;

use crate::logsink::TelemetryConfig;
use crate::mission::MissionConfig;
use crate::session::SessionConfig;

pub fn check_session(s: &SessionConfig) -> Result<()> {
    anyhow::ensure!(!s.vehicle_id.trim().is_empty(), "session.vehicle_id is empty");
    anyhow::ensure!(
        s.ping_interval_ms == 0 || s.ping_interval_ms >= 1000,
        "session.ping_interval_ms should be 0 (off) or >= 1000"
    );
    Ok(())
}

pub fn check_telemetry(t: &TelemetryConfig) -> Result<()> {
    let p = Path::new(&t.dir);
    if p.exists() {
        anyhow::ensure!(p.is_dir(), "telemetry.dir is not a dir: {}", t.dir.display());
    }
    anyhow::ensure!(!t.file_prefix.is_empty(), "telemetry.file_prefix is empty");
    anyhow::ensure!(
        !t.file_prefix.contains(|c: char| c == '/' || c == '\\'),
        "telemetry.file_prefix must not contain path separators"
    );
    anyhow::ensure!(t.periodic_ms == 0 || t.periodic_ms >= 500, "telemetry.periodic_ms too small");
    Ok(())
}

pub fn check_mission(m: &MissionConfig) -> Result<()> {
    anyhow::ensure!(m.max_speed_mps > 0.0 && m.max_speed_mps <= 20.0, "mission.max_speed_mps out of range");
    anyhow::ensure!(m.safety_height_m >= 0.0 && m.safety_height_m <= 120.0, "mission.safety_height_m out of range");
    anyhow::ensure!(m.settle_ms <= 60_000 && m.hover_ms <= 600_000, "mission delays unreasonably long");
    Ok(())
}
