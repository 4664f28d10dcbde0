use std::time::{Duration, Instant};

use crate::Coordinate3D;

/// Live view of the flight controller as seen by the MAVLink reader.
#[derive(Debug, Clone, Default)]
pub struct FcStatus {
    pub connected: bool,
    pub connection: Option<String>,
    pub last_heartbeat: Option<Instant>,
    pub custom_mode: Option<u32>,
    pub armed: bool,
    pub position: Option<Coordinate3D>,
}

impl FcStatus {
    pub fn hb_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }
}

/// ArduCopter custom-mode names.
pub fn copter_mode_name(custom_mode: u32) -> String {
    let name = match custom_mode {
        0 => "STABILIZE",
        1 => "ACRO",
        2 => "ALT_HOLD",
        3 => "AUTO",
        4 => "GUIDED",
        5 => "LOITER",
        6 => "RTL",
        7 => "CIRCLE",
        9 => "LAND",
        16 => "POSHOLD",
        17 => "BRAKE",
        21 => "SMART_RTL",
        other => return format!("MODE_{}", other),
    };
    name.to_string()
}
