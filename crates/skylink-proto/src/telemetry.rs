use serde::{Deserialize, Serialize};

/// Latest-known vehicle state. Every field is independent; `None` means the
/// vehicle has not reported it yet and it is left out of the serialized form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_flying: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_signal_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub satellite_count: Option<u32>,
}

impl TelemetryFields {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub timestamp: String,
    #[serde(flatten)]
    pub fields: TelemetryFields,
}

impl TelemetrySnapshot {
    /// The snapshot minus its timestamp; two snapshots with equal keys carry
    /// the same vehicle state.
    pub fn comparison_key(&self) -> &TelemetryFields {
        &self.fields
    }
}

/// One vehicle-state report from the flight controller.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryUpdate {
    Location { latitude: f64, longitude: f64 },
    Location3D { latitude: f64, longitude: f64, altitude: f64 },
    Altitude(f64),
    BatteryPercent(u8),
    /// Velocity components in m/s; stored as ground-plus-vertical magnitude.
    Velocity { x: f64, y: f64, z: f64 },
    Heading(f64),
    Flying(bool),
    FlightMode(String),
    GpsSignalLevel(String),
    SatelliteCount(u32),
}

impl TelemetryUpdate {
    pub fn apply(self, f: &mut TelemetryFields) {
        match self {
            Self::Location { latitude, longitude } => {
                f.latitude = Some(latitude);
                f.longitude = Some(longitude);
            }
            Self::Location3D { latitude, longitude, altitude } => {
                f.latitude = Some(latitude);
                f.longitude = Some(longitude);
                // barometric altitude wins until the 3D fix reports a real height
                if altitude > 0.0 {
                    f.altitude_m = Some(altitude);
                }
            }
            Self::Altitude(a) => f.altitude_m = Some(a),
            Self::BatteryPercent(p) => f.battery_percent = Some(p),
            Self::Velocity { x, y, z } => f.speed_mps = Some((x * x + y * y + z * z).sqrt()),
            Self::Heading(h) => f.heading_deg = Some(h),
            Self::Flying(b) => f.is_flying = Some(b),
            Self::FlightMode(m) => f.flight_mode = Some(m),
            Self::GpsSignalLevel(l) => f.gps_signal_level = Some(l),
            Self::SatelliteCount(n) => f.satellite_count = Some(n),
        }
    }
}
