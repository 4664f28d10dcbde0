use std::fmt;

use serde_json::{Map, Value};

use crate::message::string_field;
use crate::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaypointAction {
    FlyTo,
    Hover,
    TakePhoto,
    StartRecording,
    StopRecording,
    /// Anything else the planner sends; executed as a fly-to.
    Unknown(String),
}

impl WaypointAction {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "fly_to" => Self::FlyTo,
            "hover" => Self::Hover,
            "take_photo" => Self::TakePhoto,
            "start_recording" => Self::StartRecording,
            "stop_recording" => Self::StopRecording,
            _ => Self::Unknown(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::FlyTo => "fly_to",
            Self::Hover => "hover",
            Self::TakePhoto => "take_photo",
            Self::StartRecording => "start_recording",
            Self::StopRecording => "stop_recording",
            Self::Unknown(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above the take-off point.
    pub altitude: f64,
    pub action: WaypointAction,
}

impl fmt::Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lat={}, lng={}, alt={}m, action={}",
            self.latitude,
            self.longitude,
            self.altitude,
            self.action.as_str()
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MissionStart {
    pub vehicle_id: String,
    pub waypoints: Vec<Waypoint>,
}

/// Parses a `mission:start` payload. A top-level `waypoints` array wins over
/// `mission.waypoints`. One bad waypoint rejects the whole mission.
pub fn parse_mission_start(payload: &Value) -> Result<MissionStart, ValidationError> {
    if payload.is_null() {
        return Err(ValidationError::EmptyPayload);
    }
    let obj = payload.as_object().ok_or(ValidationError::NotAnObject)?;
    let vehicle_id = string_field(obj, "droneId").unwrap_or_default();

    let list = obj
        .get("waypoints")
        .and_then(Value::as_array)
        .or_else(|| {
            obj.get("mission")
                .and_then(|m| m.get("waypoints"))
                .and_then(Value::as_array)
        })
        .ok_or(ValidationError::NoWaypoints)?;
    if list.is_empty() {
        return Err(ValidationError::NoWaypoints);
    }

    let waypoints = list
        .iter()
        .enumerate()
        .map(|(index, v)| {
            parse_waypoint(v).map_err(|reason| ValidationError::Waypoint { index, reason })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(MissionStart { vehicle_id, waypoints })
}

fn parse_waypoint(v: &Value) -> Result<Waypoint, String> {
    let obj = v.as_object().ok_or_else(|| "not an object".to_string())?;
    let latitude = number(obj, &["latitude", "lat"])?;
    let longitude = number(obj, &["longitude", "lng", "lon"])?;
    let altitude = number(obj, &["altitude", "alt"])?;
    let action = match obj.get("action") {
        None | Some(Value::Null) => WaypointAction::FlyTo,
        Some(Value::String(s)) => WaypointAction::parse(s),
        Some(other) => return Err(format!("action is not a string: {}", other)),
    };

    if !(-90.0..=90.0).contains(&latitude) {
        return Err(format!("latitude {} out of range", latitude));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(format!("longitude {} out of range", longitude));
    }
    if altitude < 0.0 {
        return Err(format!("altitude {} below ground", altitude));
    }

    Ok(Waypoint { latitude, longitude, altitude, action })
}

// Missing or null numbers default to 0.0; numeric strings are accepted.
fn number(obj: &Map<String, Value>, keys: &[&str]) -> Result<f64, String> {
    for key in keys {
        let n = match obj.get(*key) {
            None | Some(Value::Null) => continue,
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            Some(_) => None,
        };
        return match n {
            Some(x) if x.is_finite() => Ok(x),
            _ => Err(format!("`{}` is not a number", key)),
        };
    }
    Ok(0.0)
}
