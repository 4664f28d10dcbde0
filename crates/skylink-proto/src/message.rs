use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::telemetry::TelemetrySnapshot;
use crate::ValidationError;

/// One named event on the channel. `data` is the structured payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self { event: event.into(), data }
    }
}

// ----- inbound -----

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HeartbeatReply {
    pub timestamp: String,
    pub message: String,
    pub received_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandMessage {
    pub drone_id: String,
    pub command: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MissionEnd {
    pub drone_id: String,
}

pub fn parse_heartbeat_reply(payload: &Value) -> Result<HeartbeatReply, ValidationError> {
    let obj = object(payload)?;
    Ok(HeartbeatReply {
        timestamp: string_field(obj, "timestamp").unwrap_or_default(),
        message: string_field(obj, "message").unwrap_or_default(),
        received_at: string_field(obj, "receivedAt").unwrap_or_default(),
    })
}

pub fn parse_command(payload: &Value) -> Result<CommandMessage, ValidationError> {
    let obj = object(payload)?;
    let command = string_field(obj, "command")
        .filter(|c| !c.trim().is_empty())
        .ok_or(ValidationError::MissingField("command"))?;
    Ok(CommandMessage {
        drone_id: string_field(obj, "droneId").unwrap_or_default(),
        command,
        timestamp: string_field(obj, "timestamp").unwrap_or_default(),
    })
}

pub fn parse_mission_end(payload: &Value) -> Result<MissionEnd, ValidationError> {
    let obj = object(payload)?;
    Ok(MissionEnd { drone_id: string_field(obj, "droneId").unwrap_or_default() })
}

fn object(payload: &Value) -> Result<&Map<String, Value>, ValidationError> {
    match payload {
        Value::Null => Err(ValidationError::EmptyPayload),
        Value::Object(o) => Ok(o),
        _ => Err(ValidationError::NotAnObject),
    }
}

/// Reads a field as text; numbers and booleans are rendered, null is absent.
pub(crate) fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ----- outbound -----

#[derive(Debug, Clone, Serialize)]
pub struct Heartbeat {
    pub timestamp: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryMessage {
    pub drone_id: String,
    pub telemetry: TelemetrySnapshot,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMessage {
    pub drone_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub drone_id: String,
}
