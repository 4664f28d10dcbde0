use thiserror::Error;

/// Rejection of an inbound payload at the wire boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("payload is empty")]
    EmptyPayload,
    #[error("payload is not an object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("mission has no waypoints")]
    NoWaypoints,
    #[error("waypoint {index}: {reason}")]
    Waypoint { index: usize, reason: String },
    #[error("magnitude fraction {0} outside (0, 1]")]
    Magnitude(f32),
}
