use skylink_fc::motion::MotionError;
use skylink_fc::ActuatorError;
use skylink_link::LinkError;
use skylink_proto::ValidationError;
use skylink_video::StreamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid payload: {0}")]
    Validation(#[from] ValidationError),
    #[error("unsupported command `{0}`")]
    UnsupportedCommand(String),
    #[error("actuator: {0}")]
    Actuator(#[from] ActuatorError),
    #[error("waypoint {index}: {source}")]
    Waypoint {
        index: usize,
        #[source]
        source: ActuatorError,
    },
    #[error("control mode refused: {0}")]
    ControlMode(ActuatorError),
    #[error("video: {0}")]
    Streaming(#[from] StreamError),
    #[error("transport unavailable: {0}")]
    TransportUnavailable(#[from] LinkError),
    #[error("persistence: {0}")]
    Persistence(#[from] std::io::Error),
    /// Dropped because a later command overtook it.
    #[error("superseded: {0}")]
    Superseded(String),
    #[error("handler aborted: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::UnsupportedCommand(_) => "unsupported-command",
            Self::Actuator(_) | Self::Waypoint { .. } | Self::ControlMode(_) => "actuator",
            Self::Streaming(_) => "streaming",
            Self::TransportUnavailable(_) => "transport",
            Self::Persistence(_) => "persistence",
            Self::Superseded(_) => "superseded",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<MotionError> for EngineError {
    fn from(e: MotionError) -> Self {
        match e {
            MotionError::Validation(v) => Self::Validation(v),
            MotionError::ControlMode(a) => Self::ControlMode(a),
            MotionError::Actuator(a) => Self::Actuator(a),
            MotionError::Superseded => Self::Superseded("move dropped while control mode was being enabled".into()),
        }
    }
}
