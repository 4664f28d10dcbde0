pub mod dispatch;
pub mod doctor;
pub mod engine;
pub mod error;
pub mod journal;
pub mod logsink;
pub mod mission;
pub mod report;
pub mod session;
pub mod telemetry;

pub use engine::{Collaborators, Engine, EngineConfig};
pub use error::EngineError;
pub use report::Outcome;
