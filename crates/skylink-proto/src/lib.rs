pub mod command;
pub mod error;
pub mod message;
pub mod mission;
pub mod stamp;
pub mod telemetry;
pub mod topics;

pub use error::ValidationError;
