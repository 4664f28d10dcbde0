pub mod doctor;
pub mod geo;
pub mod mav;
pub mod motion;
pub mod safety;
pub mod sim;
pub mod state;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate3D {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above home.
    pub altitude: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActuatorError {
    #[error("flight controller not ready: {0}")]
    NotReady(String),
    #[error("{command} rejected by flight controller: {result}")]
    Rejected { command: &'static str, result: String },
    #[error("{0} not acknowledged in time")]
    Timeout(&'static str),
    #[error("{0} cancelled")]
    Cancelled(&'static str),
    #[error("{0} rate-limited")]
    RateLimited(&'static str),
    #[error("link: {0}")]
    Link(String),
}

/// Flight-control capability the engine drives. Async operations resolve
/// when the vehicle confirms (or refuses) the request.
#[async_trait]
pub trait VehicleActuator: Send + Sync {
    async fn takeoff(&self) -> Result<(), ActuatorError>;
    async fn land(&self) -> Result<(), ActuatorError>;
    /// Switch into the mode that accepts velocity envelopes.
    async fn enable_control_mode(&self) -> Result<(), ActuatorError>;
    /// Body-frame velocities in m/s; lateral is positive right, longitudinal positive forward.
    fn set_velocity_envelope(&self, lateral: f32, longitudinal: f32) -> Result<(), ActuatorError>;
    async fn fly_to(
        &self,
        target: Coordinate3D,
        max_speed: f32,
        safety_height: f32,
    ) -> Result<(), ActuatorError>;
    async fn stop_fly_to(&self) -> Result<(), ActuatorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FcKind {
    #[default]
    Mavlink,
    Sim,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcConfig {
    #[serde(default)]
    pub kind: FcKind,

    /// MAVLink connection URL, e.g. "serial:/dev/ttyAMA0:57600" or "udpin:0.0.0.0:14550".
    pub connection: Option<String>,

    /// MAVLink ids we use (companion side)
    #[serde(default = "default_sys_id")]
    pub sys_id: u8,
    #[serde(default = "default_comp_id")]
    pub comp_id: u8,

    /// target system/component (FC side). 1/1 is common for ArduPilot.
    #[serde(default = "default_target")]
    pub target_sys: u8,
    #[serde(default = "default_target")]
    pub target_comp: u8,

    /// Require seeing FC heartbeat before sending commands
    #[serde(default = "default_true")]
    pub require_heartbeat: bool,

    /// Companion heartbeat rate. Default 1 Hz.
    pub send_heartbeat_hz: Option<f32>,

    /// Custom mode number that accepts guided/velocity commands (ArduCopter GUIDED = 4).
    #[serde(default = "default_guided_mode")]
    pub guided_mode: u32,

    #[serde(default = "default_takeoff_alt")]
    pub takeoff_alt_m: f32,

    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,

    /// Horizontal distance at which a fly-to counts as arrived.
    #[serde(default = "default_arrival_radius")]
    pub arrival_radius_m: f64,

    #[serde(default = "default_fly_to_timeout")]
    pub fly_to_timeout_s: u64,

    /// Minimum spacing between two takeoff (or two land) requests.
    #[serde(default = "default_command_interval")]
    pub command_min_interval_ms: u64,
}

impl Default for FcConfig {
    fn default() -> Self {
        Self {
            kind: FcKind::default(),
            connection: None,
            sys_id: default_sys_id(),
            comp_id: default_comp_id(),
            target_sys: default_target(),
            target_comp: default_target(),
            require_heartbeat: true,
            send_heartbeat_hz: None,
            guided_mode: default_guided_mode(),
            takeoff_alt_m: default_takeoff_alt(),
            ack_timeout_ms: default_ack_timeout(),
            arrival_radius_m: default_arrival_radius(),
            fly_to_timeout_s: default_fly_to_timeout(),
            command_min_interval_ms: default_command_interval(),
        }
    }
}

fn default_sys_id() -> u8 { 245 }
fn default_comp_id() -> u8 { 191 }
fn default_target() -> u8 { 1 }
fn default_true() -> bool { true }
fn default_guided_mode() -> u32 { 4 }
fn default_takeoff_alt() -> f32 { 10.0 }
fn default_ack_timeout() -> u64 { 3000 }
fn default_arrival_radius() -> f64 { 2.0 }
fn default_fly_to_timeout() -> u64 { 300 }
fn default_command_interval() -> u64 { 2000 }
