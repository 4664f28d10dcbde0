use std::sync::Arc;

use skylink_fc::motion::{Direction, Envelope, MotionController};
use skylink_fc::VehicleActuator;
use skylink_proto::command::{Command, UnknownCommand};
use skylink_video::{FrameSink, StreamingCapability};
use tracing::debug;

use crate::error::EngineError;
use crate::report::Outcome;

/// Routes operator commands to the vehicle, the motion controller and video.
pub struct Dispatcher {
    actuator: Arc<dyn VehicleActuator>,
    motion: MotionController,
    video: Arc<dyn StreamingCapability>,
    frames: Arc<dyn FrameSink>,
}

impl Dispatcher {
    pub fn new(
        actuator: Arc<dyn VehicleActuator>,
        motion: MotionController,
        video: Arc<dyn StreamingCapability>,
        frames: Arc<dyn FrameSink>,
    ) -> Self {
        Self { actuator, motion, video, frames }
    }

    pub fn motion(&self) -> &MotionController {
        &self.motion
    }

    pub fn video(&self) -> &Arc<dyn StreamingCapability> {
        &self.video
    }

    /// Command names match case-insensitively. Unknown names are reported and
    /// touch nothing.
    pub async fn dispatch(&self, name: &str, vehicle_id: &str) -> Outcome {
        let cmd = match name.parse::<Command>() {
            Ok(c) => c,
            Err(UnknownCommand(n)) => return Outcome::Failed(EngineError::UnsupportedCommand(n)),
        };
        debug!("dispatch: {} for vehicle {:?}", cmd, vehicle_id);
        match self.run(cmd).await {
            Ok(done) => Outcome::Completed(format!("{}: {}", cmd, done)),
            Err(EngineError::Superseded(what)) => Outcome::NoOp(format!("{}: {}", cmd, what)),
            Err(e) => Outcome::Failed(e),
        }
    }

    async fn run(&self, cmd: Command) -> Result<String, EngineError> {
        let fraction = self.motion.config().magnitude_fraction;
        let done = match cmd {
            Command::Takeoff => {
                self.actuator.takeoff().await?;
                "takeoff started".to_string()
            }
            Command::Land => {
                self.actuator.land().await?;
                // the vehicle leaves the velocity-control mode when it lands
                self.motion.reset_control_mode();
                "landing started".to_string()
            }
            Command::MoveForward => moving(self.motion.move_toward(Direction::Forward, fraction).await?),
            Command::MoveBackward => moving(self.motion.move_toward(Direction::Backward, fraction).await?),
            Command::StopMovement => {
                self.motion.stop()?;
                "stopped".to_string()
            }
            Command::StartVideoStream => {
                self.video.start(self.frames.clone()).await?;
                "video streaming".to_string()
            }
            Command::StopVideoStream => {
                self.video.stop().await?;
                "video stopped".to_string()
            }
        };
        Ok(done)
    }
}

fn moving(e: Envelope) -> String {
    format!("moving at {:.2} m/s (lateral {:.2})", e.longitudinal, e.lateral)
}
