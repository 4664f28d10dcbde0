use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Operator command vocabulary accepted on the command topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Takeoff,
    Land,
    MoveForward,
    MoveBackward,
    StopMovement,
    StartVideoStream,
    StopVideoStream,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown command `{0}`")]
pub struct UnknownCommand(pub String);

impl Command {
    pub const ALL: [Command; 7] = [
        Command::Takeoff,
        Command::Land,
        Command::MoveForward,
        Command::MoveBackward,
        Command::StopMovement,
        Command::StartVideoStream,
        Command::StopVideoStream,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Takeoff => "TAKEOFF",
            Command::Land => "LAND",
            Command::MoveForward => "MOVE_FORWARD",
            Command::MoveBackward => "MOVE_BACKWARD",
            Command::StopMovement => "STOP_MOVEMENT",
            Command::StartVideoStream => "START_VIDEO_STREAM",
            Command::StopVideoStream => "STOP_VIDEO_STREAM",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Command::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_case_insensitively() {
        assert_eq!("takeoff".parse::<Command>(), Ok(Command::Takeoff));
        assert_eq!("Move_Forward".parse::<Command>(), Ok(Command::MoveForward));
        assert_eq!(" STOP_VIDEO_STREAM ".parse::<Command>(), Ok(Command::StopVideoStream));
    }

    #[test]
    fn rejects_unknown() {
        assert_eq!("barrel_roll".parse::<Command>(), Err(UnknownCommand("barrel_roll".into())));
        assert!("".parse::<Command>().is_err());
    }
}
