//! Event names used on the ground-server channel.

pub const HEARTBEAT: &str = "ping";
pub const HEARTBEAT_REPLY: &str = "pong";
pub const COMMAND: &str = "drone:command";
pub const MISSION_START: &str = "mission:start";
pub const MISSION_END: &str = "mission:end";
pub const TELEMETRY: &str = "telemetry:data";
pub const APP_MESSAGE: &str = "app:message";
pub const JOIN_ROOM: &str = "join:drone";
pub const VIDEO_FRAME: &str = "video:frame";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTopic {
    HeartbeatReply,
    Command,
    MissionStart,
    MissionEnd,
}

impl InboundTopic {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            HEARTBEAT_REPLY => Some(Self::HeartbeatReply),
            COMMAND => Some(Self::Command),
            MISSION_START => Some(Self::MissionStart),
            MISSION_END => Some(Self::MissionEnd),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::HeartbeatReply => HEARTBEAT_REPLY,
            Self::Command => COMMAND,
            Self::MissionStart => MISSION_START,
            Self::MissionEnd => MISSION_END,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_names_resolve_both_ways() {
        for t in [InboundTopic::HeartbeatReply, InboundTopic::Command, InboundTopic::MissionStart, InboundTopic::MissionEnd] {
            assert_eq!(InboundTopic::from_name(t.name()), Some(t));
        }
        assert_eq!(InboundTopic::from_name(TELEMETRY), None);
    }
}
