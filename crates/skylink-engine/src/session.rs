//! Operator channel session: inbound demultiplexing and outbound messages.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use skylink_link::{DuplexChannel, LinkError, LinkEvent, LinkState};
use skylink_proto::message::{
    parse_command, parse_heartbeat_reply, parse_mission_end, AppMessage, Envelope, Heartbeat, HeartbeatReply,
    JoinRoom, TelemetryMessage,
};
use skylink_proto::mission::parse_mission_start;
use skylink_proto::telemetry::TelemetrySnapshot;
use skylink_proto::topics::{self, InboundTopic};
use skylink_proto::stamp;
use skylink_video::FrameSink;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::EngineError;
use crate::logsink::{LogSink, TelemetryPublisher};
use crate::mission::MissionRunner;
use crate::report::{Outcome, Reporter};

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_vehicle_id")]
    pub vehicle_id: String,
    /// Outbound heartbeat interval; 0 disables it.
    #[serde(default)]
    pub ping_interval_ms: u64,
    #[serde(default = "default_startup_message")]
    pub startup_message: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { vehicle_id: default_vehicle_id(), ping_interval_ms: 0, startup_message: default_startup_message() }
    }
}

fn default_vehicle_id() -> String { "1".into() }
fn default_startup_message() -> String { "Drone app started and connected".into() }

/// Typed outbound messages for one vehicle. Nothing is queued while the
/// channel is down.
pub struct OutboundPublisher {
    channel: Arc<dyn DuplexChannel>,
    vehicle_id: String,
}

impl OutboundPublisher {
    pub fn new(channel: Arc<dyn DuplexChannel>, vehicle_id: impl Into<String>) -> Self {
        Self { channel, vehicle_id: vehicle_id.into() }
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    pub fn join_room(&self) -> Result<(), EngineError> {
        self.emit(topics::JOIN_ROOM, &JoinRoom { drone_id: self.vehicle_id.clone() })
    }

    pub fn announce(&self, message: &str) -> Result<(), EngineError> {
        self.emit(
            topics::APP_MESSAGE,
            &AppMessage {
                drone_id: self.vehicle_id.clone(),
                message: message.to_string(),
                kind: "app_startup".into(),
                timestamp: now_wire(),
            },
        )
    }

    pub fn ping(&self) -> Result<(), EngineError> {
        self.emit(topics::HEARTBEAT, &Heartbeat { timestamp: now_wire(), message: "PING from skylink".into() })
    }

    fn emit<T: Serialize>(&self, topic: &str, payload: &T) -> Result<(), EngineError> {
        if !self.channel.is_connected() {
            return Err(LinkError::NotConnected.into());
        }
        let value = serde_json::to_value(payload).map_err(LinkError::from)?;
        self.channel.publish(topic, value)?;
        Ok(())
    }
}

impl TelemetryPublisher for OutboundPublisher {
    fn publish(&self, snapshot: &TelemetrySnapshot) -> Result<(), EngineError> {
        self.emit(
            topics::TELEMETRY,
            &TelemetryMessage {
                drone_id: self.vehicle_id.clone(),
                telemetry: snapshot.clone(),
                timestamp: now_wire(),
            },
        )
    }
}

impl FrameSink for OutboundPublisher {
    fn frame(&self, data: Bytes) {
        if !self.channel.is_connected() {
            return;
        }
        if let Err(e) = self.channel.publish_binary(topics::VIDEO_FRAME, data) {
            debug!("session: video frame dropped: {}", e);
        }
    }
}

fn now_wire() -> String {
    stamp::wire(OffsetDateTime::now_utc())
}

pub type PongListener = Arc<dyn Fn(&HeartbeatReply) + Send + Sync>;

pub struct Session {
    cfg: SessionConfig,
    outbound: Arc<OutboundPublisher>,
    dispatcher: Arc<Dispatcher>,
    missions: MissionRunner,
    log: Arc<LogSink>,
    reporter: Arc<dyn Reporter>,
    pong_listener: Mutex<Option<PongListener>>,
    state: Mutex<LinkState>,
    /// Resolves once the most recently accepted command has finished.
    last_command: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Session {
    pub fn new(
        cfg: SessionConfig,
        outbound: Arc<OutboundPublisher>,
        dispatcher: Arc<Dispatcher>,
        missions: MissionRunner,
        log: Arc<LogSink>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            cfg,
            outbound,
            dispatcher,
            missions,
            log,
            reporter,
            pong_listener: Mutex::new(None),
            state: Mutex::new(LinkState::Disconnected),
            last_command: Mutex::new(None),
        }
    }

    pub fn set_pong_listener(&self, listener: PongListener) {
        *self.pong_listener.lock() = Some(listener);
    }

    pub fn state(&self) -> LinkState {
        *self.state.lock()
    }

    pub fn outbound(&self) -> &Arc<OutboundPublisher> {
        &self.outbound
    }

    /// Consumes channel events until the channel goes away.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
        let mut ping = (self.cfg.ping_interval_ms > 0).then(|| {
            let mut iv = tokio::time::interval(Duration::from_millis(self.cfg.ping_interval_ms));
            iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
            iv
        });

        loop {
            tokio::select! {
                ev = events.recv() => match ev {
                    Some(ev) => {
                        self.handle(ev);
                    }
                    None => break,
                },
                _ = next_tick(&mut ping) => {
                    if self.state() == LinkState::Connected {
                        match self.outbound.ping() {
                            Ok(()) => debug!("session: ping sent"),
                            Err(e) => debug!("session: ping not sent: {}", e),
                        }
                    }
                }
            }
        }
        info!("session: channel closed");
    }

    /// Handles one event. Mission and link transitions are applied before
    /// this returns. Commands run on their own task, one after another in
    /// arrival order; that task is returned.
    pub fn handle(self: &Arc<Self>, ev: LinkEvent) -> Option<JoinHandle<()>> {
        match ev {
            LinkEvent::StateChanged(s) => {
                self.on_state(s);
                None
            }
            LinkEvent::Message(env) => self.on_message(env),
        }
    }

    fn on_state(&self, next: LinkState) {
        let prev = std::mem::replace(&mut *self.state.lock(), next);
        if prev == next {
            return;
        }
        match next {
            LinkState::Connected => {
                info!("session: connected");
                if let Err(e) = self.outbound.join_room() {
                    warn!("session: join room failed: {}", e);
                } else {
                    info!("session: joined room for vehicle {}", self.outbound.vehicle_id());
                }
                if let Err(e) = self.outbound.announce(&self.cfg.startup_message) {
                    warn!("session: startup announcement failed: {}", e);
                }
            }
            LinkState::Connecting => debug!("session: connecting"),
            LinkState::Disconnected => warn!("session: disconnected"),
        }
    }

    fn on_message(self: &Arc<Self>, env: Envelope) -> Option<JoinHandle<()>> {
        let Some(topic) = InboundTopic::from_name(&env.event) else {
            debug!("session: ignoring event {:?}", env.event);
            return None;
        };
        let source = topic.name();

        match topic {
            InboundTopic::HeartbeatReply => {
                match parse_heartbeat_reply(&env.data) {
                    Ok(reply) => self.on_pong(&reply),
                    Err(e) => self.reporter.report(source, &Outcome::Failed(e.into())),
                }
                None
            }
            InboundTopic::Command => match parse_command(&env.data) {
                Ok(cmd) => {
                    info!("session: command {} for vehicle {:?}", cmd.command, cmd.drone_id);
                    let d = self.dispatcher.clone();
                    Some(self.spawn_in_order(source, async move { d.dispatch(&cmd.command, &cmd.drone_id).await }))
                }
                Err(e) => {
                    self.reporter.report(source, &Outcome::Failed(e.into()));
                    None
                }
            },
            InboundTopic::MissionStart => {
                let outcome = match parse_mission_start(&env.data) {
                    Ok(m) => {
                        info!("session: mission start for {:?} with {} waypoints", m.vehicle_id, m.waypoints.len());
                        match self.missions.start(m.vehicle_id, m.waypoints) {
                            Ok(n) => Outcome::Completed(format!("mission started with {} waypoints", n)),
                            Err(e) => Outcome::Failed(e),
                        }
                    }
                    Err(e) => Outcome::Failed(e.into()),
                };
                self.reporter.report(source, &outcome);
                None
            }
            InboundTopic::MissionEnd => {
                let outcome = match parse_mission_end(&env.data) {
                    Ok(end) => {
                        info!("session: mission end for {:?}", end.drone_id);
                        match self.missions.end() {
                            Some(f) => Outcome::Completed(format!(
                                "mission for {} ended at waypoint {}/{}",
                                f.vehicle_id, f.cursor, f.total
                            )),
                            None => Outcome::NoOp("no active mission".into()),
                        }
                    }
                    Err(e) => Outcome::Failed(e.into()),
                };
                self.reporter.report(source, &outcome);
                None
            }
        }
    }

    fn on_pong(&self, reply: &HeartbeatReply) {
        info!("session: pong timestamp={} message={}", reply.timestamp, reply.message);
        self.log.note(&format!(
            "PONG - timestamp: {}, receivedAt: {}, message: {}",
            reply.timestamp, reply.received_at, reply.message
        ));
        let listener = self.pong_listener.lock().clone();
        if let Some(l) = listener {
            l(reply);
        }
    }

    /// Runs `fut` on its own task once the previously accepted handler has
    /// finished, and reports what it produced. A panic in the handler is
    /// reported instead of taking the session down.
    fn spawn_in_order<F>(&self, source: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let (done, next) = oneshot::channel();
        let previous = self.last_command.lock().replace(next);
        let reporter = self.reporter.clone();
        tokio::spawn(async move {
            if let Some(previous) = previous {
                // a dropped sender means that handler is gone as well
                let _ = previous.await;
            }
            let outcome = match tokio::spawn(fut).await {
                Ok(o) => o,
                Err(e) => Outcome::Failed(EngineError::Internal(e.to_string())),
            };
            reporter.report(source, &outcome);
            let _ = done.send(());
        })
    }
}

async fn next_tick(iv: &mut Option<Interval>) {
    match iv {
        Some(iv) => {
            iv.tick().await;
        }
        None => std::future::pending().await,
    }
}
