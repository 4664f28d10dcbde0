use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use skylink_fc::motion::{MotionConfig, MotionController};
use skylink_fc::VehicleActuator;
use skylink_link::{DuplexChannel, LinkEvent};
use skylink_proto::telemetry::TelemetryUpdate;
use skylink_video::StreamingCapability;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::dispatch::Dispatcher;
use crate::journal::Journal;
use crate::logsink::{LogSink, TelemetryConfig, TelemetryPublisher};
use crate::mission::{MissionConfig, MissionRunner};
use crate::report::{JournalReporter, Reporter, Tee};
use crate::session::{OutboundPublisher, Session, SessionConfig};
use crate::telemetry::TelemetryAggregator;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub mission: MissionConfig,
    #[serde(default)]
    pub motion: MotionConfig,
}

/// Capabilities the engine drives; all are shared handles.
pub struct Collaborators {
    pub actuator: Arc<dyn VehicleActuator>,
    pub channel: Arc<dyn DuplexChannel>,
    pub video: Arc<dyn StreamingCapability>,
    pub journal: Journal,
    /// Receives outcomes in addition to the journal.
    pub reporter: Option<Arc<dyn Reporter>>,
}

/// Everything that belongs to one vehicle session.
pub struct Engine {
    cfg: EngineConfig,
    aggregator: TelemetryAggregator,
    log: Arc<LogSink>,
    missions: MissionRunner,
    dispatcher: Arc<Dispatcher>,
    session: Arc<Session>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(cfg: EngineConfig, c: Collaborators) -> Arc<Self> {
        let journal_reporter: Arc<dyn Reporter> = Arc::new(JournalReporter::new(c.journal.clone()));
        let reporter: Arc<dyn Reporter> = match c.reporter {
            Some(extra) => Arc::new(Tee(vec![journal_reporter, extra])),
            None => journal_reporter,
        };

        let outbound = Arc::new(OutboundPublisher::new(c.channel, cfg.session.vehicle_id.clone()));
        let publisher: Arc<dyn TelemetryPublisher> = outbound.clone();
        let log = Arc::new(LogSink::new(c.journal, Some(publisher)));

        let motion = MotionController::new(c.actuator.clone(), cfg.motion.clone());
        let dispatcher = Arc::new(Dispatcher::new(c.actuator.clone(), motion, c.video, outbound.clone()));
        let missions = MissionRunner::new(c.actuator, cfg.mission.clone(), reporter.clone());
        let session = Arc::new(Session::new(
            cfg.session.clone(),
            outbound,
            dispatcher.clone(),
            missions.clone(),
            log.clone(),
            reporter,
        ));

        Arc::new(Self {
            cfg,
            aggregator: TelemetryAggregator::new(),
            log,
            missions,
            dispatcher,
            session,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawns the session, the vehicle-state feed and the periodic recorder.
    pub fn start(
        self: &Arc<Self>,
        events: mpsc::UnboundedReceiver<LinkEvent>,
        feed: mpsc::UnboundedReceiver<TelemetryUpdate>,
    ) {
        self.log.note("Application started - telemetry logging initialized");
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(self.session.clone().run(events)));
        tasks.push(tokio::spawn(pump_feed(
            self.aggregator.clone(),
            self.log.clone(),
            self.cfg.telemetry.force_on_update,
            feed,
        )));
        if self.cfg.telemetry.periodic_ms > 0 {
            tasks.push(tokio::spawn(periodic(
                self.aggregator.clone(),
                self.log.clone(),
                Duration::from_millis(self.cfg.telemetry.periodic_ms),
            )));
        }
        info!("engine: started for vehicle {}", self.cfg.session.vehicle_id);
    }

    pub fn aggregator(&self) -> &TelemetryAggregator {
        &self.aggregator
    }

    pub fn log(&self) -> &Arc<LogSink> {
        &self.log
    }

    pub fn missions(&self) -> &MissionRunner {
        &self.missions
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Ends any mission, stops video and motion, and closes the journal.
    pub async fn shutdown(&self) {
        info!("engine: shutting down");
        for t in self.tasks.lock().drain(..) {
            t.abort();
        }
        if let Some(f) = self.missions.end() {
            info!("engine: mission for {} ended at waypoint {}/{}", f.vehicle_id, f.cursor, f.total);
        }
        self.missions.settled().await;
        if let Err(e) = self.dispatcher.video().stop().await {
            warn!("engine: stopping video: {}", e);
        }
        if let Err(e) = self.dispatcher.motion().stop() {
            warn!("engine: neutralizing motion: {}", e);
        }
        self.log.journal().close("Application stopped - Telemetry logging ended").await;
    }
}

async fn pump_feed(
    aggregator: TelemetryAggregator,
    log: Arc<LogSink>,
    force: bool,
    mut feed: mpsc::UnboundedReceiver<TelemetryUpdate>,
) {
    while let Some(u) = feed.recv().await {
        aggregator.update(u);
        log.record(&aggregator.snapshot(), force);
    }
}

async fn periodic(aggregator: TelemetryAggregator, log: Arc<LogSink>, every: Duration) {
    let mut iv = tokio::time::interval(every);
    iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
    iv.tick().await;
    loop {
        iv.tick().await;
        log.record(&aggregator.snapshot(), false);
    }
}
