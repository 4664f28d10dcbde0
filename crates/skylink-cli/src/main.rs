use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use skylink_engine::logsink::TelemetryConfig;
use skylink_engine::mission::MissionConfig;
use skylink_engine::session::SessionConfig;
use skylink_engine::{doctor as engine_doctor, journal::Journal, Collaborators, Engine, EngineConfig};
use skylink_fc::mav::MavActuator;
use skylink_fc::motion::MotionConfig;
use skylink_fc::sim::SimActuator;
use skylink_fc::state::{copter_mode_name, FcStatus};
use skylink_fc::{doctor as fc_doctor, FcConfig, FcKind, VehicleActuator};
use skylink_link::{doctor as uplink_doctor, Uplink, UplinkConfig};
use skylink_video::{doctor as video_doctor, ProcessStreamer, VideoConfig};

#[derive(Debug, Parser)]
#[command(name = "skylink", version, about = "SKYLINK - remote operator link for a companion computer")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration without touching hardware.
    Doctor,
    Run,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    uplink: UplinkConfig,

    #[serde(default)]
    fc: FcConfig,
    #[serde(default)]
    motion: MotionConfig,
    #[serde(default)]
    video: VideoConfig,
    #[serde(default)]
    session: SessionConfig,
    #[serde(default)]
    telemetry: TelemetryConfig,
    #[serde(default)]
    mission: MissionConfig,
}

impl Config {
    fn engine(&self) -> EngineConfig {
        EngineConfig {
            session: self.session.clone(),
            telemetry: self.telemetry.clone(),
            mission: self.mission.clone(),
            motion: self.motion.clone(),
        }
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(&cfg).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    fc_doctor::check_fc(&cfg.fc)?;
    fc_doctor::check_motion(&cfg.motion)?;
    uplink_doctor::check_uplink(&cfg.uplink)?;
    video_doctor::check_video(&cfg.video).or_else(|e| {
        warn!("video not available: {:#}", e);
        Ok::<(), anyhow::Error>(())
    })?;
    engine_doctor::check_session(&cfg.session)?;
    engine_doctor::check_telemetry(&cfg.telemetry)?;
    engine_doctor::check_mission(&cfg.mission)?;

    info!("doctor: OK");
    Ok(())
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");

    let (feed_tx, feed_rx) = mpsc::unbounded_channel();
    let (actuator, fc_status): (Arc<dyn VehicleActuator>, Option<Arc<Mutex<FcStatus>>>) = match cfg.fc.kind {
        FcKind::Sim => {
            info!("run: using the simulated flight controller");
            let sim = SimActuator::new().with_feed(feed_tx).with_travel_time(Duration::from_secs(3));
            (Arc::new(sim), None)
        }
        FcKind::Mavlink => {
            let (fc, status) = MavActuator::open(&cfg.fc, feed_tx).context("FC open")?;
            (Arc::new(fc), Some(status))
        }
    };

    let (uplink, events) = Uplink::start(cfg.uplink.clone()).context("uplink start")?;
    let uplink = Arc::new(uplink);
    let video = Arc::new(ProcessStreamer::new(cfg.video.clone()));
    let journal = Journal::open_daily(&cfg.telemetry.dir, &cfg.telemetry.file_prefix)
        .with_context(|| format!("open telemetry journal in {}", cfg.telemetry.dir.display()))?;

    let engine = Engine::new(
        cfg.engine(),
        Collaborators { actuator, channel: uplink.clone(), video, journal, reporter: None },
    );
    engine.start(events, feed_rx);

    let status_task = fc_status.map(|status| tokio::spawn(log_fc_status(status)));

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("run: stopping");

    if let Some(t) = status_task {
        t.abort();
    }
    engine.shutdown().await;
    uplink.close();
    info!("run: stopped");
    Ok(())
}

async fn log_fc_status(status: Arc<Mutex<FcStatus>>) {
    let mut iv = tokio::time::interval(Duration::from_secs(30));
    loop {
        iv.tick().await;
        let st = status.lock().clone();
        match st.hb_age() {
            Some(age) => info!(
                "fc: connected={} armed={} mode={} hb_age={:.1}s",
                st.connected,
                st.armed,
                st.custom_mode.map(copter_mode_name).unwrap_or_else(|| "?".into()),
                age.as_secs_f32()
            ),
            None => warn!("fc: no heartbeat yet on {}", st.connection.as_deref().unwrap_or("?")),
        }
    }
}
