use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavFrame, MavMessage, MavModeFlag, MavResult, MavState, MavType,
        PositionTargetTypemask, COMMAND_INT_DATA, COMMAND_LONG_DATA, GLOBAL_POSITION_INT_DATA,
        HEARTBEAT_DATA, SET_POSITION_TARGET_LOCAL_NED_DATA,
    },
    MavConnection, MavHeader,
};
use parking_lot::Mutex;
use skylink_proto::telemetry::TelemetryUpdate;
use tokio::sync::{mpsc, oneshot};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::geo::haversine_m;
use crate::safety::{CommandRateLimit, Guarded};
use crate::state::{copter_mode_name, FcStatus};
use crate::{ActuatorError, Coordinate3D, FcConfig, VehicleActuator};

// velocity-only setpoint: ignore position, acceleration, yaw and yaw rate
const VELOCITY_ONLY_MASK: u16 = 0b0000_1101_1100_0111;
const ALTITUDE_TOLERANCE_M: f64 = 1.0;
const ARRIVAL_POLL: Duration = Duration::from_millis(200);

/// Splits a `serial:<dev>:<baud>` connection string. Other schemes yield `None`.
pub fn serial_device(url: &str) -> Result<Option<(&str, u32)>> {
    let Some(rest) = url.strip_prefix("serial:") else {
        return Ok(None);
    };
    let (dev, baud) = rest.rsplit_once(':').context("serial url must be serial:<dev>:<baud>")?;
    anyhow::ensure!(!dev.is_empty(), "serial url has no device");
    let baud: u32 = baud.parse().with_context(|| format!("serial baud {:?}", baud))?;
    Ok(Some((dev, baud)))
}

/// MAVLink-backed flight controller (ArduPilot-style GUIDED control).
#[derive(Clone)]
pub struct MavActuator {
    inner: Arc<Inner>,
}

struct Inner {
    conn: Box<dyn MavConnection<MavMessage> + Send + Sync>,
    hdr: Mutex<MavHeader>,
    cfg: FcConfig,
    status: Arc<Mutex<FcStatus>>,
    acks: Mutex<HashMap<u32, oneshot::Sender<MavResult>>>,
    limiter: Mutex<CommandRateLimit>,
    fly_to_gen: AtomicU64,
}

impl MavActuator {
    /// Opens the link and starts the reader thread, which pushes vehicle
    /// state into `feed` until the receiving side is dropped.
    pub fn open(
        cfg: &FcConfig,
        feed: mpsc::UnboundedSender<TelemetryUpdate>,
    ) -> Result<(Self, Arc<Mutex<FcStatus>>)> {
        let url = cfg.connection.clone().context("fc.connection missing")?;

        if let Some((dev, baud)) = serial_device(&url)? {
            // Opened once so a missing or busy device fails with its own path.
            // The port and its exclusive lock are released before mavlink
            // opens the device again below.
            let port = tokio_serial::new(dev, baud)
                .open_native_async()
                .with_context(|| format!("open fc serial device {}", dev))?;
            drop(port);
        }

        let conn = mavlink::connect::<MavMessage>(&url)
            .with_context(|| format!("mavlink connect {}", url))?;

        let status = Arc::new(Mutex::new(FcStatus {
            connection: Some(url.clone()),
            ..FcStatus::default()
        }));

        let inner = Arc::new(Inner {
            conn,
            hdr: Mutex::new(MavHeader { system_id: cfg.sys_id, component_id: cfg.comp_id, sequence: 0 }),
            cfg: cfg.clone(),
            status: status.clone(),
            acks: Mutex::new(HashMap::new()),
            limiter: Mutex::new(CommandRateLimit::new(Duration::from_millis(cfg.command_min_interval_ms))),
            fly_to_gen: AtomicU64::new(0),
        });

        // recv() blocks; keep it off the runtime
        let reader = inner.clone();
        std::thread::Builder::new()
            .name("fc-reader".into())
            .spawn(move || reader.read_loop(feed))
            .context("spawn fc reader")?;

        let hb_hz = cfg.send_heartbeat_hz.unwrap_or(1.0).max(0.2);
        let beat = inner.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs_f32(1.0 / hb_hz));
            loop {
                tick.tick().await;
                if let Err(e) = beat.send_heartbeat() {
                    debug!("fc: companion heartbeat failed: {}", e);
                }
            }
        });

        info!("fc: link open on {}", url);
        Ok((Self { inner }, status))
    }

    fn ready(&self, what: &str) -> Result<(), ActuatorError> {
        if self.inner.cfg.require_heartbeat && self.inner.status.lock().last_heartbeat.is_none() {
            return Err(ActuatorError::NotReady(format!("refusing {}: no heartbeat seen yet", what)));
        }
        Ok(())
    }

    fn position(&self) -> Option<Coordinate3D> {
        self.inner.status.lock().position
    }

    async fn command_long(
        &self,
        name: &'static str,
        command: MavCmd,
        p: [f32; 7],
    ) -> Result<(), ActuatorError> {
        let msg = MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            target_system: self.inner.cfg.target_sys,
            target_component: self.inner.cfg.target_comp,
            command,
            confirmation: 0,
            param1: p[0],
            param2: p[1],
            param3: p[2],
            param4: p[3],
            param5: p[4],
            param6: p[5],
            param7: p[6],
        });
        self.send_and_ack(name, command, msg).await
    }

    async fn send_and_ack(
        &self,
        name: &'static str,
        command: MavCmd,
        msg: MavMessage,
    ) -> Result<(), ActuatorError> {
        let key = command as u32;
        let (tx, rx) = oneshot::channel();
        self.inner.acks.lock().insert(key, tx);

        if let Err(e) = self.inner.send(&msg) {
            self.inner.acks.lock().remove(&key);
            return Err(e);
        }
        debug!("FC: sent {}", name);

        let timeout = Duration::from_millis(self.inner.cfg.ack_timeout_ms);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(MavResult::MAV_RESULT_ACCEPTED)) | Ok(Ok(MavResult::MAV_RESULT_IN_PROGRESS)) => Ok(()),
            Ok(Ok(other)) => Err(ActuatorError::Rejected { command: name, result: format!("{:?}", other) }),
            // a newer request for the same command took over the ack slot
            Ok(Err(_)) => Err(ActuatorError::Cancelled(name)),
            Err(_) => {
                self.inner.acks.lock().remove(&key);
                Err(ActuatorError::Timeout(name))
            }
        }
    }

    async fn set_mode(&self, name: &'static str, custom_mode: u32) -> Result<(), ActuatorError> {
        if self.inner.status.lock().custom_mode == Some(custom_mode) {
            return Ok(());
        }
        // param1 = MAV_MODE_FLAG_CUSTOM_MODE_ENABLED
        self.command_long(
            name,
            MavCmd::MAV_CMD_DO_SET_MODE,
            [1.0, custom_mode as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    async fn reposition(&self, target: Coordinate3D, max_speed: f32) -> Result<(), ActuatorError> {
        let msg = MavMessage::COMMAND_INT(COMMAND_INT_DATA {
            target_system: self.inner.cfg.target_sys,
            target_component: self.inner.cfg.target_comp,
            frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
            command: MavCmd::MAV_CMD_DO_REPOSITION,
            current: 0,
            autocontinue: 0,
            param1: max_speed,
            // MAV_DO_REPOSITION_FLAGS_CHANGE_MODE
            param2: 1.0,
            param3: 0.0,
            param4: f32::NAN,
            x: (target.latitude * 1e7) as i32,
            y: (target.longitude * 1e7) as i32,
            z: target.altitude as f32,
        });
        self.send_and_ack("fly_to", MavCmd::MAV_CMD_DO_REPOSITION, msg).await
    }

    async fn leg(&self, gen: u64, target: Coordinate3D, max_speed: f32) -> Result<(), ActuatorError> {
        self.reposition(target, max_speed).await?;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.inner.cfg.fly_to_timeout_s);
        loop {
            if self.inner.fly_to_gen.load(Ordering::SeqCst) != gen {
                return Err(ActuatorError::Cancelled("fly_to"));
            }
            if let Some(p) = self.position() {
                let d = haversine_m(p.latitude, p.longitude, target.latitude, target.longitude);
                if d <= self.inner.cfg.arrival_radius_m
                    && (p.altitude - target.altitude).abs() <= ALTITUDE_TOLERANCE_M
                {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ActuatorError::Timeout("fly_to"));
            }
            tokio::time::sleep(ARRIVAL_POLL).await;
        }
    }
}

#[async_trait]
impl VehicleActuator for MavActuator {
    async fn takeoff(&self) -> Result<(), ActuatorError> {
        self.ready("takeoff")?;
        if !self.inner.limiter.lock().allow(Guarded::Takeoff) {
            warn!("takeoff rate-limited");
            return Err(ActuatorError::RateLimited("takeoff"));
        }
        self.set_mode("takeoff mode", self.inner.cfg.guided_mode).await?;
        self.command_long("arm", MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .await?;
        info!("FC: sending TAKEOFF to {} m", self.inner.cfg.takeoff_alt_m);
        self.command_long(
            "takeoff",
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, self.inner.cfg.takeoff_alt_m],
        )
        .await
    }

    async fn land(&self) -> Result<(), ActuatorError> {
        self.ready("land")?;
        if !self.inner.limiter.lock().allow(Guarded::Land) {
            warn!("land rate-limited");
            return Err(ActuatorError::RateLimited("land"));
        }
        self.inner.fly_to_gen.fetch_add(1, Ordering::SeqCst);
        info!("FC: sending LAND");
        self.command_long("land", MavCmd::MAV_CMD_NAV_LAND, [0.0; 7]).await
    }

    async fn enable_control_mode(&self) -> Result<(), ActuatorError> {
        self.ready("control mode")?;
        self.set_mode("control mode", self.inner.cfg.guided_mode).await
    }

    fn set_velocity_envelope(&self, lateral: f32, longitudinal: f32) -> Result<(), ActuatorError> {
        let msg = MavMessage::SET_POSITION_TARGET_LOCAL_NED(SET_POSITION_TARGET_LOCAL_NED_DATA {
            time_boot_ms: 0,
            target_system: self.inner.cfg.target_sys,
            target_component: self.inner.cfg.target_comp,
            coordinate_frame: MavFrame::MAV_FRAME_BODY_NED,
            type_mask: PositionTargetTypemask::from_bits_truncate(VELOCITY_ONLY_MASK),
            x: 0.0,
            y: 0.0,
            z: 0.0,
            vx: longitudinal,
            vy: lateral,
            vz: 0.0,
            afx: 0.0,
            afy: 0.0,
            afz: 0.0,
            yaw: 0.0,
            yaw_rate: 0.0,
        });
        self.inner.send(&msg)
    }

    async fn fly_to(
        &self,
        target: Coordinate3D,
        max_speed: f32,
        safety_height: f32,
    ) -> Result<(), ActuatorError> {
        self.ready("fly_to")?;
        let gen = self.inner.fly_to_gen.fetch_add(1, Ordering::SeqCst) + 1;

        // below the safety height: transit high, then settle onto the target
        let safety = safety_height as f64;
        let climb = self.position().map_or(true, |p| p.altitude < safety);
        let transit_alt = if climb { target.altitude.max(safety) } else { target.altitude };

        info!(
            "FC: fly_to lat={} lon={} alt={} (transit {} m)",
            target.latitude, target.longitude, target.altitude, transit_alt
        );
        self.leg(gen, Coordinate3D { altitude: transit_alt, ..target }, max_speed).await?;
        if transit_alt != target.altitude {
            self.leg(gen, target, max_speed).await?;
        }
        Ok(())
    }

    async fn stop_fly_to(&self) -> Result<(), ActuatorError> {
        self.inner.fly_to_gen.fetch_add(1, Ordering::SeqCst);
        info!("FC: sending HOLD/LOITER");
        self.command_long("hold", MavCmd::MAV_CMD_NAV_LOITER_UNLIM, [0.0; 7]).await
    }
}

impl Inner {
    fn send(&self, msg: &MavMessage) -> Result<(), ActuatorError> {
        let hdr = {
            let mut h = self.hdr.lock();
            h.sequence = h.sequence.wrapping_add(1);
            MavHeader { system_id: h.system_id, component_id: h.component_id, sequence: h.sequence }
        };
        self.conn
            .send(&hdr, msg)
            .map(|_| ())
            .map_err(|e| ActuatorError::Link(format!("mavlink send: {}", e)))
    }

    fn send_heartbeat(&self) -> Result<(), ActuatorError> {
        let hb = HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_ONBOARD_CONTROLLER,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        self.send(&MavMessage::HEARTBEAT(hb))
    }

    fn read_loop(&self, feed: mpsc::UnboundedSender<TelemetryUpdate>) {
        while !feed.is_closed() {
            match self.conn.recv() {
                Ok((hdr, msg)) => {
                    if hdr.system_id == self.cfg.target_sys {
                        self.on_message(msg, &feed);
                    }
                }
                Err(e) => {
                    debug!("fc: recv error: {}", e);
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
        info!("fc: reader stopped");
    }

    fn on_message(&self, msg: MavMessage, feed: &mpsc::UnboundedSender<TelemetryUpdate>) {
        // the engine may have shut down; nothing to do about a closed feed here
        let emit = |u: TelemetryUpdate| {
            let _ = feed.send(u);
        };
        match msg {
            MavMessage::HEARTBEAT(h) => {
                let armed = h.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
                {
                    let mut st = self.status.lock();
                    if !st.connected {
                        info!("fc: heartbeat from system {}", self.cfg.target_sys);
                    }
                    st.connected = true;
                    st.last_heartbeat = Some(std::time::Instant::now());
                    st.custom_mode = Some(h.custom_mode);
                    st.armed = armed;
                }
                emit(TelemetryUpdate::FlightMode(copter_mode_name(h.custom_mode)));
                emit(TelemetryUpdate::Flying(armed && h.system_status == MavState::MAV_STATE_ACTIVE));
            }
            MavMessage::GLOBAL_POSITION_INT(p) => self.on_position(&p, &emit),
            MavMessage::SYS_STATUS(s) => {
                // -1 means unknown
                if (0..=100).contains(&s.battery_remaining) {
                    emit(TelemetryUpdate::BatteryPercent(s.battery_remaining as u8));
                }
            }
            MavMessage::GPS_RAW_INT(g) => {
                if g.satellites_visible != u8::MAX {
                    emit(TelemetryUpdate::SatelliteCount(g.satellites_visible as u32));
                }
                emit(TelemetryUpdate::GpsSignalLevel(format!("{:?}", g.fix_type)));
            }
            MavMessage::COMMAND_ACK(a) => {
                if let Some(tx) = self.acks.lock().remove(&(a.command as u32)) {
                    let _ = tx.send(a.result);
                }
            }
            _ => {}
        }
    }

    fn on_position(&self, p: &GLOBAL_POSITION_INT_DATA, emit: &impl Fn(TelemetryUpdate)) {
        let here = Coordinate3D {
            latitude: p.lat as f64 / 1e7,
            longitude: p.lon as f64 / 1e7,
            altitude: p.relative_alt as f64 / 1000.0,
        };
        self.status.lock().position = Some(here);

        emit(TelemetryUpdate::Location3D {
            latitude: here.latitude,
            longitude: here.longitude,
            altitude: here.altitude,
        });
        emit(TelemetryUpdate::Altitude(here.altitude));
        // cm/s, NED
        emit(TelemetryUpdate::Velocity {
            x: p.vx as f64 / 100.0,
            y: p.vy as f64 / 100.0,
            z: p.vz as f64 / 100.0,
        });
        if p.hdg != u16::MAX {
            emit(TelemetryUpdate::Heading(p.hdg as f64 / 100.0));
        }
    }
}
