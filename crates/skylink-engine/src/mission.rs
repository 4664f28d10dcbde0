//! Waypoint mission execution.
//!
//! [`MissionCore`] holds the transitions and is free of I/O. Every running
//! mission carries an epoch; continuations armed for an older epoch are
//! ignored, so an ended or superseded mission can never resume.
//! [`MissionRunner`] drives the core from one task per mission. The hold
//! requested by an end must complete before the next mission's first
//! waypoint is issued.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use skylink_fc::{Coordinate3D, VehicleActuator};
use skylink_proto::mission::{Waypoint, WaypointAction};
use skylink_proto::ValidationError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::report::{Outcome, Reporter};

#[derive(Debug, Clone, Deserialize)]
pub struct MissionConfig {
    /// Pause after each fly-to, successful or not.
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
    #[serde(default = "default_hover")]
    pub hover_ms: u64,
    #[serde(default = "default_max_speed")]
    pub max_speed_mps: f32,
    #[serde(default = "default_safety_height")]
    pub safety_height_m: f32,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle(),
            hover_ms: default_hover(),
            max_speed_mps: default_max_speed(),
            safety_height_m: default_safety_height(),
        }
    }
}

fn default_settle() -> u64 { 2000 }
fn default_hover() -> u64 { 3000 }
fn default_max_speed() -> f32 { 14.0 }
fn default_safety_height() -> f32 { 20.0 }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionPhase {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    Completed,
    Aborted,
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mission {
    pub vehicle_id: String,
    pub waypoints: Vec<Waypoint>,
    pub cursor: usize,
}

/// How the last mission left the `Running` phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub vehicle_id: String,
    pub cursor: usize,
    pub total: usize,
    pub how: Finish,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Execute { index: usize, total: usize, waypoint: Waypoint },
    /// Cursor is past the last waypoint; clean up, then [`MissionCore::finish`].
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Started {
    pub epoch: u64,
    /// A running mission was displaced and still needs cleanup.
    pub superseded: bool,
}

#[derive(Debug, Default)]
pub struct MissionCore {
    mission: Option<Mission>,
    epoch: u64,
    last: Option<Finished>,
}

impl MissionCore {
    pub fn phase(&self) -> MissionPhase {
        if self.mission.is_some() {
            MissionPhase::Running
        } else {
            MissionPhase::Idle
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn mission(&self) -> Option<&Mission> {
        self.mission.as_ref()
    }

    pub fn last_finished(&self) -> Option<&Finished> {
        self.last.as_ref()
    }

    /// An empty waypoint list is rejected and leaves the current state alone.
    pub fn start(&mut self, vehicle_id: String, waypoints: Vec<Waypoint>) -> Result<Started, ValidationError> {
        if waypoints.is_empty() {
            return Err(ValidationError::NoWaypoints);
        }
        let superseded = self.retire(Finish::Superseded).is_some();
        self.epoch += 1;
        self.mission = Some(Mission { vehicle_id, waypoints, cursor: 0 });
        Ok(Started { epoch: self.epoch, superseded })
    }

    /// What to run next for `epoch`; `None` once the epoch is stale.
    pub fn current(&self, epoch: u64) -> Option<Step> {
        if epoch != self.epoch {
            return None;
        }
        let m = self.mission.as_ref()?;
        Some(match m.waypoints.get(m.cursor) {
            Some(w) => Step::Execute { index: m.cursor, total: m.waypoints.len(), waypoint: w.clone() },
            None => Step::Exhausted,
        })
    }

    pub fn advance(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch {
            return false;
        }
        match self.mission.as_mut() {
            Some(m) if m.cursor < m.waypoints.len() => {
                m.cursor += 1;
                true
            }
            _ => false,
        }
    }

    pub fn finish(&mut self, epoch: u64) -> Option<Finished> {
        if epoch != self.epoch {
            return None;
        }
        let m = self.mission.as_ref()?;
        if m.cursor < m.waypoints.len() {
            return None;
        }
        self.epoch += 1;
        self.retire(Finish::Completed)
    }

    /// `None` when no mission is running.
    pub fn end(&mut self) -> Option<Finished> {
        let f = self.retire(Finish::Aborted)?;
        self.epoch += 1;
        Some(f)
    }

    fn retire(&mut self, how: Finish) -> Option<Finished> {
        let m = self.mission.take()?;
        let f = Finished { vehicle_id: m.vehicle_id, cursor: m.cursor, total: m.waypoints.len(), how };
        self.last = Some(f.clone());
        Some(f)
    }
}

#[derive(Default)]
struct Slot {
    core: MissionCore,
    task: Option<JoinHandle<()>>,
    /// Hold request left behind by the last `end`.
    cleanup: Option<JoinHandle<()>>,
}

struct Inner {
    slot: Mutex<Slot>,
    actuator: Arc<dyn VehicleActuator>,
    cfg: MissionConfig,
    reporter: Arc<dyn Reporter>,
}

#[derive(Clone)]
pub struct MissionRunner {
    inner: Arc<Inner>,
}

impl MissionRunner {
    pub fn new(actuator: Arc<dyn VehicleActuator>, cfg: MissionConfig, reporter: Arc<dyn Reporter>) -> Self {
        Self { inner: Arc::new(Inner { slot: Mutex::new(Slot::default()), actuator, cfg, reporter }) }
    }

    /// Starts executing `waypoints`, displacing any running mission.
    pub fn start(&self, vehicle_id: String, waypoints: Vec<Waypoint>) -> Result<usize, EngineError> {
        let total = waypoints.len();
        let mut slot = self.inner.slot.lock();
        let started = slot.core.start(vehicle_id, waypoints)?;
        if let Some(old) = slot.task.take() {
            old.abort();
        }
        let hold = slot.cleanup.take();
        slot.task = Some(tokio::spawn(drive(self.inner.clone(), started, hold)));
        Ok(total)
    }

    /// Aborts the running mission. `None` means there was nothing to end.
    ///
    /// The transition happens before this returns; the hold request runs on
    /// its own task, which the next `start` waits for.
    pub fn end(&self) -> Option<Finished> {
        let mut slot = self.inner.slot.lock();
        let finished = slot.core.end()?;
        if let Some(task) = slot.task.take() {
            task.abort();
        }
        let previous = slot.cleanup.take();
        let inner = self.inner.clone();
        slot.cleanup = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            inner.cleanup().await;
        }));
        Some(finished)
    }

    /// Waits until the hold requested by the last `end` went out.
    pub async fn settled(&self) {
        let hold = self.inner.slot.lock().cleanup.take();
        if let Some(hold) = hold {
            let _ = hold.await;
        }
    }

    pub fn phase(&self) -> MissionPhase {
        self.inner.slot.lock().core.phase()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.inner.slot.lock().core.mission().map(|m| m.cursor)
    }

    pub fn last_finished(&self) -> Option<Finished> {
        self.inner.slot.lock().core.last_finished().cloned()
    }
}

async fn drive(inner: Arc<Inner>, started: Started, hold: Option<JoinHandle<()>>) {
    let epoch = started.epoch;
    if let Some(hold) = hold {
        let _ = hold.await;
    }
    if started.superseded {
        inner.cleanup().await;
    }
    loop {
        let step = inner.slot.lock().core.current(epoch);
        match step {
            None => return,
            Some(Step::Execute { index, total, waypoint }) => {
                inner.execute(index, total, &waypoint).await;
                if !inner.slot.lock().core.advance(epoch) {
                    return;
                }
            }
            Some(Step::Exhausted) => {
                inner.cleanup().await;
                let finished = inner.slot.lock().core.finish(epoch);
                if let Some(f) = finished {
                    inner.reporter.report(
                        "mission",
                        &Outcome::Completed(format!(
                            "mission for {} completed ({}/{} waypoints)",
                            f.vehicle_id, f.cursor, f.total
                        )),
                    );
                }
                return;
            }
        }
    }
}

impl Inner {
    async fn execute(&self, index: usize, total: usize, wp: &Waypoint) {
        let n = index + 1;
        match &wp.action {
            WaypointAction::FlyTo | WaypointAction::Unknown(_) => {
                if let WaypointAction::Unknown(a) = &wp.action {
                    warn!("mission: waypoint {}/{} has unknown action {:?}; flying to it", n, total, a);
                }
                info!("mission: waypoint {}/{}: {}", n, total, wp);
                let target = Coordinate3D { latitude: wp.latitude, longitude: wp.longitude, altitude: wp.altitude };
                match self.actuator.fly_to(target, self.cfg.max_speed_mps, self.cfg.safety_height_m).await {
                    Ok(()) => info!("mission: waypoint {}/{} reached", n, total),
                    Err(source) => self.reporter.report(
                        "mission",
                        &Outcome::Failed(EngineError::Waypoint { index: n, source }),
                    ),
                }
                tokio::time::sleep(Duration::from_millis(self.cfg.settle_ms)).await;
            }
            WaypointAction::Hover => {
                info!("mission: waypoint {}/{}: hovering {} ms", n, total, self.cfg.hover_ms);
                tokio::time::sleep(Duration::from_millis(self.cfg.hover_ms)).await;
            }
            WaypointAction::TakePhoto | WaypointAction::StartRecording | WaypointAction::StopRecording => {
                self.reporter.report(
                    "mission",
                    &Outcome::NoOp(format!("waypoint {}/{}: {} not supported yet", n, total, wp.action.as_str())),
                );
            }
        }
    }

    async fn cleanup(&self) {
        if let Err(e) = self.actuator.stop_fly_to().await {
            warn!("mission: stopping fly-to failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wp(action: WaypointAction) -> Waypoint {
        Waypoint { latitude: 10.0, longitude: 20.0, altitude: 30.0, action }
    }

    #[test]
    fn runs_to_completion() {
        let mut core = MissionCore::default();
        let s = core.start("1".into(), vec![wp(WaypointAction::FlyTo), wp(WaypointAction::Hover)]).unwrap();
        assert!(!s.superseded);
        assert_eq!(core.phase(), MissionPhase::Running);
        assert!(matches!(core.current(s.epoch), Some(Step::Execute { index: 0, total: 2, .. })));

        assert!(core.advance(s.epoch));
        assert!(core.advance(s.epoch));
        assert!(!core.advance(s.epoch));
        assert_eq!(core.current(s.epoch), Some(Step::Exhausted));

        let f = core.finish(s.epoch).unwrap();
        assert_eq!((f.cursor, f.total, f.how), (2, 2, Finish::Completed));
        assert_eq!(core.phase(), MissionPhase::Idle);
        assert_eq!(core.current(s.epoch), None);
    }

    #[test]
    fn empty_start_keeps_state() {
        let mut core = MissionCore::default();
        assert_eq!(core.start("1".into(), vec![]), Err(ValidationError::NoWaypoints));
        assert_eq!(core.phase(), MissionPhase::Idle);

        let s = core.start("1".into(), vec![wp(WaypointAction::Hover)]).unwrap();
        assert!(core.start("1".into(), vec![]).is_err());
        assert_eq!(core.epoch(), s.epoch);
        assert_eq!(core.mission().map(|m| m.waypoints.len()), Some(1));
    }

    #[test]
    fn stale_continuations_are_ignored() {
        let mut core = MissionCore::default();
        let first = core.start("1".into(), vec![wp(WaypointAction::FlyTo); 3]).unwrap();
        let second = core.start("1".into(), vec![wp(WaypointAction::Hover)]).unwrap();
        assert!(second.superseded);
        assert_eq!(core.last_finished().map(|f| f.how), Some(Finish::Superseded));

        assert!(!core.advance(first.epoch));
        assert_eq!(core.current(first.epoch), None);
        assert_eq!(core.mission().map(|m| m.cursor), Some(0));

        let ended = core.end().unwrap();
        assert_eq!(ended.how, Finish::Aborted);
        assert!(!core.advance(second.epoch));
        assert!(core.finish(second.epoch).is_none());
        assert!(core.end().is_none());
    }
}
