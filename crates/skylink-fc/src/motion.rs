//! Timed velocity envelopes with automatic neutralization.
//!
//! Every envelope applied through [`MotionController::move_toward`] is
//! followed by a zero envelope after `safety_stop_ms` unless another command
//! supersedes it first. At most one neutralization timer is pending at any time.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use skylink_proto::ValidationError;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{ActuatorError, VehicleActuator};

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    /// Velocity reached at magnitude fraction 1.0.
    #[serde(default = "default_max_velocity")]
    pub max_velocity_mps: f32,
    /// Fraction used by the operator's move commands.
    #[serde(default = "default_fraction")]
    pub magnitude_fraction: f32,
    #[serde(default = "default_safety_stop")]
    pub safety_stop_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            max_velocity_mps: default_max_velocity(),
            magnitude_fraction: default_fraction(),
            safety_stop_ms: default_safety_stop(),
        }
    }
}

fn default_max_velocity() -> f32 { 5.0 }
fn default_fraction() -> f32 { 0.1 }
fn default_safety_stop() -> u64 { 2000 }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Envelope {
    pub lateral: f32,
    pub longitudinal: f32,
}

impl Envelope {
    pub const ZERO: Envelope = Envelope { lateral: 0.0, longitudinal: 0.0 };

    pub fn toward(direction: Direction, speed: f32) -> Self {
        let longitudinal = match direction {
            Direction::Forward => speed,
            Direction::Backward => -speed,
        };
        Self { lateral: 0.0, longitudinal }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

#[derive(Debug, Error)]
pub enum MotionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("control mode not enabled: {0}")]
    ControlMode(ActuatorError),
    #[error(transparent)]
    Actuator(#[from] ActuatorError),
    /// A stop or newer move ran while control mode was being enabled.
    #[error("superseded while enabling control mode")]
    Superseded,
}

#[derive(Default)]
struct MotionState {
    control_enabled: bool,
    /// Bumped by every move request and every stop.
    ticket: u64,
    generation: u64,
    pending: Option<JoinHandle<()>>,
    envelope: Envelope,
}

impl MotionState {
    fn cancel_pending(&mut self) {
        if let Some(h) = self.pending.take() {
            h.abort();
        }
        self.generation += 1;
    }
}

#[derive(Clone)]
pub struct MotionController {
    actuator: Arc<dyn VehicleActuator>,
    cfg: MotionConfig,
    state: Arc<Mutex<MotionState>>,
}

impl MotionController {
    pub fn new(actuator: Arc<dyn VehicleActuator>, cfg: MotionConfig) -> Self {
        Self { actuator, cfg, state: Arc::new(Mutex::new(MotionState::default())) }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.cfg
    }

    /// Applies a forward/backward envelope at `fraction` of max velocity and
    /// arms the neutralization timer. Enables control mode first if needed;
    /// a refused enable abandons the move, and so does any `stop()` or other
    /// move that lands while the enable is in flight.
    pub async fn move_toward(&self, direction: Direction, fraction: f32) -> Result<Envelope, MotionError> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ValidationError::Magnitude(fraction).into());
        }

        let (enabled, ticket) = {
            let mut st = self.state.lock();
            st.ticket += 1;
            (st.control_enabled, st.ticket)
        };
        if !enabled {
            self.actuator.enable_control_mode().await.map_err(MotionError::ControlMode)?;
            let mut st = self.state.lock();
            st.control_enabled = true;
            info!("motion: control mode enabled");
            if st.ticket != ticket {
                debug!("motion: move dropped, superseded during enable");
                return Err(MotionError::Superseded);
            }
        }

        let envelope = Envelope::toward(direction, fraction * self.cfg.max_velocity_mps);
        let mut st = self.state.lock();
        st.cancel_pending();
        self.actuator.set_velocity_envelope(envelope.lateral, envelope.longitudinal)?;
        st.envelope = envelope;

        let gen = st.generation;
        let state = self.state.clone();
        let actuator = self.actuator.clone();
        let delay = Duration::from_millis(self.cfg.safety_stop_ms);
        st.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut st = state.lock();
            if st.generation != gen {
                return;
            }
            st.pending = None;
            debug!("motion: safety stop after {:?}", delay);
            if let Err(e) = neutralize(actuator.as_ref(), &mut st) {
                warn!("motion: safety stop failed: {}", e);
            }
        }));

        debug!("motion: envelope {:?}", envelope);
        Ok(envelope)
    }

    /// Cancels any pending timer and applies the zero envelope now.
    pub fn stop(&self) -> Result<(), MotionError> {
        let mut st = self.state.lock();
        st.ticket += 1;
        st.cancel_pending();
        neutralize(self.actuator.as_ref(), &mut st)?;
        Ok(())
    }

    pub fn envelope(&self) -> Envelope {
        self.state.lock().envelope
    }

    pub fn pending_neutralization(&self) -> bool {
        self.state.lock().pending.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Forget the enabled control mode, e.g. after the vehicle landed.
    pub fn reset_control_mode(&self) {
        self.state.lock().control_enabled = false;
    }
}

fn neutralize(actuator: &dyn VehicleActuator, st: &mut MotionState) -> Result<(), ActuatorError> {
    actuator.set_velocity_envelope(0.0, 0.0)?;
    st.envelope = Envelope::ZERO;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ActuatorCall, SimActuator};

    fn controller() -> (Arc<SimActuator>, MotionController) {
        let sim = Arc::new(SimActuator::new());
        let mc = MotionController::new(sim.clone(), MotionConfig::default());
        (sim, mc)
    }

    #[tokio::test(start_paused = true)]
    async fn move_self_neutralizes() {
        let (sim, mc) = controller();
        let env = mc.move_toward(Direction::Forward, 0.1).await.unwrap();
        assert!((env.longitudinal - 0.5).abs() < 1e-6);
        assert!(mc.pending_neutralization());

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(mc.envelope().is_zero());
        assert!(!mc.pending_neutralization());
        assert_eq!(sim.last_velocity(), Some((0.0, 0.0)));
        assert_eq!(sim.calls()[0], ActuatorCall::EnableControlMode);
    }

    #[tokio::test(start_paused = true)]
    async fn superseding_move_rearms_single_timer() {
        let (sim, mc) = controller();
        mc.move_toward(Direction::Forward, 0.1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        mc.move_toward(Direction::Backward, 0.1).await.unwrap();
        assert!(mc.pending_neutralization());

        // the first timer would have fired here
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(mc.envelope().longitudinal < 0.0);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(mc.envelope().is_zero());
        let zeros = sim
            .calls()
            .into_iter()
            .filter(|c| *c == ActuatorCall::Velocity { lateral: 0.0, longitudinal: 0.0 })
            .count();
        assert_eq!(zeros, 1);
        let enables = sim.calls().into_iter().filter(|c| *c == ActuatorCall::EnableControlMode).count();
        assert_eq!(enables, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_immediate_and_idempotent() {
        let (sim, mc) = controller();
        mc.move_toward(Direction::Forward, 0.5).await.unwrap();
        mc.stop().unwrap();
        assert!(mc.envelope().is_zero());
        assert!(!mc.pending_neutralization());
        mc.stop().unwrap();
        assert!(mc.envelope().is_zero());

        tokio::time::sleep(Duration::from_secs(5)).await;
        // no late timer fired after the two explicit stops
        let zeros = sim
            .calls()
            .into_iter()
            .filter(|c| *c == ActuatorCall::Velocity { lateral: 0.0, longitudinal: 0.0 })
            .count();
        assert_eq!(zeros, 2);
    }

    fn slow_controller() -> (Arc<SimActuator>, MotionController) {
        let sim = Arc::new(SimActuator::new().with_enable_latency(Duration::from_millis(300)));
        let mc = MotionController::new(sim.clone(), MotionConfig::default());
        (sim, mc)
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_enable_drops_the_move() {
        let (sim, mc) = slow_controller();
        let moving = tokio::spawn({
            let mc = mc.clone();
            async move { mc.move_toward(Direction::Forward, 0.1).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        mc.stop().unwrap();

        assert!(matches!(moving.await.unwrap(), Err(MotionError::Superseded)));
        assert!(mc.envelope().is_zero());
        assert!(!mc.pending_neutralization());
        assert_eq!(sim.last_velocity(), Some((0.0, 0.0)));

        // control mode stays enabled, so the next move applies at once
        mc.move_toward(Direction::Forward, 0.1).await.unwrap();
        assert!((mc.envelope().longitudinal - 0.5).abs() < 1e-6);
        let enables = sim.calls().into_iter().filter(|c| *c == ActuatorCall::EnableControlMode).count();
        assert_eq!(enables, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn later_move_wins_over_one_still_enabling() {
        let (_sim, mc) = slow_controller();
        let first = tokio::spawn({
            let mc = mc.clone();
            async move { mc.move_toward(Direction::Forward, 0.1).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = tokio::spawn({
            let mc = mc.clone();
            async move { mc.move_toward(Direction::Backward, 0.1).await }
        });

        assert!(matches!(first.await.unwrap(), Err(MotionError::Superseded)));
        assert!(second.await.unwrap().is_ok());
        assert!(mc.envelope().longitudinal < 0.0);
    }

    #[tokio::test]
    async fn refused_control_mode_abandons_move() {
        let (sim, mc) = controller();
        sim.set_control_mode(Err(ActuatorError::Rejected { command: "control mode", result: "DENIED".into() }));
        let err = mc.move_toward(Direction::Forward, 0.1).await.unwrap_err();
        assert!(matches!(err, MotionError::ControlMode(_)));
        assert!(sim.last_velocity().is_none());
        assert!(!mc.pending_neutralization());
    }

    #[tokio::test]
    async fn rejects_bad_fraction() {
        let (sim, mc) = controller();
        assert!(matches!(
            mc.move_toward(Direction::Forward, 0.0).await,
            Err(MotionError::Validation(ValidationError::Magnitude(_)))
        ));
        assert!(mc.move_toward(Direction::Forward, 1.5).await.is_err());
        assert!(sim.calls().is_empty());
    }
}
