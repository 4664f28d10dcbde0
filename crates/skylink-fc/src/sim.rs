//! In-process stand-in for a flight controller.
//!
//! Every call is recorded; results are scripted per operation. When a feed is
//! attached the simulator also reports the vehicle state its commands imply,
//! so `fc.kind = "sim"` produces a believable telemetry stream.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use skylink_proto::telemetry::TelemetryUpdate;
use tokio::sync::mpsc;

use crate::{ActuatorError, Coordinate3D, VehicleActuator};

#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCall {
    Takeoff,
    Land,
    EnableControlMode,
    Velocity { lateral: f32, longitudinal: f32 },
    FlyTo { target: Coordinate3D, max_speed: f32, safety_height: f32 },
    StopFlyTo,
}

struct Script {
    calls: Vec<ActuatorCall>,
    takeoff: Result<(), ActuatorError>,
    land: Result<(), ActuatorError>,
    control_mode: Result<(), ActuatorError>,
    stop_fly_to: Result<(), ActuatorError>,
    fly_to: VecDeque<Result<(), ActuatorError>>,
    /// Holds applied so far; a fly-to that sees this change was cancelled.
    holds: u64,
}

pub struct SimActuator {
    script: Mutex<Script>,
    feed: Option<mpsc::UnboundedSender<TelemetryUpdate>>,
    travel: Duration,
    hold_latency: Duration,
    enable_latency: Duration,
    takeoff_alt_m: f64,
}

impl Default for SimActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimActuator {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                calls: Vec::new(),
                takeoff: Ok(()),
                land: Ok(()),
                control_mode: Ok(()),
                stop_fly_to: Ok(()),
                fly_to: VecDeque::new(),
                holds: 0,
            }),
            feed: None,
            travel: Duration::ZERO,
            hold_latency: Duration::ZERO,
            enable_latency: Duration::ZERO,
            takeoff_alt_m: 10.0,
        }
    }

    pub fn with_feed(mut self, feed: mpsc::UnboundedSender<TelemetryUpdate>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// How long each fly-to takes before it resolves.
    pub fn with_travel_time(mut self, travel: Duration) -> Self {
        self.travel = travel;
        self
    }

    /// How long a stop-fly-to takes to be acknowledged and applied.
    pub fn with_hold_latency(mut self, latency: Duration) -> Self {
        self.hold_latency = latency;
        self
    }

    pub fn with_enable_latency(mut self, latency: Duration) -> Self {
        self.enable_latency = latency;
        self
    }

    pub fn set_takeoff(&self, r: Result<(), ActuatorError>) {
        self.script.lock().takeoff = r;
    }

    pub fn set_land(&self, r: Result<(), ActuatorError>) {
        self.script.lock().land = r;
    }

    pub fn set_control_mode(&self, r: Result<(), ActuatorError>) {
        self.script.lock().control_mode = r;
    }

    pub fn set_stop_fly_to(&self, r: Result<(), ActuatorError>) {
        self.script.lock().stop_fly_to = r;
    }

    /// Queue the result of the next unscripted fly-to; unqueued calls succeed.
    pub fn push_fly_to(&self, r: Result<(), ActuatorError>) {
        self.script.lock().fly_to.push_back(r);
    }

    pub fn calls(&self) -> Vec<ActuatorCall> {
        self.script.lock().calls.clone()
    }

    pub fn fly_to_count(&self) -> usize {
        self.script.lock().calls.iter().filter(|c| matches!(c, ActuatorCall::FlyTo { .. })).count()
    }

    pub fn last_velocity(&self) -> Option<(f32, f32)> {
        self.script.lock().calls.iter().rev().find_map(|c| match c {
            ActuatorCall::Velocity { lateral, longitudinal } => Some((*lateral, *longitudinal)),
            _ => None,
        })
    }

    fn record(&self, call: ActuatorCall) {
        self.script.lock().calls.push(call);
    }

    fn emit(&self, u: TelemetryUpdate) {
        if let Some(feed) = &self.feed {
            let _ = feed.send(u);
        }
    }
}

#[async_trait]
impl VehicleActuator for SimActuator {
    async fn takeoff(&self) -> Result<(), ActuatorError> {
        self.record(ActuatorCall::Takeoff);
        let r = self.script.lock().takeoff.clone();
        if r.is_ok() {
            self.emit(TelemetryUpdate::Flying(true));
            self.emit(TelemetryUpdate::Altitude(self.takeoff_alt_m));
        }
        r
    }

    async fn land(&self) -> Result<(), ActuatorError> {
        self.record(ActuatorCall::Land);
        let r = self.script.lock().land.clone();
        if r.is_ok() {
            self.emit(TelemetryUpdate::Altitude(0.0));
            self.emit(TelemetryUpdate::Flying(false));
        }
        r
    }

    async fn enable_control_mode(&self) -> Result<(), ActuatorError> {
        self.record(ActuatorCall::EnableControlMode);
        if !self.enable_latency.is_zero() {
            tokio::time::sleep(self.enable_latency).await;
        }
        let r = self.script.lock().control_mode.clone();
        if r.is_ok() {
            self.emit(TelemetryUpdate::FlightMode("GUIDED".into()));
        }
        r
    }

    fn set_velocity_envelope(&self, lateral: f32, longitudinal: f32) -> Result<(), ActuatorError> {
        self.record(ActuatorCall::Velocity { lateral, longitudinal });
        self.emit(TelemetryUpdate::Velocity { x: longitudinal as f64, y: lateral as f64, z: 0.0 });
        Ok(())
    }

    async fn fly_to(
        &self,
        target: Coordinate3D,
        max_speed: f32,
        safety_height: f32,
    ) -> Result<(), ActuatorError> {
        self.record(ActuatorCall::FlyTo { target, max_speed, safety_height });
        let (r, holds) = {
            let mut script = self.script.lock();
            (script.fly_to.pop_front().unwrap_or(Ok(())), script.holds)
        };
        if !self.travel.is_zero() {
            tokio::time::sleep(self.travel).await;
        }
        if self.script.lock().holds != holds {
            return Err(ActuatorError::Cancelled("fly_to"));
        }
        if r.is_ok() {
            self.emit(TelemetryUpdate::Location3D {
                latitude: target.latitude,
                longitude: target.longitude,
                altitude: target.altitude,
            });
        }
        r
    }

    async fn stop_fly_to(&self) -> Result<(), ActuatorError> {
        self.record(ActuatorCall::StopFlyTo);
        if !self.hold_latency.is_zero() {
            tokio::time::sleep(self.hold_latency).await;
        }
        let mut script = self.script.lock();
        let r = script.stop_fly_to.clone();
        if r.is_ok() {
            script.holds += 1;
        }
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_results_and_feed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sim = SimActuator::new().with_feed(tx);
        sim.push_fly_to(Err(ActuatorError::Timeout("fly_to")));

        let target = Coordinate3D { latitude: 1.0, longitude: 2.0, altitude: 3.0 };
        assert_eq!(sim.fly_to(target, 14.0, 20.0).await, Err(ActuatorError::Timeout("fly_to")));
        assert_eq!(sim.fly_to(target, 14.0, 20.0).await, Ok(()));
        assert_eq!(sim.fly_to_count(), 2);
        assert_eq!(
            rx.recv().await,
            Some(TelemetryUpdate::Location3D { latitude: 1.0, longitude: 2.0, altitude: 3.0 })
        );

        sim.set_takeoff(Err(ActuatorError::NotReady("no gps".into())));
        assert!(sim.takeoff().await.is_err());
        assert_eq!(sim.calls().last(), Some(&ActuatorCall::Takeoff));
    }

    #[tokio::test(start_paused = true)]
    async fn applied_hold_cancels_fly_to_in_flight() {
        let sim = std::sync::Arc::new(
            SimActuator::new().with_travel_time(Duration::from_secs(2)).with_hold_latency(Duration::from_millis(500)),
        );
        let target = Coordinate3D { latitude: 1.0, longitude: 2.0, altitude: 3.0 };
        let flying = tokio::spawn({
            let sim = sim.clone();
            async move { sim.fly_to(target, 14.0, 20.0).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(sim.stop_fly_to().await, Ok(()));
        assert_eq!(flying.await.unwrap(), Err(ActuatorError::Cancelled("fly_to")));

        // a fly-to issued after the hold is unaffected
        assert_eq!(sim.fly_to(target, 14.0, 20.0).await, Ok(()));
    }
}
