mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::Harness;
use parking_lot::Mutex;
use serde_json::json;
use skylink_engine::mission::{Finish, MissionPhase};
use skylink_engine::EngineConfig;
use skylink_fc::sim::{ActuatorCall, SimActuator};
use skylink_link::{LinkEvent, LinkState};
use skylink_proto::message::Envelope;
use skylink_proto::telemetry::TelemetryUpdate;
use tokio::sync::mpsc;
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn takeoff_leaves_missions_alone() {
    let h = Harness::new();
    h.inbound("drone:command", json!({ "droneId": "1", "command": "takeoff", "timestamp": "t" })).await;

    let r = h.last_report("drone:command").unwrap();
    assert_eq!(r.kind, "completed");
    assert!(r.text.starts_with("TAKEOFF"), "{}", r.text);
    assert_eq!(h.sim.calls(), vec![ActuatorCall::Takeoff]);
    assert_eq!(h.engine.missions().phase(), MissionPhase::Idle);
    assert!(h.engine.missions().last_finished().is_none());
}

#[tokio::test(start_paused = true)]
async fn unknown_command_is_reported_and_touches_nothing() {
    let h = Harness::new();
    h.inbound("drone:command", json!({ "droneId": "1", "command": "barrel_roll" })).await;

    let r = h.last_report("drone:command").unwrap();
    assert_eq!(r.kind, "unsupported-command");
    assert!(r.text.contains("barrel_roll"));
    assert!(h.sim.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn malformed_payloads_are_dropped() {
    let h = Harness::new();
    h.inbound("drone:command", json!(null)).await;
    h.inbound("drone:command", json!({ "droneId": "1" })).await;
    h.inbound("mission:start", json!("go")).await;
    h.inbound("mission:end", json!([1, 2])).await;
    h.inbound("some:other", json!({ "command": "land" })).await;

    let kinds: Vec<_> = h.recorder.entries().into_iter().map(|r| (r.source, r.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            ("drone:command".to_string(), "validation".to_string()),
            ("drone:command".to_string(), "validation".to_string()),
            ("mission:start".to_string(), "validation".to_string()),
            ("mission:end".to_string(), "validation".to_string()),
        ]
    );
    assert!(h.sim.calls().is_empty());
    assert_eq!(h.engine.missions().phase(), MissionPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn actuator_rejection_is_reported() {
    let h = Harness::new();
    h.sim.set_land(Err(skylink_fc::ActuatorError::NotReady("disarmed".into())));
    h.inbound("drone:command", json!({ "command": "LAND" })).await;
    assert_eq!(h.last_report("drone:command").unwrap().kind, "actuator");
}

#[tokio::test(start_paused = true)]
async fn move_forward_neutralizes_after_safety_stop() {
    let h = Harness::new();
    h.inbound("drone:command", json!({ "command": "move_forward" })).await;

    assert_eq!(h.last_report("drone:command").unwrap().kind, "completed");
    let (lat, lon) = h.sim.last_velocity().unwrap();
    assert_eq!(lat, 0.0);
    assert!((lon - 0.5).abs() < 1e-6);
    assert!(h.sim.calls().contains(&ActuatorCall::EnableControlMode));

    sleep(Duration::from_millis(2100)).await;
    assert_eq!(h.sim.last_velocity(), Some((0.0, 0.0)));
}

#[tokio::test(start_paused = true)]
async fn stop_after_move_wins_while_control_mode_enables() {
    let sim = SimActuator::new().with_enable_latency(Duration::from_millis(300));
    let h = Harness::with(sim, EngineConfig::default());
    let session = h.engine.session();

    let moving = session.handle(LinkEvent::Message(Envelope::new("drone:command", json!({ "command": "move_forward" }))));
    let stopping = session.handle(LinkEvent::Message(Envelope::new("drone:command", json!({ "command": "stop_movement" }))));
    moving.unwrap().await.unwrap();
    stopping.unwrap().await.unwrap();

    assert_eq!(h.sim.last_velocity(), Some((0.0, 0.0)));
    assert!(h.engine.dispatcher().motion().envelope().is_zero());
    assert!(!h.engine.dispatcher().motion().pending_neutralization());
    let texts: Vec<_> = h.recorder.by_source("drone:command").into_iter().map(|r| r.text).collect();
    assert_eq!(texts.len(), 2);
    assert!(texts[0].starts_with("MOVE_FORWARD"), "{:?}", texts);
    assert!(texts[1].starts_with("STOP_MOVEMENT"), "{:?}", texts);

    // nothing moves the vehicle again after the stop
    let before = h.sim.calls().len();
    sleep(Duration::from_secs(3)).await;
    assert_eq!(h.sim.calls().len(), before);
}

#[tokio::test(start_paused = true)]
async fn connecting_joins_room_and_announces_once() {
    let h = Harness::new();
    h.channel.set_connected(true);
    let session = h.engine.session();

    session.handle(LinkEvent::StateChanged(LinkState::Connecting));
    session.handle(LinkEvent::StateChanged(LinkState::Connected));
    session.handle(LinkEvent::StateChanged(LinkState::Connected));
    assert_eq!(session.state(), LinkState::Connected);

    assert_eq!(h.channel.sent_on("join:drone"), vec![json!({ "droneId": "1" })]);
    let hello = h.channel.sent_on("app:message");
    assert_eq!(hello.len(), 1);
    assert_eq!(hello[0]["type"], "app_startup");
    assert_eq!(hello[0]["message"], "Drone app started and connected");
    assert_eq!(hello[0]["droneId"], "1");

    session.handle(LinkEvent::StateChanged(LinkState::Disconnected));
    session.handle(LinkEvent::StateChanged(LinkState::Connected));
    assert_eq!(h.channel.sent_on("join:drone").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn pong_is_journaled_and_forwarded() {
    let h = Harness::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    h.engine.session().set_pong_listener(Arc::new(move |r| sink.lock().push(r.message.clone())));

    h.inbound("pong", json!({ "timestamp": "t1", "message": "hello", "receivedAt": "r1" })).await;
    assert_eq!(*seen.lock(), vec!["hello".to_string()]);

    h.journal.sync().await;
    let lines = h.lines.lock().clone();
    assert!(
        lines.iter().any(|l| l.contains("PONG - timestamp: t1, receivedAt: r1, message: hello")),
        "{:?}",
        lines
    );
}

#[tokio::test(start_paused = true)]
async fn telemetry_is_published_on_change_only() {
    let h = Harness::new();
    h.channel.set_connected(true);
    let (_events_tx, events) = mpsc::unbounded_channel();
    let (feed_tx, feed) = mpsc::unbounded_channel();
    h.engine.start(events, feed);

    feed_tx.send(TelemetryUpdate::BatteryPercent(80)).unwrap();
    sleep(Duration::from_millis(10)).await;
    feed_tx.send(TelemetryUpdate::BatteryPercent(80)).unwrap();
    sleep(Duration::from_millis(10)).await;

    let sent = h.channel.sent_on("telemetry:data");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["droneId"], "1");
    assert_eq!(sent[0]["telemetry"]["battery_percent"], 80);

    // periodic pass sees nothing new
    sleep(Duration::from_secs(6)).await;
    assert_eq!(h.channel.sent_on("telemetry:data").len(), 1);

    feed_tx.send(TelemetryUpdate::Flying(true)).unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(h.channel.sent_on("telemetry:data").len(), 2);
    assert_eq!(h.engine.aggregator().snapshot().fields.battery_percent, Some(80));
}

#[tokio::test(start_paused = true)]
async fn video_frames_only_flow_while_connected() {
    let h = Harness::new();
    h.inbound("drone:command", json!({ "command": "start_video_stream" })).await;
    assert_eq!(h.last_report("drone:command").unwrap().kind, "completed");
    let sink = h.video.sink.lock().clone().unwrap();

    sink.frame(Bytes::from_static(b"\xff\xd8one\xff\xd9"));
    assert!(h.channel.binary.lock().is_empty());

    h.channel.set_connected(true);
    sink.frame(Bytes::from_static(b"\xff\xd8two\xff\xd9"));
    let frames = h.channel.binary.lock().clone();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0, "video:frame");

    h.inbound("drone:command", json!({ "command": "stop_video_stream" })).await;
    assert_eq!(*h.video.stops.lock(), 1);
}

#[tokio::test(start_paused = true)]
async fn video_start_failure_is_reported() {
    let h = Harness::new();
    h.video.fail_start.store(true, Ordering::SeqCst);
    h.inbound("drone:command", json!({ "command": "start_video_stream" })).await;
    assert_eq!(h.last_report("drone:command").unwrap().kind, "streaming");
}

#[tokio::test(start_paused = true)]
async fn shutdown_ends_mission_and_closes_journal() {
    let h = Harness::new();
    let (_events_tx, events) = mpsc::unbounded_channel();
    let (_feed_tx, feed) = mpsc::unbounded_channel();
    h.engine.start(events, feed);
    h.inbound(
        "mission:start",
        json!({ "droneId": "1", "waypoints": [{ "lat": 1, "lng": 2, "alt": 3, "action": "hover" }] }),
    )
    .await;
    h.inbound("drone:command", json!({ "command": "start_video_stream" })).await;

    h.engine.shutdown().await;

    assert_eq!(h.engine.missions().last_finished().unwrap().how, Finish::Aborted);
    assert!(h.video.sink.lock().is_none());
    assert!(!h.journal.is_open());
    let lines = h.lines.lock().clone();
    assert!(lines.first().unwrap().contains("Application started"), "{:?}", lines);
    assert!(lines.last().unwrap().contains("Application stopped - Telemetry logging ended"), "{:?}", lines);
}
