#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use skylink_engine::journal::{AppendSink, Journal};
use skylink_engine::report::Recorder;
use skylink_engine::{Collaborators, Engine, EngineConfig};
use skylink_fc::sim::SimActuator;
use skylink_link::{DuplexChannel, LinkError, LinkEvent};
use skylink_proto::message::Envelope;
use skylink_video::{FrameSink, StreamError, StreamingCapability};

#[derive(Default)]
pub struct FakeChannel {
    connected: AtomicBool,
    pub sent: Mutex<Vec<(String, Value)>>,
    pub binary: Mutex<Vec<(String, Bytes)>>,
}

impl FakeChannel {
    pub fn set_connected(&self, up: bool) {
        self.connected.store(up, Ordering::SeqCst);
    }

    pub fn sent_on(&self, topic: &str) -> Vec<Value> {
        self.sent.lock().iter().filter(|(t, _)| t == topic).map(|(_, v)| v.clone()).collect()
    }
}

impl DuplexChannel for FakeChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, payload: Value) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        self.sent.lock().push((topic.to_string(), payload));
        Ok(())
    }

    fn publish_binary(&self, topic: &str, payload: Bytes) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        self.binary.lock().push((topic.to_string(), payload));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeVideo {
    pub fail_start: AtomicBool,
    pub sink: Mutex<Option<Arc<dyn FrameSink>>>,
    pub starts: Mutex<u32>,
    pub stops: Mutex<u32>,
}

#[async_trait]
impl StreamingCapability for FakeVideo {
    async fn start(&self, sink: Arc<dyn FrameSink>) -> Result<(), StreamError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(StreamError::Spawn {
                program: "encoder".into(),
                source: io::Error::new(io::ErrorKind::NotFound, "no camera"),
            });
        }
        *self.starts.lock() += 1;
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    async fn stop(&self) -> Result<(), StreamError> {
        *self.stops.lock() += 1;
        self.sink.lock().take();
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.sink.lock().is_some()
    }
}

pub struct MemSink(pub Arc<Mutex<Vec<String>>>);

impl AppendSink for MemSink {
    fn append(&mut self, line: &[u8]) -> io::Result<()> {
        self.0.lock().push(String::from_utf8_lossy(line).into_owned());
        Ok(())
    }
}

pub struct Harness {
    pub engine: Arc<Engine>,
    pub sim: Arc<SimActuator>,
    pub channel: Arc<FakeChannel>,
    pub video: Arc<FakeVideo>,
    pub recorder: Arc<Recorder>,
    pub journal: Journal,
    pub lines: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(SimActuator::new(), EngineConfig::default())
    }

    pub fn with(sim: SimActuator, cfg: EngineConfig) -> Self {
        let sim = Arc::new(sim);
        let channel = Arc::new(FakeChannel::default());
        let video = Arc::new(FakeVideo::default());
        let recorder = Arc::new(Recorder::default());
        let lines = Arc::new(Mutex::new(Vec::new()));
        let journal = Journal::spawn(Box::new(MemSink(lines.clone()))).expect("journal thread");

        let engine = Engine::new(
            cfg,
            Collaborators {
                actuator: sim.clone(),
                channel: channel.clone(),
                video: video.clone(),
                journal: journal.clone(),
                reporter: Some(recorder.clone()),
            },
        );
        Self { engine, sim, channel, video, recorder, journal, lines }
    }

    /// Feeds one inbound message through the session and waits for its
    /// handler task, if it spawned one.
    pub async fn inbound(&self, event: &str, data: Value) {
        let env = Envelope::new(event, data);
        if let Some(h) = self.engine.session().handle(LinkEvent::Message(env)) {
            h.await.expect("handler task");
        }
    }

    pub fn last_report(&self, source: &str) -> Option<skylink_engine::report::Reported> {
        self.recorder.by_source(source).pop()
    }
}
