//! Change-gated telemetry recording.
//!
//! A snapshot is persisted only when its fields differ from the last
//! persisted ones (or when forced). Every persisted snapshot is also offered
//! to the publisher; publishing is best-effort and never affects the write.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use skylink_proto::telemetry::{TelemetryFields, TelemetrySnapshot};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::journal::Journal;

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_prefix")]
    pub file_prefix: String,
    /// Interval of the unforced periodic record; 0 disables it.
    #[serde(default = "default_periodic")]
    pub periodic_ms: u64,
    /// Record every field update even when nothing changed.
    #[serde(default)]
    pub force_on_update: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            file_prefix: default_prefix(),
            periodic_ms: default_periodic(),
            force_on_update: false,
        }
    }
}

fn default_dir() -> PathBuf { PathBuf::from("telemetry") }
fn default_prefix() -> String { "telemetry".into() }
fn default_periodic() -> u64 { 5000 }

/// Receives every persisted snapshot.
pub trait TelemetryPublisher: Send + Sync {
    fn publish(&self, snapshot: &TelemetrySnapshot) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Written,
    Unchanged,
    Empty,
}

pub struct LogSink {
    last_key: Mutex<Option<TelemetryFields>>,
    journal: Journal,
    publisher: Option<Arc<dyn TelemetryPublisher>>,
}

impl LogSink {
    pub fn new(journal: Journal, publisher: Option<Arc<dyn TelemetryPublisher>>) -> Self {
        Self { last_key: Mutex::new(None), journal, publisher }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn record(&self, snapshot: &TelemetrySnapshot, force: bool) -> Recorded {
        if snapshot.fields.is_empty() {
            return Recorded::Empty;
        }

        {
            let mut last = self.last_key.lock();
            if !force && last.as_ref() == Some(snapshot.comparison_key()) {
                return Recorded::Unchanged;
            }
            let line = match serde_json::to_vec(snapshot) {
                Ok(l) => l,
                Err(e) => {
                    warn!("telemetry: encode snapshot: {}", e);
                    return Recorded::Unchanged;
                }
            };
            *last = Some(snapshot.comparison_key().clone());
            // queued under the lock so journal order follows key order
            self.journal.snapshot(line);
        }

        if let Some(p) = &self.publisher {
            if let Err(e) = p.publish(snapshot) {
                debug!("telemetry: not published: {}", e);
            }
        }
        Recorded::Written
    }

    pub fn note(&self, message: &str) {
        self.journal.note(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::AppendSink;
    use skylink_link::LinkError;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Lines(Arc<Mutex<Vec<String>>>);

    impl AppendSink for Lines {
        fn append(&mut self, line: &[u8]) -> io::Result<()> {
            self.0.lock().push(String::from_utf8_lossy(line).into_owned());
            Ok(())
        }
    }

    #[derive(Default)]
    struct Offline(AtomicUsize);

    impl TelemetryPublisher for Offline {
        fn publish(&self, _: &TelemetrySnapshot) -> Result<(), EngineError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Err(LinkError::NotConnected.into())
        }
    }

    fn snap(ts: &str, battery: u8, heading: f64) -> TelemetrySnapshot {
        TelemetrySnapshot {
            timestamp: ts.into(),
            fields: TelemetryFields {
                battery_percent: Some(battery),
                heading_deg: Some(heading),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn unchanged_fields_are_not_rewritten() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let pubr = Arc::new(Offline::default());
        let journal = Journal::spawn(Box::new(Lines(lines.clone()))).unwrap();
        let sink = LogSink::new(journal.clone(), Some(pubr.clone()));

        assert_eq!(sink.record(&snap("10:00:00.000", 80, 90.0), false), Recorded::Written);
        assert_eq!(sink.record(&snap("10:00:05.000", 80, 90.0), false), Recorded::Unchanged);
        assert_eq!(sink.record(&snap("10:00:10.000", 80, 91.0), false), Recorded::Written);
        assert_eq!(sink.record(&snap("10:00:15.000", 80, 91.0), true), Recorded::Written);
        journal.sync().await;

        assert_eq!(journal.writes(), 3);
        let lines = lines.lock().clone();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("\"heading_deg\":91.0"));
        assert!(lines[1].contains("\"timestamp\":\"10:00:10.000\""));
        // publish failures do not undo the local write
        assert_eq!(pubr.0.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn empty_snapshot_is_skipped() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let journal = Journal::spawn(Box::new(Lines(lines.clone()))).unwrap();
        let sink = LogSink::new(journal.clone(), None);
        let empty = TelemetrySnapshot { timestamp: "t".into(), fields: TelemetryFields::default() };
        assert_eq!(sink.record(&empty, true), Recorded::Empty);
        journal.sync().await;
        assert!(lines.lock().is_empty());
    }
}
