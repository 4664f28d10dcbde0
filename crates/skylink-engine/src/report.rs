use std::fmt;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::journal::Journal;

/// Result of handling one inbound message or mission event.
#[derive(Debug)]
pub enum Outcome {
    Completed(String),
    /// Accepted but nothing to do, e.g. ending a mission while idle.
    NoOp(String),
    Failed(EngineError),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed(m) => write!(f, "{}", m),
            Outcome::NoOp(m) => write!(f, "no-op: {}", m),
            Outcome::Failed(e) => write!(f, "failed ({}): {}", e.kind(), e),
        }
    }
}

/// Where outcomes end up. `source` names the handler (topic or component).
pub trait Reporter: Send + Sync {
    fn report(&self, source: &str, outcome: &Outcome);
}

/// Traces every outcome and journals it as a note line.
pub struct JournalReporter {
    journal: Journal,
}

impl JournalReporter {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

impl Reporter for JournalReporter {
    fn report(&self, source: &str, outcome: &Outcome) {
        if outcome.is_failure() {
            warn!("{}: {}", source, outcome);
        } else {
            info!("{}: {}", source, outcome);
        }
        self.journal.note(&format!("{}: {}", source, outcome));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reported {
    pub source: String,
    /// "completed", "noop" or the error kind.
    pub kind: String,
    pub text: String,
}

/// Keeps outcomes in memory, for embedding and tests.
#[derive(Default)]
pub struct Recorder {
    entries: Mutex<Vec<Reported>>,
}

impl Recorder {
    pub fn entries(&self) -> Vec<Reported> {
        self.entries.lock().clone()
    }

    pub fn by_source(&self, source: &str) -> Vec<Reported> {
        self.entries.lock().iter().filter(|r| r.source == source).cloned().collect()
    }
}

impl Reporter for Recorder {
    fn report(&self, source: &str, outcome: &Outcome) {
        let kind = match outcome {
            Outcome::Completed(_) => "completed",
            Outcome::NoOp(_) => "noop",
            Outcome::Failed(e) => e.kind(),
        };
        self.entries.lock().push(Reported {
            source: source.to_string(),
            kind: kind.to_string(),
            text: outcome.to_string(),
        });
    }
}

/// Fans one outcome out to several reporters.
pub struct Tee(pub Vec<std::sync::Arc<dyn Reporter>>);

impl Reporter for Tee {
    fn report(&self, source: &str, outcome: &Outcome) {
        for r in &self.0 {
            r.report(source, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylink_proto::ValidationError;

    #[test]
    fn recorder_classifies() {
        let r = Recorder::default();
        r.report("drone:command", &Outcome::Completed("TAKEOFF accepted".into()));
        r.report("mission:end", &Outcome::NoOp("no active mission".into()));
        r.report("mission:start", &Outcome::Failed(ValidationError::NoWaypoints.into()));

        let e = r.entries();
        assert_eq!(e[0].kind, "completed");
        assert_eq!(e[1].text, "no-op: no active mission");
        assert_eq!(e[2].kind, "validation");
        assert_eq!(r.by_source("mission:end").len(), 1);
    }
}
