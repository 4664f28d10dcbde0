//! Daily telemetry journal.
//!
//! [`DailyFileSink`] appends lines to `<dir>/<prefix>-YYYY-MM-DD.txt`, opening
//! a new file when the UTC date changes. [`Journal`] owns a sink on a
//! dedicated writer thread so callers never block on disk.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use skylink_proto::stamp;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub trait AppendSink: Send {
    /// Appends one line (without trailing newline) and flushes it.
    fn append(&mut self, line: &[u8]) -> io::Result<()>;
}

type Clock = Box<dyn Fn() -> OffsetDateTime + Send>;

pub struct DailyFileSink {
    dir: PathBuf,
    prefix: String,
    clock: Clock,
    current: Option<(String, File)>,
}

impl DailyFileSink {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self::with_clock(dir, prefix, Box::new(OffsetDateTime::now_utc))
    }

    pub fn with_clock(dir: impl Into<PathBuf>, prefix: impl Into<String>, clock: Clock) -> Self {
        Self { dir: dir.into(), prefix: prefix.into(), clock, current: None }
    }

    pub fn path_for(&self, day: &str) -> PathBuf {
        self.dir.join(format!("{}-{}.txt", self.prefix, day))
    }

    fn file_for(&mut self, now: OffsetDateTime) -> io::Result<&mut File> {
        let day = stamp::day(now);
        let stale = self.current.as_ref().map_or(true, |(d, _)| *d != day);
        if stale {
            fs::create_dir_all(&self.dir)?;
            let path = self.path_for(&day);
            let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
            if f.metadata()?.len() == 0 {
                write_header(&mut f, now)?;
            }
            info!("journal: writing to {}", path.display());
            self.current = Some((day, f));
        }
        match self.current.as_mut() {
            Some((_, f)) => Ok(f),
            None => Err(io::Error::new(io::ErrorKind::Other, "journal file not open")),
        }
    }
}

fn write_header(f: &mut File, now: OffsetDateTime) -> io::Result<()> {
    let rule = "========================================";
    writeln!(f, "{}\nTelemetry Log Started: {} UTC\n{}\n", rule, stamp::clock(now), rule)?;
    f.flush()
}

impl AppendSink for DailyFileSink {
    fn append(&mut self, line: &[u8]) -> io::Result<()> {
        let now = (self.clock)();
        let f = self.file_for(now)?;
        f.write_all(line)?;
        f.write_all(b"\n")?;
        f.flush()
    }
}

enum Job {
    Snapshot(Vec<u8>),
    Note(String),
    Sync(oneshot::Sender<()>),
}

#[derive(Default)]
struct Counters {
    snapshots: AtomicU64,
    failures: AtomicU64,
}

/// Handle to the writer thread. Cloning shares the same thread and counters.
#[derive(Clone)]
pub struct Journal {
    tx: mpsc::UnboundedSender<Job>,
    counters: Arc<Counters>,
    open: Arc<AtomicBool>,
}

impl Journal {
    pub fn spawn(sink: Box<dyn AppendSink>) -> io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let c = counters.clone();
        thread::Builder::new()
            .name("journal-writer".into())
            .spawn(move || write_loop(sink, rx, c))?;
        Ok(Self { tx, counters, open: Arc::new(AtomicBool::new(true)) })
    }

    pub fn open_daily(dir: &Path, prefix: &str) -> io::Result<Self> {
        Self::spawn(Box::new(DailyFileSink::new(dir, prefix)))
    }

    /// Queues one serialized snapshot. Ignored once the journal is closed.
    pub fn snapshot(&self, line: Vec<u8>) {
        if self.is_open() {
            let _ = self.tx.send(Job::Snapshot(line));
        }
    }

    /// Queues a `[HH:MM:SS.mmm] message` line.
    pub fn note(&self, message: &str) {
        if self.is_open() {
            let line = format!("[{}] {}", stamp::clock(OffsetDateTime::now_utc()), message);
            let _ = self.tx.send(Job::Note(line));
        }
    }

    /// Snapshots written successfully so far.
    pub fn writes(&self) -> u64 {
        self.counters.snapshots.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.counters.failures.load(Ordering::Relaxed)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Resolves once everything queued before the call has been written.
    pub async fn sync(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Job::Sync(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Writes a final note and stops accepting lines.
    pub async fn close(&self, message: &str) {
        self.note(message);
        self.open.store(false, Ordering::Release);
        self.sync().await;
    }
}

fn write_loop(mut sink: Box<dyn AppendSink>, mut rx: mpsc::UnboundedReceiver<Job>, counters: Arc<Counters>) {
    while let Some(job) = rx.blocking_recv() {
        match job {
            Job::Snapshot(line) => match sink.append(&line) {
                Ok(()) => {
                    let n = counters.snapshots.fetch_add(1, Ordering::Relaxed) + 1;
                    if n == 1 || n % 10 == 0 {
                        info!("journal: {} telemetry records written", n);
                    }
                }
                Err(e) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    warn!("journal: telemetry write failed: {}", e);
                }
            },
            Job::Note(line) => {
                if let Err(e) = sink.append(line.as_bytes()) {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    warn!("journal: note write failed: {}", e);
                }
            }
            Job::Sync(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("journal: writer stopped");
}
