//! Run event stream.
//!
//! Every per-file state transition and every backend attempt is appended to
//! an [`EventLog`] as a timestamped [`BatchEvent`] with a monotonically
//! increasing sequence number. The same stream feeds three consumers:
//!
//! - the JSON report (the full ordered list),
//! - `tracing` (each event is logged as it is recorded),
//! - any number of [`EventSink`]s, e.g. the CLI progress bar.
//!
//! # Example
//!
//! ```rust
//! use pdf2chapters::events::{BatchEvent, EventKind, EventLog, EventSink};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl EventSink for Counter {
//!     fn on_event(&self, _event: &BatchEvent) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(Counter(AtomicUsize::new(0)));
//! let log = EventLog::new().with_sink(counter.clone());
//! log.record(None, None, EventKind::RunStarted { total: 0 });
//! assert_eq!(counter.0.load(Ordering::SeqCst), 1);
//! ```

use crate::error::ConversionError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Per-file lifecycle state.
///
/// ```text
/// Discovered → Converting → Succeeded → Categorized → Validated → Reported
///                         ↘ Failed ──────────────────────────────↗
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Discovered,
    Converting,
    Succeeded,
    Failed,
    Categorized,
    Validated,
    Reported,
}

impl FileState {
    /// Whether `self → next` is an edge of the lifecycle.
    pub fn can_advance_to(self, next: FileState) -> bool {
        use FileState::*;
        matches!(
            (self, next),
            (Discovered, Converting)
                | (Converting, Succeeded)
                | (Converting, Failed)
                | (Succeeded, Categorized)
                | (Categorized, Validated)
                | (Validated, Reported)
                | (Failed, Reported)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == FileState::Reported
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileState::Discovered => "discovered",
            FileState::Converting => "converting",
            FileState::Succeeded => "succeeded",
            FileState::Failed => "failed",
            FileState::Categorized => "categorized",
            FileState::Validated => "validated",
            FileState::Reported => "reported",
        };
        f.write_str(s)
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    RunStarted {
        total: usize,
    },
    StateChanged {
        from: FileState,
        to: FileState,
    },
    AttemptStarted {
        backend: String,
        /// 1-based attempt number for this file.
        attempt: usize,
    },
    AttemptFailed {
        backend: String,
        error: ConversionError,
    },
    ChapterWritten {
        path: PathBuf,
    },
    RunFinished {
        succeeded: usize,
        failed: usize,
    },
}

/// One entry of the event stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEvent {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// Discovery index of the file concerned; `None` for run-level events.
    pub file_index: Option<usize>,
    pub file: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Receives events as they are recorded.
///
/// Called from concurrent file tasks, hence `Send + Sync`. The default
/// implementation ignores everything.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &BatchEvent) {
        let _ = event;
    }
}

/// A sink that ignores all events.
pub struct NoopSink;

impl EventSink for NoopSink {}

/// Append-only, thread-safe event stream.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<BatchEvent>>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Append an event and forward it to `tracing` and every sink.
    ///
    /// The sequence number is assigned under the lock, so `seq` order equals
    /// append order.
    pub fn record(&self, file_index: Option<usize>, file: Option<&str>, kind: EventKind) {
        let event = {
            let mut events = self.events.lock().unwrap_or_else(|p| p.into_inner());
            let event = BatchEvent {
                seq: events.len() as u64,
                timestamp: Utc::now(),
                file_index,
                file: file.map(str::to_string),
                kind,
            };
            events.push(event.clone());
            event
        };
        trace_event(&event);
        for sink in &self.sinks {
            sink.on_event(&event);
        }
    }

    /// Record a per-file state transition.
    pub fn transition(&self, file_index: usize, file: &str, from: FileState, to: FileState) {
        debug_assert!(from.can_advance_to(to), "illegal transition {from} → {to}");
        self.record(
            Some(file_index),
            Some(file),
            EventKind::StateChanged { from, to },
        );
    }

    /// Copy of the stream recorded so far.
    pub fn snapshot(&self) -> Vec<BatchEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn trace_event(event: &BatchEvent) {
    let file = event.file.as_deref().unwrap_or("-");
    match &event.kind {
        EventKind::RunStarted { total } => info!("Batch started: {} file(s)", total),
        EventKind::StateChanged { from, to } => debug!("{}: {} → {}", file, from, to),
        EventKind::AttemptStarted { backend, attempt } => {
            debug!("{}: attempt {} with '{}'", file, attempt, backend)
        }
        EventKind::AttemptFailed { error, .. } => warn!("{}: {}", file, error),
        EventKind::ChapterWritten { path } => info!("{}: wrote {}", file, path.display()),
        EventKind::RunFinished { succeeded, failed } => {
            info!("Batch finished: {} succeeded, {} failed", succeeded, failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        seen: AtomicUsize,
    }

    impl EventSink for CountingSink {
        fn on_event(&self, _event: &BatchEvent) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn lifecycle_edges() {
        use FileState::*;
        assert!(Discovered.can_advance_to(Converting));
        assert!(Converting.can_advance_to(Failed));
        assert!(Failed.can_advance_to(Reported));
        assert!(!Failed.can_advance_to(Categorized));
        assert!(!Discovered.can_advance_to(Succeeded));
        assert!(Reported.is_terminal());
        assert!(!Validated.is_terminal());
    }

    #[test]
    fn sequence_numbers_increase() {
        let log = EventLog::new();
        log.record(None, None, EventKind::RunStarted { total: 1 });
        log.transition(0, "a.pdf", FileState::Discovered, FileState::Converting);
        log.record(
            None,
            None,
            EventKind::RunFinished {
                succeeded: 0,
                failed: 1,
            },
        );
        let seqs: Vec<u64> = log.snapshot().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn sinks_receive_every_event() {
        let sink = Arc::new(CountingSink {
            seen: AtomicUsize::new(0),
        });
        let log = EventLog::new()
            .with_sink(sink.clone())
            .with_sink(Arc::new(NoopSink));
        log.record(None, None, EventKind::RunStarted { total: 2 });
        log.transition(1, "b.pdf", FileState::Discovered, FileState::Converting);
        assert_eq!(sink.seen.load(Ordering::SeqCst), 2);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn event_serialises_flat() {
        let log = EventLog::new();
        log.transition(3, "c.pdf", FileState::Converting, FileState::Succeeded);
        let json = serde_json::to_value(&log.snapshot()[0]).unwrap();
        assert_eq!(json["event"], "state_changed");
        assert_eq!(json["from"], "converting");
        assert_eq!(json["to"], "succeeded");
        assert_eq!(json["file_index"], 3);
    }

    #[tokio::test]
    async fn concurrent_records_keep_unique_seqs() {
        let log = Arc::new(EventLog::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    log.record(
                        Some(i),
                        Some("x.pdf"),
                        EventKind::AttemptStarted {
                            backend: "fallback".into(),
                            attempt: 1,
                        },
                    );
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let mut seqs: Vec<u64> = log.snapshot().iter().map(|e| e.seq).collect();
        seqs.dedup();
        assert_eq!(seqs.len(), 80);
    }
}
