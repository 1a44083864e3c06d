//! Batch orchestration: discover, convert with fallback, categorise,
//! validate, write chapters, report.
//!
//! ## Per-file lifecycle
//!
//! ```text
//! Discovered ─▶ Converting ─┬─▶ Succeeded ─▶ Categorized ─▶ Validated ─┬─▶ Reported
//!                           └─▶ Failed ───────────────────────────────┘
//! ```
//!
//! Each file is handled by one future that never returns an error: whatever
//! goes wrong inside it ends up in that file's [`ReportEntry`]. The futures
//! run through `buffer_unordered(concurrency)` and the finished entries are
//! put back into discovery order by [`generate`].

use crate::backend::{self, failed_attempt, BackendRegistry};
use crate::categorize::{categorize, Category};
use crate::config::{BatchConfig, OutputFormat};
use crate::document::{ConversionRequest, ConversionResult, SourceDocument};
use crate::discover::discover;
use crate::error::{BatchError, ConversionError};
use crate::events::{BatchEvent, EventKind, EventLog, EventSink, FileState};
use crate::pipeline::postprocess::{front_matter, sanitise_file_stem};
use crate::report::{generate, write_report, BatchReport, ReportEntry, RunMetadata, WrittenReport};
use crate::validate::{validate, QualityScore};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Drives one or more batch runs over a fixed configuration and registry.
pub struct Orchestrator {
    config: Arc<BatchConfig>,
    registry: BackendRegistry,
    sinks: Vec<Arc<dyn EventSink>>,
}

/// Everything one run produced, before persistence.
#[derive(Debug)]
pub struct BatchRun {
    pub report: BatchReport,
    pub metadata: RunMetadata,
    pub events: Vec<BatchEvent>,
}

impl BatchRun {
    /// Persist to `report_dir` (with the temp-dir fallback).
    pub fn write(&self, report_dir: &Path) -> Result<WrittenReport, BatchError> {
        write_report(&self.report, &self.metadata, &self.events, report_dir)
    }

    pub fn exit_code(&self) -> i32 {
        self.report.exit_code()
    }
}

impl Orchestrator {
    /// Orchestrator using the built-in `primary`/`fallback`/`ocr` backends.
    pub fn new(config: BatchConfig) -> Self {
        let registry = BackendRegistry::with_defaults(&config);
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: BatchConfig, registry: BackendRegistry) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            sinks: Vec::new(),
        }
    }

    /// Forward every event of every run to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Run the batch over `config.source_dir`.
    ///
    /// # Errors
    /// Only [`BatchError::FilesystemError`] when the source directory cannot
    /// be listed; no file is touched and no events are recorded in that case.
    pub async fn run(&self) -> Result<BatchRun, BatchError> {
        let started_at = Utc::now();
        let documents = discover(&self.config.source_dir)?;

        let log = self
            .sinks
            .iter()
            .fold(EventLog::new(), |log, sink| log.with_sink(Arc::clone(sink)));
        log.record(
            None,
            None,
            EventKind::RunStarted {
                total: documents.len(),
            },
        );

        let names = chapter_names(&documents);
        let date = front_matter_date(started_at);
        let entries: Vec<ReportEntry> = stream::iter(documents.into_iter().map(|doc| {
            let name = names.get(&doc.index).cloned().unwrap_or_default();
            self.process(doc, name, &date, &log)
        }))
        .buffer_unordered(self.config.concurrency.max(1))
        .collect()
        .await;

        let report = generate(entries);
        log.record(
            None,
            None,
            EventKind::RunFinished {
                succeeded: report.summary.succeeded,
                failed: report.summary.failed,
            },
        );

        let metadata = RunMetadata {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at,
            finished_at: Utc::now(),
            source_dir: self.config.source_dir.clone(),
            output_dir: self.config.output_dir.clone(),
            backend_priority: self.config.backend_priority.clone(),
            settings: self.config.conversion_settings(),
            chapters_written: self.config.write_chapters,
        };

        Ok(BatchRun {
            report,
            metadata,
            events: log.snapshot(),
        })
    }

    /// Take one file from Discovered to Reported.
    async fn process(
        &self,
        document: SourceDocument,
        chapter_name: String,
        date: &str,
        log: &EventLog,
    ) -> ReportEntry {
        let index = document.index;
        let file = document.file_name.clone();
        let document = Arc::new(document);

        log.transition(index, &file, FileState::Discovered, FileState::Converting);
        let result = match &document.read_error {
            Some(detail) => {
                let error = ConversionError::SourceUnreadable {
                    path: document.path.clone(),
                    detail: detail.clone(),
                };
                warn!("{}: {}", file, error);
                log.record(
                    Some(index),
                    Some(&file),
                    EventKind::AttemptFailed {
                        backend: String::new(),
                        error: error.clone(),
                    },
                );
                ConversionResult::not_attempted(error)
            }
            None => self.convert_with_fallback(&document, log).await,
        };
        let document = Arc::unwrap_or_clone(document);

        if !result.succeeded() {
            log.transition(index, &file, FileState::Converting, FileState::Failed);
            log.transition(index, &file, FileState::Failed, FileState::Reported);
            return ReportEntry::failed(document, result);
        }

        log.transition(index, &file, FileState::Converting, FileState::Succeeded);
        let category = categorize(&file, &result.markup, &self.config.categorizer);
        log.transition(index, &file, FileState::Succeeded, FileState::Categorized);
        let quality = validate(&result, &self.config.validator);
        log.transition(index, &file, FileState::Categorized, FileState::Validated);

        let mut entry = ReportEntry {
            document,
            category,
            quality,
            result,
            output_path: None,
        };

        if self.config.write_chapters {
            let path = self.chapter_path(category, &chapter_name);
            match self.write_chapter(&path, &entry, date).await {
                Ok(()) => {
                    log.record(
                        Some(index),
                        Some(&file),
                        EventKind::ChapterWritten { path: path.clone() },
                    );
                    entry.output_path = Some(path);
                }
                Err(error) => {
                    log.record(
                        Some(index),
                        Some(&file),
                        EventKind::AttemptFailed {
                            backend: entry.result.backend.clone().unwrap_or_default(),
                            error: error.clone(),
                        },
                    );
                    entry.result = entry.result.into_failure(error);
                    entry.category = Category::Uncategorized;
                    entry.quality = QualityScore::zero();
                }
            }
        }

        log.transition(index, &file, FileState::Validated, FileState::Reported);
        entry
    }

    /// Try each backend of `backend_priority` in order until one succeeds.
    ///
    /// The returned result carries every attempt and the total elapsed time.
    /// Names missing from the registry count as unavailable attempts.
    pub async fn convert_with_fallback(
        &self,
        document: &Arc<SourceDocument>,
        log: &EventLog,
    ) -> ConversionResult {
        let start = Instant::now();
        let settings = self.config.conversion_settings();
        let mut attempts = Vec::new();
        let mut last: Option<ConversionResult> = None;

        for (i, name) in self.config.backend_priority.iter().enumerate() {
            log.record(
                Some(document.index),
                Some(&document.file_name),
                EventKind::AttemptStarted {
                    backend: name.clone(),
                    attempt: i + 1,
                },
            );

            let result = match self.registry.get(name) {
                Some(b) => {
                    let request = ConversionRequest {
                        document: Arc::clone(document),
                        backend: name.clone(),
                        settings: settings.clone(),
                    };
                    backend::convert(b.as_ref(), &request).await
                }
                None => failed_attempt(
                    name.clone(),
                    ConversionError::BackendUnavailable {
                        backend: name.clone(),
                        reason: "not registered".into(),
                    },
                    0,
                ),
            };
            attempts.extend(result.attempts.iter().cloned());

            if result.succeeded() {
                info!(
                    "{}: converted by '{}' ({} attempt(s))",
                    document.file_name,
                    name,
                    attempts.len()
                );
                return ConversionResult {
                    attempts,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    ..result
                };
            }

            if let Some(error) = &result.error {
                log.record(
                    Some(document.index),
                    Some(&document.file_name),
                    EventKind::AttemptFailed {
                        backend: name.clone(),
                        error: error.clone(),
                    },
                );
            }
            last = Some(result);
        }

        let mut result = last.unwrap_or_else(|| {
            failed_attempt(
                String::new(),
                ConversionError::BackendUnavailable {
                    backend: String::new(),
                    reason: "no backend configured".into(),
                },
                0,
            )
        });
        warn!(
            "{}: all {} backend(s) failed",
            document.file_name,
            attempts.len()
        );
        if !attempts.is_empty() {
            result.attempts = attempts;
        }
        result.elapsed_ms = start.elapsed().as_millis() as u64;
        result
    }

    fn chapter_path(&self, category: Category, name: &str) -> PathBuf {
        self.config
            .output_dir
            .join(category.as_str())
            .join(format!("{}.{}", name, self.config.output_format.extension()))
    }

    async fn write_chapter(
        &self,
        path: &Path,
        entry: &ReportEntry,
        date: &str,
    ) -> Result<(), ConversionError> {
        let mut content = String::new();
        if self.config.output_format == OutputFormat::Quarto && self.config.add_front_matter {
            content.push_str(&front_matter(
                entry.document.stem(),
                entry.category.as_str(),
                date,
            ));
        }
        content.push_str(&entry.result.markup);

        let write_err = |e: std::io::Error| ConversionError::OutputWriteFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, content.as_bytes())
            .await
            .map_err(write_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(write_err)
    }
}

/// Sanitised chapter file names, unique across the run.
///
/// Assigned in discovery order so a clash (`a b.pdf` vs `a-b.pdf`) always
/// resolves the same way: the later file gets `_2`, `_3`, …. A suffixed
/// candidate is checked against every name already handed out, so a source
/// literally named `a_b_2.pdf` cannot collide with a renamed `a-b.pdf`.
fn chapter_names(documents: &[SourceDocument]) -> HashMap<usize, String> {
    let mut taken: HashSet<String> = HashSet::new();
    documents
        .iter()
        .map(|doc| {
            let base = sanitise_file_stem(doc.stem());
            let mut name = base.clone();
            let mut n = 1;
            while !taken.insert(name.to_lowercase()) {
                n += 1;
                name = format!("{}_{}", base, n);
            }
            (doc.index, name)
        })
        .collect()
}

/// Convenience: build an [`Orchestrator`] with the default backends and run it.
pub async fn run_batch(config: BatchConfig) -> Result<BatchRun, BatchError> {
    Orchestrator::new(config).run().await
}

/// When the run started, as the date stamped into front matter.
pub fn front_matter_date(started_at: DateTime<Utc>) -> String {
    started_at.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(index: usize, name: &str) -> SourceDocument {
        SourceDocument {
            index,
            path: PathBuf::from(name),
            file_name: name.to_string(),
            size_bytes: 0,
            sha256: String::new(),
            read_error: None,
        }
    }

    #[test]
    fn chapter_names_are_unique_and_stable() {
        let docs = vec![doc(0, "a b.pdf"), doc(1, "a-b.pdf"), doc(2, "c.pdf"), doc(3, "A_B.pdf")];
        let names = chapter_names(&docs);
        assert_eq!(names[&0], "a_b");
        assert_eq!(names[&1], "a_b_2");
        assert_eq!(names[&2], "c");
        assert_eq!(names[&3], "A_B_3");
    }

    #[test]
    fn suffixed_name_never_reuses_a_literal_source_name() {
        let docs = vec![doc(0, "a b.pdf"), doc(1, "a-b.pdf"), doc(2, "a_b_2.pdf")];
        let names = chapter_names(&docs);
        assert_eq!(names[&0], "a_b");
        assert_eq!(names[&1], "a_b_2");
        assert_eq!(names[&2], "a_b_2_2");

        let lowered: HashSet<String> = names.values().map(|n| n.to_lowercase()).collect();
        assert_eq!(lowered.len(), docs.len());
    }

    #[test]
    fn chapter_path_uses_category_dir_and_extension() {
        let config = BatchConfig::builder().output_dir("out").build().unwrap();
        let orch = Orchestrator::with_registry(config, BackendRegistry::new());
        assert_eq!(
            orch.chapter_path(Category::Statistics, "stats_basics"),
            PathBuf::from("out/statistics/stats_basics.qmd")
        );
    }

    #[test]
    fn front_matter_date_format() {
        let t = DateTime::parse_from_rfc3339("2026-03-04T05:06:07Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(front_matter_date(t), "2026-03-04");
    }
}
