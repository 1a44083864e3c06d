//! Batch report: generation, summary counts and persistence.
//!
//! [`generate`] is deterministic: entries are ordered by discovery index and
//! every count lives in a `BTreeMap`, so the same entries always produce the
//! same serialised summary. Anything time-dependent (timestamps, events) is
//! kept in [`RunMetadata`] and the event list, outside the summary.
//!
//! ## Files
//!
//! ```text
//! <report_dir>/batch_report_<YYYYmmdd_HHMMSS_mmm>.json   metadata + summary + entries + events
//! <report_dir>/batch_report_<YYYYmmdd_HHMMSS_mmm>.csv    one row per file
//! ```
//!
//! The timestamp has millisecond resolution. A report is never overwritten:
//! when the name is already taken a `_2`, `_3`, … suffix is appended.
//!
//! If `<report_dir>` cannot be written the same files go to
//! `<tmp>/pdf2chapters-reports`; only when that fails too is the run's
//! record lost and [`BatchError::ReportWriteError`] returned.

use crate::categorize::Category;
use crate::config::ConversionSettings;
use crate::document::{ConversionResult, Outcome, SourceDocument};
use crate::error::BatchError;
use crate::events::BatchEvent;
use crate::validate::{ChapterValidation, QualityScore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ── Exit codes ───────────────────────────────────────────────────────────────

/// Every file succeeded (or there were none).
pub const EXIT_OK: i32 = 0;
/// The batch ran to completion but at least one file failed.
pub const EXIT_FAILURES: i32 = 1;
/// The batch could not run (missing source directory, invalid config).
pub const EXIT_FATAL: i32 = 2;
/// The report could not be written, not even to the fallback location.
pub const EXIT_REPORT_UNWRITABLE: i32 = 3;

// ── Records ──────────────────────────────────────────────────────────────────

/// One file's line in the report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub document: SourceDocument,
    pub category: Category,
    pub quality: QualityScore,
    pub result: ConversionResult,
    /// Written chapter file; `None` on failure or in dry-run mode.
    pub output_path: Option<PathBuf>,
}

impl ReportEntry {
    /// Entry for a file whose conversion failed.
    pub fn failed(document: SourceDocument, result: ConversionResult) -> Self {
        Self {
            document,
            category: Category::Uncategorized,
            quality: QualityScore::zero(),
            result,
            output_path: None,
        }
    }

    pub fn status(&self) -> Outcome {
        self.result.outcome
    }
}

/// Run-level counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// All four categories, zero counts included.
    pub by_category: BTreeMap<Category, usize>,
    /// Failed files per final error kind.
    pub by_failure_kind: BTreeMap<String, usize>,
    pub total_attempts: usize,
    /// Mean quality score over all files; 0 for an empty run.
    pub mean_score: f64,
}

/// Ordered entries plus their summary.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub summary: Summary,
    pub entries: Vec<ReportEntry>,
}

impl BatchReport {
    pub fn exit_code(&self) -> i32 {
        if self.summary.failed > 0 {
            EXIT_FAILURES
        } else {
            EXIT_OK
        }
    }
}

/// Context of one run, recorded next to the report.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub tool_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub backend_priority: Vec<String>,
    pub settings: ConversionSettings,
    pub chapters_written: bool,
}

// ── Generation ───────────────────────────────────────────────────────────────

/// Order entries by discovery index and compute the summary.
pub fn generate(mut entries: Vec<ReportEntry>) -> BatchReport {
    entries.sort_by_key(|e| e.document.index);
    BatchReport {
        summary: summarize(&entries),
        entries,
    }
}

pub fn summarize(entries: &[ReportEntry]) -> Summary {
    let mut by_category: BTreeMap<Category, usize> =
        Category::ALL.iter().map(|c| (*c, 0)).collect();
    let mut by_failure_kind = BTreeMap::new();
    let mut succeeded = 0;
    let mut total_attempts = 0;
    let mut score_sum: u64 = 0;

    for entry in entries {
        *by_category.entry(entry.category).or_default() += 1;
        total_attempts += entry.result.attempt_count();
        score_sum += u64::from(entry.quality.score);
        match (&entry.result.outcome, &entry.result.error) {
            (Outcome::Succeeded, _) => succeeded += 1,
            (Outcome::Failed, Some(err)) => {
                *by_failure_kind.entry(err.kind().to_string()).or_default() += 1
            }
            (Outcome::Failed, None) => *by_failure_kind.entry("Unknown".into()).or_default() += 1,
        }
    }

    let total = entries.len();
    Summary {
        total,
        succeeded,
        failed: total - succeeded,
        by_category,
        by_failure_kind,
        total_attempts,
        mean_score: if total == 0 {
            0.0
        } else {
            (score_sum as f64 / total as f64 * 10.0).round() / 10.0
        },
    }
}

// ── Persistence ──────────────────────────────────────────────────────────────

/// Where the report files ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenReport {
    pub json: PathBuf,
    pub csv: PathBuf,
    /// True when the primary directory failed and the temp fallback was used.
    pub used_fallback: bool,
}

#[derive(Serialize)]
struct PersistedReport<'a> {
    metadata: &'a RunMetadata,
    summary: &'a Summary,
    entries: &'a [ReportEntry],
    events: &'a [BatchEvent],
}

#[derive(Serialize)]
struct CsvRow<'a> {
    filename: &'a str,
    status: &'a str,
    category: &'a str,
    score: u8,
    error: String,
    backend: &'a str,
    attempts: usize,
    elapsed_ms: u64,
    issues: String,
}

/// Location used when the configured report directory is unwritable.
pub fn fallback_report_dir() -> PathBuf {
    std::env::temp_dir().join("pdf2chapters-reports")
}

/// Persist a batch report as JSON + CSV.
pub fn write_report(
    report: &BatchReport,
    metadata: &RunMetadata,
    events: &[BatchEvent],
    report_dir: &Path,
) -> Result<WrittenReport, BatchError> {
    let json = serde_json::to_vec_pretty(&PersistedReport {
        metadata,
        summary: &report.summary,
        entries: &report.entries,
        events,
    })
    .map_err(|e| BatchError::Internal(format!("report serialisation: {e}")))?;

    let rows = report.entries.iter().map(|e| CsvRow {
        filename: &e.document.file_name,
        status: e.result.outcome.as_str(),
        category: e.category.as_str(),
        score: e.quality.score,
        error: e
            .result
            .error
            .as_ref()
            .map(|err| format!("{}: {}", err.kind(), err))
            .unwrap_or_default(),
        backend: e.result.backend.as_deref().unwrap_or(""),
        attempts: e.result.attempt_count(),
        elapsed_ms: e.result.elapsed_ms,
        issues: e.quality.issues_line(),
    });
    let csv = to_csv(rows)?;

    let stem = format!("batch_report_{}", metadata.finished_at.format(STAMP_FORMAT));
    persist(report_dir, &fallback_report_dir(), &stem, &json, &csv)
}

/// Summary of a `--validate-only` pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub unreadable: usize,
    pub mean_score: f64,
    /// Files scoring below 50.
    pub below_50: usize,
    pub total_words: usize,
    pub total_equations: usize,
    /// Keyed by the chapter's parent directory name.
    pub by_category: BTreeMap<String, CategoryStats>,
}

/// Validation totals for one category directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryStats {
    pub files: usize,
    pub mean_score: f64,
    pub words: usize,
    pub equations: usize,
}

impl ValidationSummary {
    pub fn from_results(results: &[ChapterValidation]) -> Self {
        let mut groups: BTreeMap<&str, Vec<&ChapterValidation>> = BTreeMap::new();
        for r in results {
            groups.entry(r.category.as_str()).or_default().push(r);
        }
        let by_category = groups
            .into_iter()
            .map(|(category, rows)| {
                let stats = CategoryStats {
                    files: rows.len(),
                    mean_score: mean_score(rows.iter().copied()),
                    words: rows.iter().map(|r| r.words).sum(),
                    equations: rows.iter().map(|r| r.equations).sum(),
                };
                (category.to_string(), stats)
            })
            .collect();

        Self {
            total: results.len(),
            unreadable: results.iter().filter(|r| r.error.is_some()).count(),
            mean_score: mean_score(results.iter()),
            below_50: results.iter().filter(|r| r.quality.score < 50).count(),
            total_words: results.iter().map(|r| r.words).sum(),
            total_equations: results.iter().map(|r| r.equations).sum(),
            by_category,
        }
    }

    /// Non-zero when any chapter could not be read.
    pub fn exit_code(&self) -> i32 {
        if self.unreadable > 0 {
            EXIT_FAILURES
        } else {
            EXIT_OK
        }
    }
}

/// Persist the result of re-validating an existing chapters directory.
pub fn write_validation_report(
    results: &[ChapterValidation],
    generated_at: DateTime<Utc>,
    report_dir: &Path,
) -> Result<WrittenReport, BatchError> {
    #[derive(Serialize)]
    struct Persisted<'a> {
        generated_at: DateTime<Utc>,
        summary: ValidationSummary,
        chapters: &'a [ChapterValidation],
    }

    #[derive(Serialize)]
    struct Row<'a> {
        filename: String,
        category: &'a str,
        score: u8,
        words: usize,
        equations: usize,
        issues: String,
        error: &'a str,
    }

    let json = serde_json::to_vec_pretty(&Persisted {
        generated_at,
        summary: ValidationSummary::from_results(results),
        chapters: results,
    })
    .map_err(|e| BatchError::Internal(format!("report serialisation: {e}")))?;

    let csv = to_csv(results.iter().map(|r| Row {
        filename: r
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        category: &r.category,
        score: r.quality.score,
        words: r.words,
        equations: r.equations,
        issues: r.quality.issues_line(),
        error: r.error.as_deref().unwrap_or(""),
    }))?;

    let stem = format!("validation_report_{}", generated_at.format(STAMP_FORMAT));
    persist(report_dir, &fallback_report_dir(), &stem, &json, &csv)
}

/// Mean score rounded to one decimal; 0 for no chapters.
fn mean_score<'a>(results: impl Iterator<Item = &'a ChapterValidation>) -> f64 {
    let (count, sum) = results.fold((0u64, 0u64), |(n, s), r| {
        (n + 1, s + u64::from(r.quality.score))
    });
    if count == 0 {
        0.0
    } else {
        (sum as f64 / count as f64 * 10.0).round() / 10.0
    }
}

fn to_csv<T: Serialize>(rows: impl Iterator<Item = T>) -> Result<Vec<u8>, BatchError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| BatchError::Internal(format!("csv row: {e}")))?;
    }
    writer
        .into_inner()
        .map_err(|e| BatchError::Internal(format!("csv flush: {e}")))
}

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Write `<stem>.json` and `<stem>.csv` into `dir`, else into `fallback`.
fn persist(
    dir: &Path,
    fallback: &Path,
    stem: &str,
    json: &[u8],
    csv: &[u8],
) -> Result<WrittenReport, BatchError> {
    let primary_err = match write_pair(dir, stem, json, csv) {
        Ok((json, csv)) => {
            info!("Report written to {}", json.display());
            return Ok(WrittenReport {
                json,
                csv,
                used_fallback: false,
            });
        }
        Err(e) => e,
    };

    warn!(
        "Cannot write report to {} ({}); trying {}",
        dir.display(),
        primary_err,
        fallback.display()
    );
    match write_pair(fallback, stem, json, csv) {
        Ok((json, csv)) => {
            info!("Report written to {}", json.display());
            Ok(WrittenReport {
                json,
                csv,
                used_fallback: true,
            })
        }
        Err(e) => Err(BatchError::ReportWriteError {
            primary: dir.to_path_buf(),
            fallback: fallback.to_path_buf(),
            detail: format!("{primary_err}; fallback: {e}"),
        }),
    }
}

fn write_pair(
    dir: &Path,
    stem: &str,
    json: &[u8],
    csv: &[u8],
) -> std::io::Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let stem = free_stem(dir, stem);
    let json_path = dir.join(format!("{stem}.json"));
    let csv_path = dir.join(format!("{stem}.csv"));
    write_atomic(&json_path, json)?;
    write_atomic(&csv_path, csv)?;
    Ok((json_path, csv_path))
}

/// `stem`, or `stem_N` for the first N ≥ 2 whose files do not exist yet.
fn free_stem(dir: &Path, stem: &str) -> String {
    let taken = |s: &str| {
        dir.join(format!("{s}.json")).exists() || dir.join(format!("{s}.csv")).exists()
    };
    if !taken(stem) {
        return stem.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{stem}_{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Write to a sibling temp file, then rename over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
