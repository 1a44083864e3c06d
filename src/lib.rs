//! # pdf2chapters
//!
//! Batch-convert a directory of PDF books into categorised Markdown/Quarto
//! chapters, with backend fallback, quality scoring and a per-run report.
//!
//! ## Why this crate?
//!
//! Converting a shelf of mathematical PDFs is rarely a single-tool job: a
//! neural converter handles equations best but crashes or hangs on some
//! files, the PDF text layer always works but loses math, and a vision LLM
//! sits in between. This crate tries backends in priority order per file,
//! records every attempt, files each chapter under a subject category and
//! scores how much structure survived, so a single run tells you what to
//! fix by hand.
//!
//! ## Pipeline Overview
//!
//! ```text
//! source dir
//!  │
//!  ├─ 1. Discover    *.pdf, sorted, hashed
//!  ├─ 2. Convert     primary ─▶ fallback ─▶ ocr (first success wins, per-attempt timeout)
//!  ├─ 3. Polish      chapter headings, equation and layout cleanup, structural elements
//!  ├─ 4. Categorize  keyword scoring over file name and content sample
//!  ├─ 5. Validate    0–100 score: structure, math density, references, artifacts
//!  ├─ 6. Write       <output>/<category>/<name>.qmd with front matter
//!  └─ 7. Report      batch_report_<timestamp>.json / .csv (millisecond stamp)
//! ```
//!
//! Files are independent: one file failing never aborts the batch. Only an
//! unreadable source directory or an invalid configuration does.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2chapters::{BatchConfig, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BatchConfig::builder()
//!         .source_dir("source_pdfs")
//!         .output_dir("chapters")
//!         .backend_priority(["fallback"])
//!         .build()?;
//!
//!     let run = Orchestrator::new(config).run().await?;
//!     for entry in &run.report.entries {
//!         println!("{} -> {} ({})",
//!             entry.document.file_name, entry.category, entry.quality.score);
//!     }
//!     run.write("reports".as_ref())?;
//!     std::process::exit(run.exit_code());
//! }
//! ```
//!
//! ## Backends
//!
//! | Name       | Implementation | Needs |
//! |------------|----------------|-------|
//! | `primary`  | [`backend::command::CommandBackend`] | an external converter on `PATH` (default `nougat`) |
//! | `fallback` | [`backend::text_layer::TextLayerBackend`] | the pdfium shared library |
//! | `ocr`      | [`backend::vision::VisionBackend`] | pdfium + an LLM API key |
//!
//! Custom backends implement [`ConversionBackend`] and are registered in a
//! [`BackendRegistry`] passed to [`Orchestrator::with_registry`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2chapters` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf2chapters = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod categorize;
pub mod config;
pub mod discover;
pub mod document;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod report;
pub mod validate;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{BackendRegistry, ConversionBackend};
pub use categorize::{categorize, Category};
pub use config::{
    BatchConfig, BatchConfigBuilder, CategorizerConfig, CategoryKeywords, ChapterPatterns,
    CommandConfig, ConfigFile, ConversionSettings, OutputFormat, ValidatorConfig, VisionConfig,
};
pub use discover::discover;
pub use document::{
    Attempt, ConversionRequest, ConversionResult, Outcome, SourceDocument, StructuralElement,
};
pub use error::{BatchError, ConversionError};
pub use events::{BatchEvent, EventKind, EventSink, FileState};
pub use orchestrator::{run_batch, BatchRun, Orchestrator};
pub use report::{generate, BatchReport, ReportEntry, Summary};
pub use validate::{validate, validate_chapter_dir, QualityIssue, QualityScore};
