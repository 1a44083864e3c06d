//! CLI binary for pdf2chapters.
//!
//! A thin shim over the library crate: flags and an optional JSON config
//! file become a `BatchConfig`, the batch runs, and the outcome is printed
//! and turned into the process exit code (0 ok, 1 some files failed,
//! 2 could not run, 3 report unwritable).

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2chapters::events::{BatchEvent, EventKind, EventSink, FileState};
use pdf2chapters::report::{
    write_validation_report, ValidationSummary, EXIT_FATAL, EXIT_REPORT_UNWRITABLE,
};
use pdf2chapters::{
    validate_chapter_dir, BatchConfig, BatchError, BatchReport, Orchestrator,
    OutputFormat, ReportEntry,
};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── Progress bar as an event sink ────────────────────────────────────────────

/// Advances one tick per file reaching `Reported`; prints failed attempts
/// above the bar.
struct CliProgressSink {
    bar: ProgressBar,
}

impl CliProgressSink {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Scanning");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl EventSink for CliProgressSink {
    fn on_event(&self, event: &BatchEvent) {
        let file = event.file.as_deref().unwrap_or("");
        match &event.kind {
            EventKind::RunStarted { total } => {
                self.bar.set_length(*total as u64);
                self.bar.set_prefix("Converting");
            }
            EventKind::AttemptStarted { backend, .. } => {
                self.bar.set_message(format!("{file} → {backend}"));
            }
            EventKind::AttemptFailed { error, .. } => {
                self.bar
                    .println(format!("  {} {}  {}", yellow("↻"), file, dim(&error.to_string())));
            }
            EventKind::StateChanged {
                to: FileState::Reported,
                ..
            } => self.bar.inc(1),
            EventKind::RunFinished { .. } => self.bar.finish_and_clear(),
            _ => {}
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert ./source_pdfs into ./chapters/<category>/*.qmd
  pdf2chapters

  # Only the text-layer backend, plain Markdown, custom directories
  pdf2chapters --backends fallback --format markdown -s books -o out

  # Load settings from a file, override the timeout
  pdf2chapters --config automation/config.json --timeout 300

  # Score existing chapters without converting anything
  pdf2chapters --validate-only -o chapters

BACKENDS:
  primary   external converter (default: nougat) run as a subprocess
  fallback  PDF text layer via pdfium
  ocr       page images transcribed by a vision LLM
            (OPENAI_API_KEY / ANTHROPIC_API_KEY / --provider)

EXIT CODES:
  0  every file converted (or no PDFs found)
  1  the batch finished but some files failed
  2  the batch could not run (missing source directory, bad config)
  3  the report could not be written, even to the temp-dir fallback
"#;

/// Batch-convert PDF books into categorised Markdown/Quarto chapters.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2chapters",
    version,
    about = "Batch-convert PDF books into categorised Markdown/Quarto chapters",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// JSON configuration file; flags override its values.
    #[arg(short, long, env = "PDF2CHAPTERS_CONFIG")]
    config: Option<PathBuf>,

    /// Directory scanned for PDFs (non-recursive).
    #[arg(short, long, env = "PDF2CHAPTERS_SOURCE_DIR")]
    source_dir: Option<PathBuf>,

    /// Root of the chapter tree.
    #[arg(short, long, env = "PDF2CHAPTERS_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Directory for the JSON/CSV report.
    #[arg(short, long, env = "PDF2CHAPTERS_REPORT_DIR")]
    report_dir: Option<PathBuf>,

    /// Backends in priority order, comma-separated (primary,fallback,ocr).
    #[arg(short, long, env = "PDF2CHAPTERS_BACKENDS", value_delimiter = ',')]
    backends: Option<Vec<String>>,

    /// Per-backend timeout in seconds.
    #[arg(short, long, env = "PDF2CHAPTERS_TIMEOUT")]
    timeout: Option<u64>,

    /// Files converted at the same time.
    #[arg(short = 'j', long, env = "PDF2CHAPTERS_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Expected equations per 1000 characters.
    #[arg(long, env = "PDF2CHAPTERS_DENSITY_THRESHOLD")]
    density_threshold: Option<f64>,

    /// Chapter format.
    #[arg(long, env = "PDF2CHAPTERS_FORMAT", value_enum)]
    format: Option<FormatArg>,

    /// Keep LaTeX math delimiters as the backend produced them.
    #[arg(long, env = "PDF2CHAPTERS_NO_EQUATION_CLEANUP")]
    no_equation_cleanup: bool,

    /// Do not prepend Quarto front matter.
    #[arg(long, env = "PDF2CHAPTERS_NO_FRONT_MATTER")]
    no_front_matter: bool,

    /// Executable used by the `primary` backend.
    #[arg(long, env = "PDF2CHAPTERS_CONVERTER")]
    converter: Option<String>,

    /// LLM model for the `ocr` backend (e.g. gpt-4.1-nano).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider for the `ocr` backend: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Convert, categorise and score, but write no chapter files.
    #[arg(long)]
    dry_run: bool,

    /// Score the chapters already under the output directory and exit.
    #[arg(long)]
    validate_only: bool,

    /// Print the run summary as JSON on stdout.
    #[arg(long, env = "PDF2CHAPTERS_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2CHAPTERS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2CHAPTERS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2CHAPTERS_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Markdown,
    Quarto,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Markdown => OutputFormat::Markdown,
            FormatArg::Quarto => OutputFormat::Quarto,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.validate_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match run(cli, show_progress).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("{} {:#}", red("✘"), e);
            ExitCode::from(EXIT_FATAL as u8)
        }
    }
}

async fn run(cli: Cli, show_progress: bool) -> Result<i32> {
    let config = build_config(&cli)?;

    if cli.validate_only {
        return validate_only(&cli, &config);
    }

    let report_dir = config.report_dir.clone();
    let mut orchestrator = Orchestrator::new(config);
    if show_progress {
        orchestrator = orchestrator.with_sink(CliProgressSink::new());
    }

    let batch = orchestrator.run().await.context("Batch could not start")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&batch.report.summary)
                .context("Failed to serialize summary")?
        );
    } else if !cli.quiet {
        print_entries(&batch.report.entries);
    }

    let written = batch.write(&report_dir);
    if !cli.quiet {
        print_summary(&batch.report);
    }
    match written {
        Ok(paths) => {
            if !cli.quiet {
                let note = if paths.used_fallback {
                    yellow(" (fallback location)")
                } else {
                    String::new()
                };
                eprintln!("{} {}{}", dim("report:"), paths.json.display(), note);
            }
            Ok(batch.exit_code())
        }
        Err(e @ BatchError::ReportWriteError { .. }) => {
            eprintln!("{} {}", red("✘"), e);
            Ok(EXIT_REPORT_UNWRITABLE)
        }
        Err(e) => Err(e).context("Failed to write report"),
    }
}

fn build_config(cli: &Cli) -> Result<BatchConfig> {
    let mut builder = BatchConfig::builder();
    if let Some(ref path) = cli.config {
        builder = builder.config_file(path)?;
    }
    if let Some(ref dir) = cli.source_dir {
        builder = builder.source_dir(dir);
    }
    if let Some(ref dir) = cli.output_dir {
        builder = builder.output_dir(dir);
    }
    if let Some(ref dir) = cli.report_dir {
        builder = builder.report_dir(dir);
    }
    if let Some(ref names) = cli.backends {
        builder = builder.backend_priority(names.iter().map(|s| s.trim().to_string()));
    }
    if let Some(secs) = cli.timeout {
        builder = builder.timeout_secs(secs);
    }
    if let Some(n) = cli.concurrency {
        builder = builder.concurrency(n);
    }
    if let Some(t) = cli.density_threshold {
        builder = builder.equation_density_threshold(t);
    }
    if let Some(format) = cli.format {
        builder = builder.output_format(format.into());
    }
    if cli.no_equation_cleanup {
        builder = builder.equation_cleanup(false);
    }
    if cli.no_front_matter {
        builder = builder.add_front_matter(false);
    }
    if cli.dry_run {
        builder = builder.write_chapters(false);
    }
    if let Some(ref program) = cli.converter {
        builder = builder.command_program(program.clone());
    }

    let mut config = builder.build()?;
    if cli.model.is_some() {
        config.vision.model = cli.model.clone();
    }
    if cli.provider.is_some() {
        config.vision.provider_name = cli.provider.clone();
    }
    Ok(config)
}

fn validate_only(cli: &Cli, config: &BatchConfig) -> Result<i32> {
    let results = validate_chapter_dir(&config.output_dir, &config.validator);
    let summary = ValidationSummary::from_results(&results);

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
        );
    } else if !cli.quiet {
        for r in &results {
            let score = r.quality.score.to_string();
            let mark = if r.error.is_some() {
                red("✗")
            } else if r.quality.score >= 50 {
                green("✓")
            } else {
                yellow("!")
            };
            eprintln!(
                "  {} {:<40} {:>3}  {}",
                mark,
                r.path.display(),
                bold(&score),
                dim(&r.quality.issues_line())
            );
        }
        eprintln!(
            "{} chapters, mean score {:.1}, {} below 50, {} unreadable",
            bold(&summary.total.to_string()),
            summary.mean_score,
            summary.below_50,
            summary.unreadable
        );
        for (category, stats) in &summary.by_category {
            eprintln!(
                "  {:<18} {:>3} files  mean {:>5.1}  {:>8} words  {:>5} equations",
                category, stats.files, stats.mean_score, stats.words, stats.equations
            );
        }
    }

    match write_validation_report(&results, chrono::Utc::now(), &config.report_dir) {
        Ok(paths) => {
            if !cli.quiet {
                eprintln!("{} {}", dim("report:"), paths.json.display());
            }
            Ok(summary.exit_code())
        }
        Err(e @ BatchError::ReportWriteError { .. }) => {
            eprintln!("{} {}", red("✘"), e);
            Ok(EXIT_REPORT_UNWRITABLE)
        }
        Err(e) => Err(e).context("Failed to write validation report"),
    }
}

fn print_entries(entries: &[ReportEntry]) {
    for e in entries {
        let backend = e.result.backend.as_deref().unwrap_or("-");
        let attempts = e.result.attempt_count();
        if e.result.succeeded() {
            eprintln!(
                "  {} {:<36} {:<16} {:>3}  {}",
                green("✓"),
                e.document.file_name,
                e.category.as_str(),
                bold(&e.quality.score.to_string()),
                dim(&format!("{backend}, {attempts} attempt(s)")),
            );
        } else {
            let error = e
                .result
                .error
                .as_ref()
                .map(|err| err.to_string())
                .unwrap_or_default();
            eprintln!(
                "  {} {:<36} {}",
                red("✗"),
                e.document.file_name,
                red(&error)
            );
        }
    }
}

fn print_summary(report: &BatchReport) {
    let s = &report.summary;
    if s.total == 0 {
        eprintln!("{} no PDF files found", yellow("⚠"));
        return;
    }
    let categories = s
        .by_category
        .iter()
        .map(|(c, n)| format!("{c}={n}"))
        .collect::<Vec<_>>()
        .join(" ");
    let mark = if s.failed == 0 { green("✔") } else { red("✘") };
    eprintln!(
        "{} {}/{} converted, {} failed  {}  mean score {:.1}",
        mark,
        bold(&s.succeeded.to_string()),
        s.total,
        s.failed,
        dim(&categories),
        s.mean_score
    );
    if !s.by_failure_kind.is_empty() {
        let kinds = s
            .by_failure_kind
            .iter()
            .map(|(k, n)| format!("{k}={n}"))
            .collect::<Vec<_>>()
            .join(" ");
        eprintln!("  {} {}", dim("failures:"), kinds);
    }
}
