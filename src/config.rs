//! Configuration types for a batch conversion run.
//!
//! All run behaviour is controlled through [`BatchConfig`], built via its
//! [`BatchConfigBuilder`] or loaded from a JSON file with
//! [`BatchConfig::from_file`]. Keeping every knob in one struct makes it
//! trivial to share a config across concurrent file tasks and to record in
//! the report which settings produced which output.
//!
//! The keyword table used by the categorizer is part of this value, never a
//! process-wide default, so tests can categorize against any table they like.

use crate::categorize::Category;
use crate::error::BatchError;
use edgequake_llm::LLMProvider;
use regex::{Regex, RegexBuilder};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for one batch run.
///
/// # Example
/// ```rust
/// use pdf2chapters::BatchConfig;
///
/// let config = BatchConfig::builder()
///     .source_dir("source_pdfs")
///     .backend_priority(["fallback", "ocr"])
///     .timeout_secs(120)
///     .build()
///     .unwrap();
/// assert_eq!(config.backend_priority, vec!["fallback", "ocr"]);
/// ```
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Directory scanned (non-recursively) for `.pdf` files. Default: `./source_pdfs`.
    pub source_dir: PathBuf,

    /// Root of the chapter tree; one subdirectory per category. Default: `./chapters`.
    pub output_dir: PathBuf,

    /// Where the JSON and CSV reports are written. Default: `./automation/logs`.
    pub report_dir: PathBuf,

    /// Backend names tried in order for every file. Default: `primary, fallback, ocr`.
    pub backend_priority: Vec<String>,

    /// Upper bound on a single backend call. Default: 600 s.
    ///
    /// Book-length PDFs through an OCR model routinely take minutes; ten
    /// minutes matches what a full nougat pass over a chapter needs on CPU.
    pub timeout: Duration,

    /// Number of files converted at the same time. Default: 2.
    pub concurrency: usize,

    /// Rewrite LaTeX delimiters and environments into Quarto math. Default: true.
    pub equation_cleanup: bool,

    /// Chapter file flavour. Default: [`OutputFormat::Quarto`].
    pub output_format: OutputFormat,

    /// Prepend YAML front matter to Quarto chapters. Default: true.
    pub add_front_matter: bool,

    /// Write chapter files. Disabled by `--dry-run`. Default: true.
    pub write_chapters: bool,

    /// Lines matching one of these become level-1 headings. Default:
    /// `Chapter <n>` / `CHAPTER <roman>` lines.
    pub chapter_patterns: ChapterPatterns,

    pub categorizer: CategorizerConfig,
    pub validator: ValidatorConfig,
    pub command: CommandConfig,
    pub vision: VisionConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("./source_pdfs"),
            output_dir: PathBuf::from("./chapters"),
            report_dir: PathBuf::from("./automation/logs"),
            backend_priority: vec!["primary".into(), "fallback".into(), "ocr".into()],
            timeout: Duration::from_secs(600),
            concurrency: 2,
            equation_cleanup: true,
            output_format: OutputFormat::default(),
            add_front_matter: true,
            write_chapters: true,
            chapter_patterns: ChapterPatterns::default(),
            categorizer: CategorizerConfig::default(),
            validator: ValidatorConfig::default(),
            command: CommandConfig::default(),
            vision: VisionConfig::default(),
        }
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load a JSON configuration file on top of the defaults and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BatchError> {
        Self::builder().config_file(path)?.build()
    }

    /// Per-attempt settings handed to backends.
    pub fn conversion_settings(&self) -> ConversionSettings {
        ConversionSettings {
            equation_cleanup: self.equation_cleanup,
            output_format: self.output_format,
            timeout: self.timeout,
            chapter_patterns: self.chapter_patterns.clone(),
        }
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.source_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.report_dir = dir.into();
        self
    }

    pub fn backend_priority<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.backend_priority = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn timeout_secs(self, secs: u64) -> Self {
        self.timeout(Duration::from_secs(secs))
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn equation_cleanup(mut self, v: bool) -> Self {
        self.config.equation_cleanup = v;
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    pub fn add_front_matter(mut self, v: bool) -> Self {
        self.config.add_front_matter = v;
        self
    }

    pub fn write_chapters(mut self, v: bool) -> Self {
        self.config.write_chapters = v;
        self
    }

    pub fn category_keywords(mut self, keywords: CategoryKeywords) -> Self {
        self.config.categorizer.keywords = keywords;
        self
    }

    pub fn filename_abbreviations(mut self, abbreviations: CategoryKeywords) -> Self {
        self.config.categorizer.filename_abbreviations = abbreviations;
        self
    }

    pub fn chapter_patterns(mut self, patterns: ChapterPatterns) -> Self {
        self.config.chapter_patterns = patterns;
        self
    }

    pub fn filename_weight(mut self, w: u32) -> Self {
        self.config.categorizer.filename_weight = w;
        self
    }

    pub fn content_weight(mut self, w: u32) -> Self {
        self.config.categorizer.content_weight = w;
        self
    }

    pub fn content_sample_chars(mut self, n: usize) -> Self {
        self.config.categorizer.content_sample_chars = n;
        self
    }

    pub fn equation_density_threshold(mut self, t: f64) -> Self {
        self.config.validator.equation_density_threshold = t;
        self
    }

    pub fn command(mut self, command: CommandConfig) -> Self {
        self.config.command = command;
        self
    }

    /// Replace only the converter executable, keeping its argument template.
    pub fn command_program(mut self, program: impl Into<String>) -> Self {
        self.config.command.program = program.into();
        self
    }

    pub fn vision(mut self, vision: VisionConfig) -> Self {
        self.config.vision = vision;
        self
    }

    pub fn vision_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.vision.provider = Some(provider);
        self
    }

    /// Read a JSON configuration file and apply every field it sets.
    pub fn config_file(self, path: impl AsRef<Path>) -> Result<Self, BatchError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| BatchError::ConfigLoad {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let file: ConfigFile = serde_json::from_str(&raw).map_err(|e| BatchError::ConfigLoad {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Ok(self.apply(file))
    }

    /// Apply the fields set in a parsed [`ConfigFile`].
    pub fn apply(mut self, file: ConfigFile) -> Self {
        if let Some(dir) = file.source_dir {
            self = self.source_dir(dir);
        }
        if let Some(dir) = file.output_dir {
            self = self.output_dir(dir);
        }
        if let Some(dir) = file.report_dir {
            self = self.report_dir(dir);
        }
        if let Some(priority) = file.backend_priority {
            self = self.backend_priority(priority);
        }
        if let Some(t) = file.equation_density_threshold {
            self = self.equation_density_threshold(t);
        }
        if let Some(secs) = file.timeout_seconds {
            self = self.timeout_secs(secs);
        }
        if let Some(keywords) = file.category_keywords {
            self = self.category_keywords(keywords);
        }
        if let Some(abbreviations) = file.filename_abbreviations {
            self = self.filename_abbreviations(abbreviations);
        }
        if let Some(patterns) = file.chapter_patterns {
            self = self.chapter_patterns(patterns);
        }
        if let Some(n) = file.concurrency {
            self = self.concurrency(n);
        }
        if let Some(v) = file.equation_cleanup {
            self = self.equation_cleanup(v);
        }
        if let Some(format) = file.output_format {
            self = self.output_format(format);
        }
        if let Some(v) = file.add_front_matter {
            self = self.add_front_matter(v);
        }
        if let Some(w) = file.filename_weight {
            self = self.filename_weight(w);
        }
        if let Some(w) = file.content_weight {
            self = self.content_weight(w);
        }
        if let Some(n) = file.content_sample_chars {
            self = self.content_sample_chars(n);
        }
        if let Some(command) = file.command {
            self = self.command(command);
        }
        if let Some(mut vision) = file.vision {
            vision.provider = self.config.vision.provider.take();
            self = self.vision(vision);
        }
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, BatchError> {
        let c = &self.config;
        if c.backend_priority.is_empty() {
            return Err(BatchError::InvalidConfig(
                "backend_priority must name at least one backend".into(),
            ));
        }
        if c.timeout.is_zero() {
            return Err(BatchError::InvalidConfig("timeout must be > 0".into()));
        }
        if c.concurrency == 0 {
            return Err(BatchError::InvalidConfig("concurrency must be ≥ 1".into()));
        }
        let t = c.validator.equation_density_threshold;
        if !t.is_finite() || t < 0.0 {
            return Err(BatchError::InvalidConfig(format!(
                "equation_density_threshold must be a finite number ≥ 0, got {t}"
            )));
        }
        let tables = [
            ("category_keywords", &c.categorizer.keywords),
            ("filename_abbreviations", &c.categorizer.filename_abbreviations),
        ];
        for (name, table) in tables {
            if table.iter().any(|(cat, _)| cat == Category::Uncategorized) {
                return Err(BatchError::InvalidConfig(format!(
                    "{name} cannot assign keywords to 'uncategorized'"
                )));
            }
        }
        if c.command.program.trim().is_empty() {
            return Err(BatchError::InvalidConfig(
                "command.program must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Per-attempt settings ─────────────────────────────────────────────────

/// The part of the configuration a backend sees on every attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionSettings {
    pub equation_cleanup: bool,
    pub output_format: OutputFormat,
    #[serde(rename = "timeout_ms", serialize_with = "duration_as_millis")]
    pub timeout: Duration,
    pub chapter_patterns: ChapterPatterns,
}

fn duration_as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Flavour of the written chapter files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Plain Markdown (`.md`), no front matter.
    Markdown,
    /// Quarto Markdown (`.qmd`) with YAML front matter. (default)
    #[default]
    Quarto,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Quarto => "qmd",
        }
    }
}

// ── Chapter headings ─────────────────────────────────────────────────────

const DEFAULT_CHAPTER_PATTERN: &str = r"^(?:[Cc]hapter|CHAPTER)\s+(?:\d+|[IVXLC]+)\b.*$";

/// Regexes whose matches are promoted to `# ` headings.
///
/// Compiled in multi-line mode, so `^` and `$` anchor at line boundaries.
/// Serialized as the source strings.
#[derive(Debug, Clone)]
pub struct ChapterPatterns(Vec<Regex>);

impl ChapterPatterns {
    pub fn new<I, S>(patterns: I) -> Result<Self, BatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        patterns
            .into_iter()
            .map(|p| {
                RegexBuilder::new(p.as_ref())
                    .multi_line(true)
                    .build()
                    .map_err(|e| {
                        BatchError::InvalidConfig(format!("chapter pattern '{}': {e}", p.as_ref()))
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// No heading promotion at all.
    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Regex> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ChapterPatterns {
    fn default() -> Self {
        let re = RegexBuilder::new(DEFAULT_CHAPTER_PATTERN)
            .multi_line(true)
            .build()
            .expect("valid default chapter pattern");
        Self(vec![re])
    }
}

impl PartialEq for ChapterPatterns {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(&other.0).all(|(a, b)| a.as_str() == b.as_str())
    }
}

impl Serialize for ChapterPatterns {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(Regex::as_str))
    }
}

impl<'de> Deserialize<'de> for ChapterPatterns {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<String>::deserialize(deserializer)?;
        ChapterPatterns::new(raw).map_err(serde::de::Error::custom)
    }
}

// ── Categorizer settings ─────────────────────────────────────────────────

/// Ordered mapping from category to keyword set.
///
/// Declaration order matters: when two categories score the same the one
/// declared first wins. A JSON object keeps its key order when loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryKeywords(Vec<(Category, Vec<String>)>);

impl CategoryKeywords {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a category; a category declared twice keeps its first position
    /// and gains the extra keywords.
    pub fn with(mut self, category: Category, keywords: &[&str]) -> Self {
        let words = keywords.iter().map(|k| k.to_string());
        match self.0.iter_mut().find(|(c, _)| *c == category) {
            Some((_, existing)) => existing.extend(words),
            None => self.0.push((category, words.collect())),
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &[String])> + '_ {
        self.0.iter().map(|(c, k)| (*c, k.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for CategoryKeywords {
    fn default() -> Self {
        Self::new()
            .with(
                Category::Optimization,
                &[
                    "optimization",
                    "optimisation",
                    "convex",
                    "objective function",
                    "linear programming",
                    "gradient descent",
                    "lagrangian",
                    "duality",
                ],
            )
            .with(
                Category::Statistics,
                &[
                    "statistics",
                    "statistical",
                    "probability",
                    "regression",
                    "hypothesis test",
                    "bayesian",
                    "estimator",
                    "variance",
                ],
            )
            .with(
                Category::MachineLearning,
                &[
                    "machine learning",
                    "neural network",
                    "deep learning",
                    "supervised",
                    "unsupervised",
                    "reinforcement learning",
                    "classifier",
                ],
            )
    }
}

impl Serialize for CategoryKeywords {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (category, keywords) in &self.0 {
            map.serialize_entry(category, keywords)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CategoryKeywords {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = CategoryKeywords;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping category names to keyword lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(Category, Vec<String>)> = Vec::new();
                while let Some((category, keywords)) =
                    access.next_entry::<Category, Vec<String>>()?
                {
                    if entries.iter().any(|(c, _)| *c == category) {
                        return Err(serde::de::Error::custom(format!(
                            "category '{category}' declared twice"
                        )));
                    }
                    entries.push((category, keywords));
                }
                Ok(CategoryKeywords(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

/// Inputs of the categorizer besides the document itself.
#[derive(Debug, Clone, PartialEq)]
pub struct CategorizerConfig {
    /// Matched as substrings in both filename and content.
    pub keywords: CategoryKeywords,
    /// Short forms matched as whole words in the filename only
    /// (default: `opt`, `stats`, `ml`).
    pub filename_abbreviations: CategoryKeywords,
    /// Weight of one keyword hit in the filename. Default: 3.
    pub filename_weight: u32,
    /// Weight of one keyword hit in the content sample. Default: 1.
    pub content_weight: u32,
    /// Number of leading content characters inspected. Default: 5000.
    pub content_sample_chars: usize,
}

impl Default for CategorizerConfig {
    fn default() -> Self {
        Self {
            keywords: CategoryKeywords::default(),
            filename_abbreviations: CategoryKeywords::new()
                .with(Category::Optimization, &["opt"])
                .with(Category::Statistics, &["stats"])
                .with(Category::MachineLearning, &["ml"]),
            filename_weight: 3,
            content_weight: 1,
            content_sample_chars: 5000,
        }
    }
}

// ── Validator settings ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatorConfig {
    /// Expected display/inline equations per 1000 characters of markup. Default: 0.5.
    pub equation_density_threshold: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            equation_density_threshold: 0.5,
        }
    }
}

// ── Backend settings ─────────────────────────────────────────────────────

/// External converter run by the `primary` backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Executable name or path. Default: `nougat`.
    pub program: String,
    /// Argument template; `{input}` and `{output_dir}` are substituted.
    pub args: Vec<String>,
    /// Extensions of the file the converter leaves in `{output_dir}`.
    pub output_extensions: Vec<String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            program: "nougat".into(),
            args: ["{input}", "-o", "{output_dir}", "--no-skipping", "--markdown"]
                .map(String::from)
                .to_vec(),
            output_extensions: vec!["mmd".into(), "md".into()],
        }
    }
}

/// Vision-LLM transcription used by the `ocr` backend.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// LLM model identifier. If None, uses `gpt-4.1-nano`.
    pub model: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    #[serde(skip)]
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Longest rendered page edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Pages of one document transcribed concurrently. Default: 4.
    pub page_concurrency: usize,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per page. Default: 4096.
    pub max_tokens: usize,

    /// Retry attempts on a failed page call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom system prompt. If None, uses the built-in math-aware prompt.
    pub system_prompt: Option<String>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            provider_name: None,
            model: None,
            provider: None,
            max_rendered_pixels: 2000,
            page_concurrency: 4,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionConfig")
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("page_concurrency", &self.page_concurrency)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

// ── File format ──────────────────────────────────────────────────────────

/// On-disk configuration. Every field is optional; unset fields keep the
/// builder's current value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub source_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub report_dir: Option<PathBuf>,
    pub backend_priority: Option<Vec<String>>,
    pub equation_density_threshold: Option<f64>,
    pub timeout_seconds: Option<u64>,
    pub category_keywords: Option<CategoryKeywords>,
    pub filename_abbreviations: Option<CategoryKeywords>,
    pub chapter_patterns: Option<ChapterPatterns>,
    pub concurrency: Option<usize>,
    pub equation_cleanup: Option<bool>,
    pub output_format: Option<OutputFormat>,
    pub add_front_matter: Option<bool>,
    pub filename_weight: Option<u32>,
    pub content_weight: Option<u32>,
    pub content_sample_chars: Option<usize>,
    pub command: Option<CommandConfig>,
    pub vision: Option<VisionConfig>,
}
