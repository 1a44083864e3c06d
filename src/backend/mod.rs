//! Conversion backends: one contract over interchangeable extraction engines.
//!
//! A backend implements a single capability, [`ConversionBackend::extract`]:
//! turn the PDF named by a [`ConversionRequest`] into raw markup text. Every
//! thing around that call (timeout, empty check, post-processing, structure
//! detection) lives in [`convert`] so all engines are held to the same rules.
//!
//! ## Shipped backends
//!
//! | Name       | Type                        | Engine |
//! |------------|-----------------------------|--------|
//! | `primary`  | [`command::CommandBackend`]     | external converter (nougat by default) |
//! | `fallback` | [`text_layer::TextLayerBackend`] | pdfium text layer + heuristics |
//! | `ocr`      | [`vision::VisionBackend`]       | pdfium rasterisation + vision LLM |
//!
//! Additional engines are added with [`BackendRegistry::register`] and then
//! named in `backend_priority`.

pub mod command;
pub mod text_layer;
pub mod vision;

use crate::config::BatchConfig;
use crate::document::{Attempt, ConversionRequest, ConversionResult, Outcome};
use crate::error::ConversionError;
use crate::pipeline::postprocess::{clean_equations, clean_markdown, format_chapters};
use crate::pipeline::structure::detect_elements;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub const PRIMARY: &str = "primary";
pub const FALLBACK: &str = "fallback";
pub const OCR: &str = "ocr";

/// An extraction engine.
///
/// Implementations must not modify the source file and should return
/// promptly once their future is dropped; [`convert`] drops it on timeout.
#[async_trait]
pub trait ConversionBackend: Send + Sync {
    /// Registry name, e.g. `"primary"`.
    fn name(&self) -> &str;

    /// Produce raw markup for `request.document`.
    async fn extract(&self, request: &ConversionRequest) -> Result<String, ConversionError>;
}

/// Run one attempt: extract under the timeout, post-process, detect structure.
///
/// The result carries exactly one [`Attempt`].
pub async fn convert(
    backend: &dyn ConversionBackend,
    request: &ConversionRequest,
) -> ConversionResult {
    let start = Instant::now();
    let name = backend.name().to_string();
    let timeout = request.settings.timeout;

    let extracted = match tokio::time::timeout(timeout, backend.extract(request)).await {
        Ok(result) => result,
        Err(_) => Err(ConversionError::ConversionTimeout {
            backend: name.clone(),
            secs: timeout.as_secs(),
        }),
    };

    let markup = extracted.and_then(|raw| {
        let markup = polish(&raw, request);
        if markup.trim().is_empty() {
            Err(ConversionError::ConversionEmpty {
                backend: name.clone(),
            })
        } else {
            Ok(markup)
        }
    });

    let elapsed_ms = start.elapsed().as_millis() as u64;
    match markup {
        Ok(markup) => {
            let elements = detect_elements(&markup);
            debug!(
                "{}: '{}' produced {} chars, {} elements in {}ms",
                request.document.file_name,
                name,
                markup.len(),
                elements.len(),
                elapsed_ms
            );
            ConversionResult {
                outcome: Outcome::Succeeded,
                backend: Some(name.clone()),
                markup,
                elements,
                error: None,
                elapsed_ms,
                attempts: vec![Attempt {
                    backend: name,
                    elapsed_ms,
                    error: None,
                }],
            }
        }
        Err(error) => failed_attempt(name, error, elapsed_ms),
    }
}

/// A Failed result holding a single failed attempt.
pub(crate) fn failed_attempt(
    backend: String,
    error: ConversionError,
    elapsed_ms: u64,
) -> ConversionResult {
    ConversionResult {
        outcome: Outcome::Failed,
        backend: Some(backend.clone()),
        markup: String::new(),
        elements: Vec::new(),
        error: Some(error.clone()),
        elapsed_ms,
        attempts: vec![Attempt {
            backend,
            elapsed_ms,
            error: Some(error),
        }],
    }
}

fn polish(raw: &str, request: &ConversionRequest) -> String {
    let text = format_chapters(raw, &request.settings.chapter_patterns);
    if request.settings.equation_cleanup {
        clean_markdown(&clean_equations(&text, request.document.stem()))
    } else {
        clean_markdown(&text)
    }
}

/// Name → backend lookup used by the orchestrator.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn ConversionBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `primary`, `fallback` and `ocr` built from `config`.
    pub fn with_defaults(config: &BatchConfig) -> Self {
        Self::new()
            .with(Arc::new(command::CommandBackend::new(
                PRIMARY,
                config.command.clone(),
            )))
            .with(Arc::new(text_layer::TextLayerBackend::new(FALLBACK)))
            .with(Arc::new(vision::VisionBackend::new(OCR, config.vision.clone())))
    }

    /// Add or replace a backend under its own name.
    pub fn register(&mut self, backend: Arc<dyn ConversionBackend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn with(mut self, backend: Arc<dyn ConversionBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ConversionBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.backends.keys()).finish()
    }
}
