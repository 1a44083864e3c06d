//! `fallback` backend: the PDF's own text layer, shaped into Markdown.
//!
//! Typeset PDFs carry their text; scanned ones do not and come back empty,
//! which lets the orchestrator move on to `ocr`. Structure is recovered with
//! line heuristics:
//!
//! - lines holding only a page number are dropped
//! - short title-case lines without digits or a final period become `##`
//! - common Unicode math symbols become inline TeX

use super::ConversionBackend;
use crate::document::ConversionRequest;
use crate::error::ConversionError;
use crate::pipeline::render::{extract_page_text, PdfError};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

pub struct TextLayerBackend {
    name: String,
}

impl TextLayerBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl ConversionBackend for TextLayerBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self, request: &ConversionRequest) -> Result<String, ConversionError> {
        let pages = extract_page_text(&request.document.path)
            .await
            .map_err(|e| pdf_error(&self.name, e))?;
        Ok(structure_pages(&pages))
    }
}

/// Map a pdfium-layer failure onto the per-attempt error model.
pub(crate) fn pdf_error(backend: &str, e: PdfError) -> ConversionError {
    match e {
        PdfError::Bind(reason) => ConversionError::BackendUnavailable {
            backend: backend.to_string(),
            reason,
        },
        other => ConversionError::BackendFailed {
            backend: backend.to_string(),
            detail: other.to_string(),
        },
    }
}

/// Join page texts into one Markdown document.
pub fn structure_pages(pages: &[String]) -> String {
    pages
        .iter()
        .map(|page| structure_page(page))
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn structure_page(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !is_page_number(line))
        .map(|line| {
            if is_heading_like(line) {
                format!("## {line}")
            } else {
                rewrite_math_symbols(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn is_page_number(line: &str) -> bool {
    !line.is_empty() && line.chars().all(|c| c.is_ascii_digit())
}

fn is_heading_like(line: &str) -> bool {
    let words = line.split_whitespace().count();
    (2..=8).contains(&words)
        && line.chars().next().is_some_and(char::is_uppercase)
        && !line.ends_with(['.', ',', ';', ':'])
        && !line.chars().any(|c| c.is_ascii_digit())
        && line.chars().all(|c| c.is_ascii())
}

static RE_NORM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\|\|([^|]+)\|\||‖([^‖]+)‖").unwrap());
static RE_ANGLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"⟨([^⟩]*)⟩").unwrap());

const SYMBOLS: &[(char, &str)] = &[
    ('∑', r"\sum"),
    ('∏', r"\prod"),
    ('∫', r"\int"),
    ('∈', r"\in"),
    ('∉', r"\notin"),
    ('∀', r"\forall"),
    ('∃', r"\exists"),
    ('∇', r"\nabla"),
    ('∂', r"\partial"),
    ('∞', r"\infty"),
    ('≤', r"\leq"),
    ('≥', r"\geq"),
    ('≠', r"\neq"),
    ('≈', r"\approx"),
    ('→', r"\to"),
];

fn rewrite_math_symbols(line: &str) -> String {
    let line = RE_NORM.replace_all(line, |caps: &regex::Captures<'_>| {
        let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        format!(r"$\|{}\|$", inner.trim())
    });
    let line = RE_ANGLE.replace_all(&line, r"$$\langle $1 \rangle$$");
    let mut out = String::with_capacity(line.len());
    for c in line.chars() {
        match SYMBOLS.iter().find(|(sym, _)| *sym == c) {
            Some((_, tex)) => {
                out.push('$');
                out.push_str(tex);
                out.push('$');
            }
            None => out.push(c),
        }
    }
    out
}
