//! Records that flow through one batch run.
//!
//! ```text
//! SourceDocument ──▶ ConversionRequest ──▶ backend ──▶ ConversionResult
//!   (discovered)       (one per attempt)                (one per file)
//! ```

use crate::config::ConversionSettings;
use crate::error::ConversionError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// A PDF found by discovery. Immutable for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Position in discovery order (0-based).
    pub index: usize,
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the file contents; empty when unreadable.
    pub sha256: String,
    /// Set when the file was listed but could not be read at scan time.
    /// Such a document is reported as Failed without trying any backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_error: Option<String>,
}

impl SourceDocument {
    /// File name without its extension.
    pub fn stem(&self) -> &str {
        self.file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .filter(|stem| !stem.is_empty())
            .unwrap_or(&self.file_name)
    }
}

/// One attempt to convert one document with one backend.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub document: Arc<SourceDocument>,
    pub backend: String,
    pub settings: ConversionSettings,
}

/// Final tag of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
        }
    }
}

/// A structural element detected in converted markup, in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructuralElement {
    Heading {
        level: u8,
        text: String,
    },
    Equation {
        display: bool,
        /// Cross-reference id (`eq-…` or a `\label{…}` key) when present.
        label: Option<String>,
    },
    Figure {
        caption: String,
    },
}

/// Record of a single backend attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub backend: String,
    pub elapsed_ms: u64,
    /// `None` when the attempt produced the final markup.
    pub error: Option<ConversionError>,
}

/// Outcome of converting one document, after fallback.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    pub outcome: Outcome,
    /// Backend that produced the markup (success) or the last one tried.
    pub backend: Option<String>,
    /// Post-processed markup. Not persisted in the report.
    #[serde(skip)]
    pub markup: String,
    pub elements: Vec<StructuralElement>,
    /// Last failure on a Failed result.
    pub error: Option<ConversionError>,
    /// Wall-clock time over all attempts.
    pub elapsed_ms: u64,
    pub attempts: Vec<Attempt>,
}

impl ConversionResult {
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    pub fn heading_count(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| matches!(e, StructuralElement::Heading { .. }))
            .count()
    }

    pub fn equation_count(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| matches!(e, StructuralElement::Equation { .. }))
            .count()
    }

    pub fn figure_count(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| matches!(e, StructuralElement::Figure { .. }))
            .count()
    }

    /// A Failed result for a document no backend was asked to convert.
    pub fn not_attempted(error: ConversionError) -> Self {
        Self {
            outcome: Outcome::Failed,
            backend: None,
            markup: String::new(),
            elements: Vec::new(),
            error: Some(error),
            elapsed_ms: 0,
            attempts: Vec::new(),
        }
    }

    /// Downgrade a success to a failure (e.g. chapter could not be written).
    pub fn into_failure(mut self, error: ConversionError) -> Self {
        self.outcome = Outcome::Failed;
        self.markup.clear();
        self.elements.clear();
        self.error = Some(error);
        self
    }
}
