//! Error types for the pdf2chapters library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BatchError`]: **Fatal**: the run cannot proceed at all (source
//!   directory missing, configuration invalid) or its durable record cannot
//!   be written. Returned as `Err(BatchError)` from the top-level entry points.
//!
//! * [`ConversionError`]: **Non-fatal**: one backend attempt on one file
//!   failed. Stored inside [`crate::document::ConversionResult`] so the batch
//!   keeps going and the report can show exactly what went wrong where.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf2chapters library.
///
/// Per-file failures use [`ConversionError`] and never surface here.
#[derive(Debug, Error)]
pub enum BatchError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The source directory is missing, unreadable, or not a directory.
    #[error("Cannot read source directory '{path}': {detail}\nCheck the path exists and is a readable directory.")]
    FilesystemError { path: PathBuf, detail: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The report could not be written, not even to the fallback location.
    #[error("Failed to write report to '{primary}' or fallback '{fallback}': {detail}")]
    ReportWriteError {
        primary: PathBuf,
        fallback: PathBuf,
        detail: String,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration file could not be read or parsed.
    #[error("Failed to load configuration from '{path}': {detail}")]
    ConfigLoad { path: PathBuf, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single conversion attempt.
///
/// Serialised into the report, so every variant carries plain data only.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversionError {
    /// The selected backend cannot run here (engine missing, not registered,
    /// no provider configured).
    #[error("backend '{backend}' is unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// The backend did not return within the configured timeout.
    #[error("backend '{backend}' timed out after {secs}s")]
    ConversionTimeout { backend: String, secs: u64 },

    /// The backend returned no usable content.
    #[error("backend '{backend}' returned no content")]
    ConversionEmpty { backend: String },

    /// The backend ran and reported an error.
    #[error("backend '{backend}' failed: {detail}")]
    BackendFailed { backend: String, detail: String },

    /// The source file was listed but could not be read.
    #[error("cannot read source '{path}': {detail}")]
    SourceUnreadable { path: PathBuf, detail: String },

    /// Conversion succeeded but the chapter file could not be written.
    #[error("failed to write chapter '{path}': {detail}")]
    OutputWriteFailed { path: PathBuf, detail: String },
}

impl ConversionError {
    /// Stable short name used for report columns and summary counts.
    pub fn kind(&self) -> &'static str {
        match self {
            ConversionError::BackendUnavailable { .. } => "BackendUnavailable",
            ConversionError::ConversionTimeout { .. } => "Timeout",
            ConversionError::ConversionEmpty { .. } => "Empty",
            ConversionError::BackendFailed { .. } => "BackendFailed",
            ConversionError::SourceUnreadable { .. } => "SourceUnreadable",
            ConversionError::OutputWriteFailed { .. } => "OutputWriteFailed",
        }
    }

    /// Name of the backend involved, if any.
    pub fn backend(&self) -> Option<&str> {
        match self {
            ConversionError::BackendUnavailable { backend, .. }
            | ConversionError::ConversionTimeout { backend, .. }
            | ConversionError::ConversionEmpty { backend }
            | ConversionError::BackendFailed { backend, .. } => Some(backend),
            ConversionError::SourceUnreadable { .. } | ConversionError::OutputWriteFailed { .. } => {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_error_display() {
        let e = BatchError::FilesystemError {
            path: PathBuf::from("/no/such/dir"),
            detail: "not found".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("/no/such/dir"), "got: {msg}");
        assert!(msg.contains("not found"));
    }

    #[test]
    fn timeout_kind_is_timeout() {
        let e = ConversionError::ConversionTimeout {
            backend: "primary".into(),
            secs: 30,
        };
        assert_eq!(e.kind(), "Timeout");
        assert_eq!(e.backend(), Some("primary"));
        assert!(e.to_string().contains("30s"));
    }

    #[test]
    fn empty_display() {
        let e = ConversionError::ConversionEmpty {
            backend: "fallback".into(),
        };
        assert!(e.to_string().contains("fallback"));
        assert_eq!(e.kind(), "Empty");
    }

    #[test]
    fn unreadable_source_has_no_backend() {
        let e = ConversionError::SourceUnreadable {
            path: PathBuf::from("in/b.pdf"),
            detail: "Input/output error".into(),
        };
        assert_eq!(e.kind(), "SourceUnreadable");
        assert_eq!(e.backend(), None);
        assert!(e.to_string().contains("in/b.pdf"));
    }

    #[test]
    fn conversion_error_serialises_with_kind_tag() {
        let e = ConversionError::BackendUnavailable {
            backend: "ocr".into(),
            reason: "no provider".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"kind\":\"backend_unavailable\""), "got: {json}");
        let back: ConversionError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn write_failure_has_no_backend() {
        let e = ConversionError::OutputWriteFailed {
            path: PathBuf::from("chapters/x.qmd"),
            detail: "read-only".into(),
        };
        assert_eq!(e.backend(), None);
        assert_eq!(e.kind(), "OutputWriteFailed");
    }
}
