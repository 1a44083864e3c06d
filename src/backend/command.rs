//! `primary` backend: an external markup converter run as a subprocess.
//!
//! The default template reproduces a nougat invocation:
//!
//! ```text
//! nougat <input.pdf> -o <tmpdir> --no-skipping --markdown
//! ```
//!
//! The converter writes its result into a fresh temporary directory; the
//! first file with one of the configured extensions (preferring one named
//! after the source stem) is the markup. The child is spawned with
//! `kill_on_drop`, so a timeout in [`super::convert`] also ends the process.

use super::ConversionBackend;
use crate::config::CommandConfig;
use crate::document::ConversionRequest;
use crate::error::ConversionError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Bytes of stderr kept in a failure message.
const STDERR_TAIL: usize = 800;

pub struct CommandBackend {
    name: String,
    config: CommandConfig,
}

impl CommandBackend {
    pub fn new(name: impl Into<String>, config: CommandConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    fn args(&self, input: &Path, output_dir: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output_dir = output_dir.to_string_lossy();
        self.config
            .args
            .iter()
            .map(|a| a.replace("{input}", &input).replace("{output_dir}", &output_dir))
            .collect()
    }

    fn failed(&self, detail: impl Into<String>) -> ConversionError {
        ConversionError::BackendFailed {
            backend: self.name.clone(),
            detail: detail.into(),
        }
    }
}

#[async_trait]
impl ConversionBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self, request: &ConversionRequest) -> Result<String, ConversionError> {
        let workdir = tempfile::tempdir().map_err(|e| self.failed(format!("temp dir: {e}")))?;
        // An absolute input path keeps working with `current_dir` set below.
        let input = std::path::absolute(&request.document.path)
            .unwrap_or_else(|_| request.document.path.clone());
        let args = self.args(&input, workdir.path());

        info!(
            "{}: running {} {}",
            request.document.file_name,
            self.config.program,
            args.join(" ")
        );

        let output = Command::new(&self.config.program)
            .args(&args)
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    ConversionError::BackendUnavailable {
                        backend: self.name.clone(),
                        reason: format!("cannot execute '{}': {}", self.config.program, e),
                    }
                }
                _ => self.failed(format!("spawn: {e}")),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failed(format!("{}: {}", output.status, tail(stderr.trim()))));
        }

        let Some(path) = find_output(
            workdir.path(),
            request.document.stem(),
            &self.config.output_extensions,
        ) else {
            return Err(ConversionError::ConversionEmpty {
                backend: self.name.clone(),
            });
        };
        debug!("{}: reading {}", request.document.file_name, path.display());

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| self.failed(format!("read {}: {}", path.display(), e)))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Last [`STDERR_TAIL`] bytes of `s`, cut on a char boundary.
fn tail(s: &str) -> &str {
    if s.len() <= STDERR_TAIL {
        return s;
    }
    let mut start = s.len() - STDERR_TAIL;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Locate the converter's output under `dir` (one level of nesting allowed).
fn find_output(dir: &Path, stem: &str, extensions: &[String]) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    collect(dir, extensions, 1, &mut candidates);
    candidates.sort();
    candidates
        .iter()
        .find(|p| p.file_stem().is_some_and(|s| s == stem))
        .or_else(|| candidates.first())
        .cloned()
}

fn collect(dir: &Path, extensions: &[String], depth: usize, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if depth > 0 {
                collect(&path, extensions, depth - 1, out);
            }
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChapterPatterns, ConversionSettings, OutputFormat};
    use crate::document::SourceDocument;
    use std::sync::Arc;
    use std::time::Duration;

    fn request(path: &Path) -> ConversionRequest {
        ConversionRequest {
            document: Arc::new(SourceDocument {
                index: 0,
                path: path.to_path_buf(),
                file_name: "ch1.pdf".into(),
                size_bytes: 0,
                sha256: String::new(),
                read_error: None,
            }),
            backend: "primary".into(),
            settings: ConversionSettings {
                equation_cleanup: true,
                output_format: OutputFormat::Quarto,
                timeout: Duration::from_secs(30),
                chapter_patterns: ChapterPatterns::default(),
            },
        }
    }

    fn shell(script: &str) -> CommandConfig {
        CommandConfig {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            output_extensions: vec!["mmd".into(), "md".into()],
        }
    }

    #[test]
    fn placeholders_are_substituted() {
        let backend = CommandBackend::new("primary", CommandConfig::default());
        let args = backend.args(Path::new("/in/a.pdf"), Path::new("/tmp/out"));
        assert_eq!(
            args,
            vec!["/in/a.pdf", "-o", "/tmp/out", "--no-skipping", "--markdown"]
        );
    }

    #[test]
    fn tail_keeps_the_end() {
        let long = format!("{}END", "x".repeat(2000));
        assert!(tail(&long).ends_with("END"));
        assert!(tail(&long).len() <= STDERR_TAIL);
        assert_eq!(tail("short"), "short");
    }

    #[test]
    fn output_named_after_stem_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("aaa.md"), "other").unwrap();
        std::fs::write(dir.path().join("ch1.mmd"), "mine").unwrap();
        std::fs::write(dir.path().join("log.txt"), "noise").unwrap();
        let exts = vec!["mmd".to_string(), "md".to_string()];
        let found = find_output(dir.path(), "ch1", &exts).unwrap();
        assert!(found.ends_with("ch1.mmd"));
        assert!(find_output(dir.path(), "zzz", &["tex".to_string()]).is_none());
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let config = CommandConfig {
            program: "pdf2chapters-no-such-converter".into(),
            ..CommandConfig::default()
        };
        let backend = CommandBackend::new("primary", config);
        let err = backend
            .extract(&request(Path::new("ch1.pdf")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "BackendUnavailable");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reads_file_left_in_output_dir() {
        let backend = CommandBackend::new(
            "primary",
            shell("printf '# Heading\\n\\n$x$\\n' > '{output_dir}/ch1.mmd'"),
        );
        let markup = backend
            .extract(&request(Path::new("ch1.pdf")))
            .await
            .unwrap();
        assert_eq!(markup, "# Heading\n\n$x$\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_backend_failed() {
        let backend = CommandBackend::new("primary", shell("echo boom >&2; exit 3"));
        let err = backend
            .extract(&request(Path::new("ch1.pdf")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "BackendFailed");
        assert!(err.to_string().contains("boom"), "got: {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn no_output_file_is_empty() {
        let backend = CommandBackend::new("primary", shell("true"));
        let err = backend
            .extract(&request(Path::new("ch1.pdf")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Empty");
    }
}
