//! Source discovery: the one read-only scan of the input directory.
//!
//! The listing is non-recursive and keeps regular files whose extension is
//! `pdf` in any case. Entries are sorted by file name so the dispatch order
//! is the same on every run over an unchanged directory, whatever order the
//! filesystem returns them in.

use crate::document::SourceDocument;
use crate::error::BatchError;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

/// List the PDFs in `dir` as [`SourceDocument`]s in discovery order.
///
/// A missing, unreadable or non-directory `dir` is fatal. A listed file that
/// cannot be read is still returned, with `read_error` set and no hash, so
/// it is reported as a failure rather than silently left out.
pub fn discover(dir: &Path) -> Result<Vec<SourceDocument>, BatchError> {
    let fs_err = |detail: String| BatchError::FilesystemError {
        path: dir.to_path_buf(),
        detail,
    };

    let meta = std::fs::metadata(dir).map_err(|e| fs_err(e.to_string()))?;
    if !meta.is_dir() {
        return Err(fs_err("not a directory".into()));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| fs_err(e.to_string()))? {
        let entry = entry.map_err(|e| fs_err(e.to_string()))?;
        let path = entry.path();
        if is_pdf_name(&path) && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let document = match hash_file(&path) {
            Ok((sha256, size_bytes)) => {
                debug!("Discovered {} ({} bytes)", file_name, size_bytes);
                SourceDocument {
                    index: documents.len(),
                    path,
                    file_name,
                    size_bytes,
                    sha256,
                    read_error: None,
                }
            }
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                SourceDocument {
                    index: documents.len(),
                    size_bytes: std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0),
                    path,
                    file_name,
                    sha256: String::new(),
                    read_error: Some(e.to_string()),
                }
            }
        };
        documents.push(document);
    }

    info!("Discovered {} PDF(s) in {}", documents.len(), dir.display());
    Ok(documents)
}

fn is_pdf_name(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Streamed SHA-256 of a file, as lowercase hex, plus its length.
fn hash_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((hex::encode(hasher.finalize()), size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_pdfs_sorted_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.PDF"), b"%PDF-1.4").unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF-1.7").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested.pdf")).unwrap();

        let docs = discover(dir.path()).unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "b.PDF"]);
        assert_eq!(docs[0].index, 0);
        assert_eq!(docs[1].index, 1);
        assert_eq!(docs[0].size_bytes, 8);
    }

    #[test]
    fn is_not_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("deep.pdf"), b"%PDF").unwrap();
        assert!(discover(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn hash_is_sha256_hex() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.pdf"), b"abc").unwrap();
        let docs = discover(dir.path()).unwrap();
        assert_eq!(
            docs[0].sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unreadable_pdf_is_kept_with_read_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF-1.7").unwrap();
        // reading offset 0 of the process's own memory fails with EIO
        std::os::unix::fs::symlink("/proc/self/mem", dir.path().join("b.pdf")).unwrap();

        let docs = discover(dir.path()).unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
        assert!(docs[0].read_error.is_none());
        assert!(docs[1].read_error.is_some());
        assert!(docs[1].sha256.is_empty());
        assert_eq!(docs[1].index, 1);
    }

    #[test]
    fn missing_dir_is_filesystem_error() {
        let err = discover(Path::new("/no/such/source_pdfs")).unwrap_err();
        assert!(matches!(err, BatchError::FilesystemError { .. }));
    }

    #[test]
    fn file_instead_of_dir_is_filesystem_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = discover(file.path()).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }
}
