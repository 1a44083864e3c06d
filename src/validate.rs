//! Quality validation of converted markup.
//!
//! A [`QualityScore`] is built from four independent checks. Each check
//! either awards its points or appends one [`QualityIssue`]:
//!
//! | Check      | Points | Passes when |
//! |------------|--------|-------------|
//! | structural | 30     | at least one heading |
//! | math       | ≤ 40   | equations ≥ chars / 1000 × density threshold (partial credit below) |
//! | reference  | 15     | at least one equation carries a label |
//! | formatting | 15     | no unmatched braces, control characters or U+FFFD |
//!
//! Validation never errors. A failed conversion, or markup in which nothing
//! structural was detected, scores 0 with every issue flagged.

use crate::config::ValidatorConfig;
use crate::document::{ConversionResult, StructuralElement};
use crate::pipeline::structure::{detect_elements, strip_front_matter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const STRUCTURAL_POINTS: u8 = 30;
pub const MATH_POINTS: u8 = 40;
pub const REFERENCE_POINTS: u8 = 15;
pub const FORMATTING_POINTS: u8 = 15;

/// Something a check found missing or wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    NoHeadings,
    LowEquationDensity,
    NoEquationReferences,
    OcrArtifacts,
}

impl QualityIssue {
    pub const ALL: [QualityIssue; 4] = [
        QualityIssue::NoHeadings,
        QualityIssue::LowEquationDensity,
        QualityIssue::NoEquationReferences,
        QualityIssue::OcrArtifacts,
    ];

    pub fn message(self) -> &'static str {
        match self {
            QualityIssue::NoHeadings => "no section headings found",
            QualityIssue::LowEquationDensity => "equation density below threshold",
            QualityIssue::NoEquationReferences => "no equation cross-references",
            QualityIssue::OcrArtifacts => "unrendered OCR artifacts",
        }
    }
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// A 0–100 completeness score with the issues that cost points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityScore {
    pub score: u8,
    pub issues: Vec<QualityIssue>,
}

impl QualityScore {
    /// Score 0 with every issue flagged.
    pub fn zero() -> Self {
        Self {
            score: 0,
            issues: QualityIssue::ALL.to_vec(),
        }
    }

    /// Issues joined for one-line display (`;`-separated).
    pub fn issues_line(&self) -> String {
        self.issues
            .iter()
            .map(|i| i.message())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Score a conversion result.
pub fn validate(result: &ConversionResult, config: &ValidatorConfig) -> QualityScore {
    if !result.succeeded() {
        return QualityScore::zero();
    }
    score_elements(&result.markup, &result.elements, config)
}

/// Score markup that did not come from a [`ConversionResult`], such as a
/// chapter already on disk. Front matter is not counted.
pub fn validate_markup(markup: &str, config: &ValidatorConfig) -> QualityScore {
    let elements = detect_elements(markup);
    score_elements(strip_front_matter(markup), &elements, config)
}

fn score_elements(
    markup: &str,
    elements: &[StructuralElement],
    config: &ValidatorConfig,
) -> QualityScore {
    if elements.is_empty() {
        return QualityScore::zero();
    }

    let mut score: u32 = 0;
    let mut issues = Vec::new();

    // structural
    if elements
        .iter()
        .any(|e| matches!(e, StructuralElement::Heading { .. }))
    {
        score += u32::from(STRUCTURAL_POINTS);
    } else {
        issues.push(QualityIssue::NoHeadings);
    }

    // math
    let equations: Vec<&StructuralElement> = elements
        .iter()
        .filter(|e| matches!(e, StructuralElement::Equation { .. }))
        .collect();
    let math = math_points(markup.chars().count(), equations.len(), config);
    score += math;
    if math < u32::from(MATH_POINTS) {
        issues.push(QualityIssue::LowEquationDensity);
    }

    // reference
    if equations
        .iter()
        .any(|e| matches!(e, StructuralElement::Equation { label: Some(_), .. }))
    {
        score += u32::from(REFERENCE_POINTS);
    } else {
        issues.push(QualityIssue::NoEquationReferences);
    }

    // formatting
    if has_ocr_artifacts(markup) {
        issues.push(QualityIssue::OcrArtifacts);
    } else {
        score += u32::from(FORMATTING_POINTS);
    }

    QualityScore {
        score: score.min(100) as u8,
        issues,
    }
}

/// Proportional credit for equation density.
fn math_points(chars: usize, detected: usize, config: &ValidatorConfig) -> u32 {
    let threshold = config.equation_density_threshold;
    let expected = chars as f64 / 1000.0 * threshold;
    if expected <= 0.0 {
        return u32::from(MATH_POINTS);
    }
    let ratio = (detected as f64 / expected).min(1.0);
    (f64::from(MATH_POINTS) * ratio).floor() as u32
}

/// Unmatched braces (escaped `\{` `\}` excluded), control characters other
/// than tab/newline, or replacement characters.
fn has_ocr_artifacts(markup: &str) -> bool {
    let mut depth: i64 = 0;
    let mut escaped = false;
    for c in markup.chars() {
        if c == '\u{FFFD}' || (c.is_control() && c != '\n' && c != '\t') {
            return true;
        }
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            _ => {}
        }
    }
    depth != 0
}

// ── Existing chapters ────────────────────────────────────────────────────────

/// Score of one chapter file already on disk.
#[derive(Debug, Clone, Serialize)]
pub struct ChapterValidation {
    pub path: PathBuf,
    /// Name of the parent directory (the category the chapter was filed under).
    pub category: String,
    pub quality: QualityScore,
    /// Whitespace-separated words outside the front matter.
    pub words: usize,
    /// Display and inline equations detected.
    pub equations: usize,
    /// Set when the file could not be read; the score is then 0.
    pub error: Option<String>,
}

/// Recursively score every `.qmd`/`.md` file under `dir`, sorted by path.
pub fn validate_chapter_dir(dir: &Path, config: &ValidatorConfig) -> Vec<ChapterValidation> {
    let mut files = Vec::new();
    collect_chapters(dir, &mut files);
    files.sort();

    files
        .into_iter()
        .map(|path| {
            let category = path
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match std::fs::read_to_string(&path) {
                Ok(markup) => {
                    let elements = detect_elements(&markup);
                    let body = strip_front_matter(&markup);
                    let quality = score_elements(body, &elements, config);
                    debug!("{}: score {}", path.display(), quality.score);
                    ChapterValidation {
                        path,
                        category,
                        quality,
                        words: body.split_whitespace().count(),
                        equations: elements
                            .iter()
                            .filter(|e| matches!(e, StructuralElement::Equation { .. }))
                            .count(),
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("Cannot read {}: {}", path.display(), e);
                    ChapterValidation {
                        path,
                        category,
                        quality: QualityScore::zero(),
                        words: 0,
                        equations: 0,
                        error: Some(e.to_string()),
                    }
                }
            }
        })
        .collect()
}

fn collect_chapters(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {}: {}", dir.display(), e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_chapters(&path, out);
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("qmd") || e.eq_ignore_ascii_case("md"))
        {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Outcome;
    use crate::error::ConversionError;

    fn success(markup: &str) -> ConversionResult {
        ConversionResult {
            outcome: Outcome::Succeeded,
            backend: Some("fallback".into()),
            markup: markup.to_string(),
            elements: detect_elements(markup),
            error: None,
            elapsed_ms: 0,
            attempts: vec![],
        }
    }

    #[test]
    fn complete_chapter_scores_100() {
        let md = "# Convex sets\n\nA set is convex if\n\n$$\nx \\in C\n$$ {#eq-c-1}\n";
        let q = validate(&success(md), &ValidatorConfig::default());
        assert_eq!(q.score, 100);
        assert!(q.issues.is_empty());
    }

    #[test]
    fn heading_and_unlabelled_equation_scores_85() {
        let md = "# Intro\n\nLet $x$ be real.\n";
        let q = validate(&success(md), &ValidatorConfig::default());
        assert_eq!(q.score, 85);
        assert_eq!(q.issues, vec![QualityIssue::NoEquationReferences]);
    }

    #[test]
    fn failure_scores_zero_with_all_flags() {
        let result = success("# x").into_failure(ConversionError::ConversionEmpty {
            backend: "primary".into(),
        });
        let q = validate(&result, &ValidatorConfig::default());
        assert_eq!(q, QualityScore::zero());
        assert_eq!(q.issues.len(), 4);
    }

    #[test]
    fn no_elements_scores_zero() {
        let q = validate(&success("plain prose only"), &ValidatorConfig::default());
        assert_eq!(q.score, 0);
        assert_eq!(q.issues, QualityIssue::ALL.to_vec());
    }

    #[test]
    fn density_gives_partial_credit() {
        // 4000 chars at 0.5 per 1000 expects 2 equations; 1 found → 20 pts.
        let md = format!("# H\n\n$x$ {}", "a".repeat(4000 - 9));
        assert_eq!(md.chars().count(), 4000);
        let q = validate(&success(&md), &ValidatorConfig::default());
        assert_eq!(q.score, 30 + 20 + 15);
        assert!(q.issues.contains(&QualityIssue::LowEquationDensity));
    }

    #[test]
    fn zero_threshold_awards_full_math() {
        let config = ValidatorConfig {
            equation_density_threshold: 0.0,
        };
        let q = validate(&success("# Only a heading\n"), &config);
        assert_eq!(q.score, 30 + 40 + 15);
        assert!(!q.issues.contains(&QualityIssue::LowEquationDensity));
    }

    #[test]
    fn unmatched_brace_is_artifact() {
        assert!(has_ocr_artifacts("\\frac{a}{b"));
        assert!(has_ocr_artifacts("}{"));
        assert!(!has_ocr_artifacts("\\frac{a}{b} and \\{1, 2\\}"));
    }

    #[test]
    fn control_and_replacement_chars_are_artifacts() {
        assert!(has_ocr_artifacts("bad\u{0007}bell"));
        assert!(has_ocr_artifacts("lost \u{FFFD} glyph"));
        assert!(!has_ocr_artifacts("tab\tand\nnewline"));
    }

    #[test]
    fn score_stays_in_range() {
        let inputs = [
            "",
            "# a",
            "$$x$$",
            "# a\n$x$ $y$ $z$ {#eq-1} }}}",
            "![f](a.png)",
        ];
        for md in inputs {
            let q = validate(&success(md), &ValidatorConfig::default());
            assert!(q.score <= 100);
        }
    }

    #[test]
    fn validate_markup_ignores_front_matter() {
        let md = "---\ntitle: \"x\"\n---\n\n# A\n\n$$ y $$ {#eq-a}\n";
        assert_eq!(validate_markup(md, &ValidatorConfig::default()).score, 100);
    }

    #[test]
    fn chapter_dir_is_scanned_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("statistics");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("b.qmd"), "# B\n").unwrap();
        std::fs::write(dir.path().join("a.md"), "text").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "# ignored").unwrap();

        let results = validate_chapter_dir(dir.path(), &ValidatorConfig::default());
        assert_eq!(results.len(), 2);
        assert!(results[0].path.ends_with("a.md"));
        assert_eq!(results[0].quality.score, 0);
        assert_eq!(results[1].category, "statistics");
        assert!(results[1].quality.score > 0);
    }
}
