//! Post-processing: deterministic cleanup of backend-generated markup.
//!
//! Every backend output passes through here before it is categorised,
//! validated or written, so the validator scores the same text a reader will
//! see. Three passes exist:
//!
//! - [`format_chapters`] promotes lines matching the configured chapter
//!   patterns (`Chapter 3 ...`) to level-1 headings.
//! - [`clean_equations`] rewrites LaTeX math into the `$`/`$$` forms Quarto
//!   renders, and labels display equations so they can be cross-referenced.
//!   It only runs when `equation_cleanup` is enabled.
//! - [`clean_markdown`] fixes layout quirks that extraction engines leave
//!   behind (wrapping fences, CRLF, invisible characters, crowded headings).
//!
//! ## Rule Order
//!
//! Line endings are normalised before anything inspects lines, fences are
//! stripped before heading spacing so heading detection works on clean
//! input, and the final-newline pass runs last.

use crate::config::ChapterPatterns;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Apply all layout cleanup rules to raw backend output.
///
/// Rules (applied in order):
/// 1. Strip outer markdown fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to 2
/// 5. Ensure heading lines have a blank line before them
/// 6. Give figures a Quarto id (`{#fig-N}`) when they lack one
/// 7. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, etc.)
/// 8. Ensure the file ends with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_markdown_fences(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = normalise_heading_spacing(&s);
    let s = label_figures(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 5: Normalise heading spacing ────────────────────────────────────────

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+\S").unwrap());

fn normalise_heading_spacing(input: &str) -> String {
    let mut result = String::with_capacity(input.len() + 64);
    let mut in_code = false;
    for (i, line) in input.lines().enumerate() {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
        }
        if !in_code && i > 0 && RE_HEADING.is_match(line) {
            let trimmed = result.trim_end_matches('\n');
            result.truncate(trimmed.len());
            result.push_str("\n\n");
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}

// ── Rule 6: Label figures ────────────────────────────────────────────────────

static RE_FIGURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)\s]+)\)(\{[^}]*\})?").unwrap());

fn label_figures(input: &str) -> String {
    let mut n = 0usize;
    RE_FIGURE
        .replace_all(input, |caps: &Captures<'_>| {
            n += 1;
            match caps.get(3) {
                Some(_) => caps[0].to_string(),
                None => format!("![{}]({}){{#fig-{}}}", &caps[1], &caps[2], n),
            }
        })
        .to_string()
}

// ── Rule 7: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 8: Ensure file ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Chapter headings ─────────────────────────────────────────────────────────

/// Turn every match of `patterns` into a `# ` heading line.
///
/// Matches already inside a heading are left alone.
pub fn format_chapters(input: &str, patterns: &ChapterPatterns) -> String {
    let mut text = input.to_string();
    for re in patterns.iter() {
        text = re
            .replace_all(&text, |caps: &Captures| {
                let matched = caps[0].trim();
                if matched.is_empty() || matched.starts_with('#') {
                    caps[0].to_string()
                } else {
                    format!("# {matched}")
                }
            })
            .into_owned();
    }
    text
}

// ── Equation cleanup ─────────────────────────────────────────────────────────

static RE_ENV_EQUATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\\begin\{(equation|align)\*?\}(.*?)\\end\{(?:equation|align)\*?\}").unwrap()
});
static RE_INLINE_PAREN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\\((.+?)\\\)").unwrap());
static RE_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\label\{([^}]*)\}").unwrap());
static RE_DISPLAY_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\$\n(?:[ \t]*\n)+").unwrap());
static RE_DISPLAY_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n(?:[ \t]*\n)+\$\$").unwrap());

/// Rewrite LaTeX math into Quarto math.
///
/// - `equation`/`align` environments become `$$ … $$ {#eq-<prefix>-N}`;
///   an existing `\label{key}` is reused as the id
/// - `\[ … \]` becomes `$$ … $$`, `\( … \)` becomes `$…$` with the body
///   trimmed, since pandoc ignores `$` delimiters next to a space
/// - blank lines just inside `$$` delimiters are removed (they break
///   pandoc's display-math parsing)
pub fn clean_equations(input: &str, id_prefix: &str) -> String {
    let prefix = slug(id_prefix);
    let mut n = 0usize;
    let s = RE_ENV_EQUATION.replace_all(input, |caps: &Captures<'_>| {
        n += 1;
        let body = caps[2].trim();
        let (body, id) = match RE_LABEL.captures(body) {
            Some(label) => {
                let id = format!("eq-{}", slug(&label[1]));
                (RE_LABEL.replace(body, "").trim().to_string(), id)
            }
            None => (body.to_string(), format!("eq-{prefix}-{n}")),
        };
        if &caps[1] == "align" {
            format!("$$\n\\begin{{aligned}}\n{body}\n\\end{{aligned}}\n$$ {{#{id}}}")
        } else {
            format!("$$\n{body}\n$$ {{#{id}}}")
        }
    });
    let s = RE_INLINE_PAREN.replace_all(&s, |caps: &Captures<'_>| {
        format!("${}$", caps[1].trim())
    });
    let s = s.replace("\\[", "$$").replace("\\]", "$$");
    let s = RE_DISPLAY_OPEN.replace_all(&s, "$$$$\n");
    RE_DISPLAY_CLOSE.replace_all(&s, "\n$$$$").to_string()
}

/// Lowercase ASCII slug suitable for Quarto ids.
fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "doc".to_string()
    } else {
        trimmed.to_string()
    }
}

// ── Front matter ─────────────────────────────────────────────────────────────

/// Quarto YAML front matter for a chapter.
///
/// The title is derived from the source file stem (`convex_sets` →
/// `Convex Sets`); `date` is the conversion date.
pub fn front_matter(stem: &str, category: &str, date: &str) -> String {
    let title = title_from_stem(stem).replace('"', "\\\"");
    format!(
        "---\n\
title: \"{title}\"\n\
author: \"Extracted from PDF\"\n\
date: \"{date}\"\n\
category: \"{category}\"\n\
format:\n\
\x20 html:\n\
\x20   toc: true\n\
\x20   toc-depth: 3\n\
\x20   number-sections: true\n\
\x20 pdf:\n\
\x20   toc: true\n\
---\n\n"
    )
}

fn title_from_stem(stem: &str) -> String {
    stem.split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Turn a file stem into a safe chapter file name: word characters kept,
/// runs of separators collapsed to `_`.
pub fn sanitise_file_stem(stem: &str) -> String {
    let kept: String = stem
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | ' '))
        .collect();
    let mut out = String::with_capacity(kept.len());
    for word in kept.split(['-', ' ']).filter(|w| !w.is_empty()) {
        if !out.is_empty() {
            out.push('_');
        }
        out.push_str(word);
    }
    if out.is_empty() {
        "unnamed_chapter".to_string()
    } else {
        out
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
