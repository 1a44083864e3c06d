//! Structural element detection.
//!
//! Scans markup once and returns headings, equations and figures in document
//! order. Front matter and fenced code blocks are ignored; a `$` inside code
//! is not math and a `#` inside code is not a heading.

use crate::document::StructuralElement;
use once_cell::sync::Lazy;
use regex::Regex;

// Group layout:
//   1,2  heading hashes / text
//   3,4  display body / trailing {#eq-…} id
//   5    inline body; pandoc rules: no space just inside either `$`,
//        and a closing `$` followed by a digit is not a delimiter
//   6    figure caption
static RE_ELEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?m:^(#{1,6})[ \t]+([^\n]*?)[ \t]*$)",
        r"|(?s:\$\$(.+?)\$\$)(?:[ \t]*\{#(eq-[^}\s]*)\})?",
        r"|\$([^$\s](?:[^$\n]*?[^$\s])?)\$",
        r"|!\[([^\]]*)\]\([^)]*\)",
    ))
    .unwrap()
});

static RE_CODE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?ms)^```.*?^```[^\n]*$").unwrap());
static RE_FRONT_MATTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\A---\n.*?\n---\n").unwrap());
static RE_TEX_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\label\{([^}]+)\}").unwrap());

/// Remove a leading YAML front matter block, if any.
pub fn strip_front_matter(markup: &str) -> &str {
    match RE_FRONT_MATTER.find(markup) {
        Some(m) => &markup[m.end()..],
        None => markup,
    }
}

/// Detect structural elements in document order.
pub fn detect_elements(markup: &str) -> Vec<StructuralElement> {
    let body = strip_front_matter(markup);
    let body = RE_CODE_BLOCK.replace_all(body, "");

    RE_ELEMENT
        .captures_iter(&body)
        .filter_map(|caps| {
            if let (Some(hashes), Some(text)) = (caps.get(1), caps.get(2)) {
                let text = text.as_str().trim_end_matches('#').trim();
                if text.is_empty() {
                    return None;
                }
                return Some(StructuralElement::Heading {
                    level: hashes.as_str().len() as u8,
                    text: text.to_string(),
                });
            }
            if let Some(display) = caps.get(3) {
                if display.as_str().trim().is_empty() {
                    return None;
                }
                let label = caps
                    .get(4)
                    .map(|id| id.as_str().to_string())
                    .or_else(|| tex_label(display.as_str()));
                return Some(StructuralElement::Equation {
                    display: true,
                    label,
                });
            }
            if let Some(inline) = caps.get(5) {
                let whole = caps.get(0)?;
                if body[whole.end()..].starts_with(|c: char| c.is_ascii_digit()) {
                    return None;
                }
                return Some(StructuralElement::Equation {
                    display: false,
                    label: tex_label(inline.as_str()),
                });
            }
            caps.get(6).map(|caption| StructuralElement::Figure {
                caption: caption.as_str().to_string(),
            })
        })
        .collect()
}

fn tex_label(body: &str) -> Option<String> {
    RE_TEX_LABEL.captures(body).map(|c| c[1].to_string())
}
