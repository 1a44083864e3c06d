//! Prompts for vision-LLM transcription of textbook pages.
//!
//! The default prompt asks for Quarto-ready Markdown: LaTeX math in `$`/`$$`,
//! labelled display equations, and figure placeholders with captions, so that
//! transcribed pages pass the same post-processing and validation as output
//! from the other backends. Override it with `vision.system_prompt`.

/// Default system prompt for transcribing one page of a mathematical text.
pub const MATH_TRANSCRIPTION_PROMPT: &str = r#"You are transcribing a page of a mathematics or statistics textbook into Markdown for a Quarto book.

Follow these rules precisely:

1. TEXT
   - Transcribe ALL running text in reading order
   - Keep the author's wording; do not summarise or paraphrase

2. STRUCTURE
   - Use ## for section titles and ### for subsections
   - Keep theorem, definition, lemma and proof labels in bold, e.g. **Theorem 2.1.**
   - Use - for unordered lists and 1. 2. 3. for ordered lists

3. MATHEMATICS
   - Inline math in $...$, display math in $$...$$ on their own lines
   - Use standard LaTeX macros (\sum, \int, \mathbb{R}, \nabla, \langle \rangle, \|x\|)
   - When an equation is numbered on the page, append a Quarto label after the
     closing $$, e.g. $$ ... $$ {#eq-2-3} for equation (2.3)
   - Never use \[ \] or \( \) delimiters

4. FIGURES AND TABLES
   - For a figure write ![caption text](figure.png) using the printed caption
   - Convert tables to GFM pipe tables

5. IGNORE
   - Page numbers, running headers and footers

6. OUTPUT
   - Output ONLY the Markdown for this page
   - Do NOT wrap the output in ```markdown fences
   - Do NOT add commentary"#;

/// User-turn text sent with each page image.
pub fn page_hint(page_num: usize, total_pages: usize) -> String {
    format!("Page {page_num} of {total_pages}.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_asks_for_quarto_math() {
        assert!(MATH_TRANSCRIPTION_PROMPT.contains("$$"));
        assert!(MATH_TRANSCRIPTION_PROMPT.contains("{#eq-"));
    }

    #[test]
    fn page_hint_format() {
        assert_eq!(page_hint(3, 10), "Page 3 of 10.");
    }
}
