//! Building blocks shared by backends and the orchestrator.
//!
//! ## Data Flow
//!
//! ```text
//!            ┌─ render::extract_page_text ─────────────────────┐
//! PDF ──▶ render                                               ├─▶ raw markup
//!            └─ render::render_pages ──▶ encode ──▶ llm ───────┘
//!
//! raw markup ──▶ postprocess ──▶ structure ──▶ elements
//! ```
//!
//! 1. [`render`]      pdfium access on the blocking pool (text layer or bitmaps)
//! 2. [`encode`]      PNG + base64 for the multimodal request body
//! 3. [`llm`]         vision-LLM call per page with retry/backoff
//! 4. [`postprocess`] equation cleanup, layout cleanup, front matter, file names
//! 5. [`structure`]   headings, equations and figures in document order

pub mod encode;
pub mod llm;
pub mod postprocess;
pub mod render;
pub mod structure;
