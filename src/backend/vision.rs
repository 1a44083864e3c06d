//! `ocr` backend: rasterise pages and transcribe them with a vision LLM.
//!
//! ```text
//! PDF ──▶ render (pdfium, blocking) ──▶ encode (PNG/base64) ──▶ LLM per page ──▶ join
//! ```
//!
//! Pages are transcribed concurrently (`vision.page_concurrency`) and joined
//! back in page order. Pages that fail after retries are dropped; the attempt
//! only fails when no page produced text.

use super::text_layer::pdf_error;
use super::ConversionBackend;
use crate::config::VisionConfig;
use crate::document::ConversionRequest;
use crate::error::ConversionError;
use crate::pipeline::{encode, llm, render};
use async_trait::async_trait;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

pub struct VisionBackend {
    name: String,
    config: VisionConfig,
}

impl VisionBackend {
    pub fn new(name: impl Into<String>, config: VisionConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    fn unavailable(&self, reason: impl Into<String>) -> ConversionError {
        ConversionError::BackendUnavailable {
            backend: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Resolve the LLM provider, from most-specific to least-specific:
    ///
    /// 1. a provider injected through the config
    /// 2. `vision.provider_name` (+ `vision.model`)
    /// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`
    /// 4. OpenAI when `OPENAI_API_KEY` is set
    /// 5. `ProviderFactory::from_env` auto-detection
    fn resolve_provider(&self) -> Result<Arc<dyn LLMProvider>, ConversionError> {
        if let Some(ref provider) = self.config.provider {
            return Ok(Arc::clone(provider));
        }

        let model = self.config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        if let Some(ref name) = self.config.provider_name {
            return self.create(name, model);
        }

        if let (Ok(prov), Ok(model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !prov.is_empty() && !model.is_empty() {
                return self.create(&prov, &model);
            }
        }

        if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
            return self.create("openai", model);
        }

        let (provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
            self.unavailable(format!(
                "no LLM provider configured (set OPENAI_API_KEY or ANTHROPIC_API_KEY): {e}"
            ))
        })?;
        Ok(provider)
    }

    fn create(&self, provider: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ConversionError> {
        ProviderFactory::create_llm_provider(provider, model)
            .map_err(|e| self.unavailable(format!("provider '{provider}': {e}")))
    }
}

#[async_trait]
impl ConversionBackend for VisionBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self, request: &ConversionRequest) -> Result<String, ConversionError> {
        // Resolve first: without a provider there is no point rendering.
        let provider = self.resolve_provider()?;

        let images = render::render_pages(&request.document.path, self.config.max_rendered_pixels)
            .await
            .map_err(|e| pdf_error(&self.name, e))?;
        let total_pages = images.len();
        info!(
            "{}: transcribing {} page(s)",
            request.document.file_name, total_pages
        );

        let mut encoded = Vec::with_capacity(total_pages);
        for (idx, img) in &images {
            match encode::encode_page(img) {
                Ok(data) => encoded.push((idx + 1, data)),
                Err(e) => warn!("Page {}: encode failed: {}", idx + 1, e),
            }
        }
        drop(images);

        let mut pages: Vec<llm::PageTranscript> = stream::iter(encoded.into_iter().map(
            |(page_num, data)| {
                let provider = Arc::clone(&provider);
                let config = &self.config;
                async move {
                    llm::transcribe_page(&provider, page_num, total_pages, data, config).await
                }
            },
        ))
        .buffer_unordered(self.config.page_concurrency.max(1))
        .collect()
        .await;
        pages.sort_by_key(|p| p.page_num);

        join_pages(&self.name, &pages)
    }
}

/// Join successful page transcripts; fail only when none succeeded.
fn join_pages(backend: &str, pages: &[llm::PageTranscript]) -> Result<String, ConversionError> {
    let ok: Vec<&str> = pages
        .iter()
        .filter(|p| p.error.is_none())
        .map(|p| p.markdown.trim())
        .filter(|m| !m.is_empty())
        .collect();

    if ok.is_empty() {
        if let Some(err) = pages.iter().rev().find_map(|p| p.error.as_deref()) {
            return Err(ConversionError::BackendFailed {
                backend: backend.to_string(),
                detail: format!("all {} page(s) failed; last error: {}", pages.len(), err),
            });
        }
        return Err(ConversionError::ConversionEmpty {
            backend: backend.to_string(),
        });
    }

    let failed = pages.len() - pages.iter().filter(|p| p.error.is_none()).count();
    if failed > 0 {
        warn!("{} of {} page(s) failed and were skipped", failed, pages.len());
    }
    Ok(ok.join("\n\n"))
}
