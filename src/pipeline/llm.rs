//! Vision-LLM page transcription with retry.
//!
//! One rendered page goes in, Markdown for that page comes out. Prompt text
//! lives in [`crate::prompts`]; this module only handles the message layout,
//! completion options and the retry loop.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms * 2^attempt`)
//! spreads retries out: with 500 ms base and 3 retries the wait sequence
//! is 500 ms → 1 s → 2 s.

use crate::config::VisionConfig;
use crate::prompts::{page_hint, MATH_TRANSCRIPTION_PROMPT};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Outcome of transcribing one page.
#[derive(Debug, Clone)]
pub struct PageTranscript {
    /// 1-indexed page number.
    pub page_num: usize,
    pub markdown: String,
    pub duration_ms: u64,
    pub retries: u32,
    /// Last provider error when every attempt failed.
    pub error: Option<String>,
}

/// Transcribe a single rendered page.
///
/// Never returns an error: a page that fails after all retries carries
/// `error` and empty markdown, so one bad page does not sink the document.
pub async fn transcribe_page(
    provider: &Arc<dyn LLMProvider>,
    page_num: usize,
    total_pages: usize,
    image_data: ImageData,
    config: &VisionConfig,
) -> PageTranscript {
    let start = Instant::now();
    let system_prompt = config
        .system_prompt
        .as_deref()
        .unwrap_or(MATH_TRANSCRIPTION_PROMPT);

    let messages = vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user_with_images(&page_hint(page_num, total_pages), vec![image_data]),
    ];
    let options = build_options(config);

    let mut last_err: Option<String> = None;
    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match provider.chat(&messages, Some(&options)).await {
            Ok(response) => {
                let duration = start.elapsed();
                debug!(
                    "Page {}: {} input tokens, {} output tokens, {:?}",
                    page_num, response.prompt_tokens, response.completion_tokens, duration
                );
                return PageTranscript {
                    page_num,
                    markdown: response.content,
                    duration_ms: duration.as_millis() as u64,
                    retries: attempt,
                    error: None,
                };
            }
            Err(e) => {
                warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, e);
                last_err = Some(e.to_string());
            }
        }
    }

    PageTranscript {
        page_num,
        markdown: String::new(),
        duration_ms: start.elapsed().as_millis() as u64,
        retries: config.max_retries,
        error: Some(last_err.unwrap_or_else(|| "unknown error".to_string())),
    }
}

fn build_options(config: &VisionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
