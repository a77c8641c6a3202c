//! Page describer: one vision request per page.
//!
//! The request carries the system message, then a single user message with
//! the per-page instruction (extracted text and tables inlined) and the page
//! image attached at high detail. There is no retry; a rerun of the batch
//! is the retry, and the description cache makes it skip finished pages.

use crate::config::ConversionConfig;
use crate::error::Pdf2MdError;
use crate::prompts::{page_instruction, SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Everything the describer needs to know about one page.
#[derive(Clone)]
pub struct PageDescriptionRequest<'a> {
    /// 1-based page index.
    pub page: usize,
    /// Source file name, for logs.
    pub source: &'a str,
    pub image: ImageData,
    pub text: &'a str,
    pub tables_markdown: &'a str,
}

/// Turns a page into a Markdown description.
#[async_trait]
pub trait PageDescriber: Send + Sync {
    async fn describe(&self, request: &PageDescriptionRequest<'_>) -> Result<String, Pdf2MdError>;
}

/// [`PageDescriber`] backed by an `edgequake_llm` vision provider.
pub struct VisionDescriber {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
    timeout: Duration,
}

impl VisionDescriber {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self::from_config(provider, &ConversionConfig::default())
    }

    pub fn from_config(provider: Arc<dyn LLMProvider>, config: &ConversionConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| SYSTEM_PROMPT.to_string()),
            options: build_options(config),
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    fn messages(&self, request: &PageDescriptionRequest<'_>) -> Vec<ChatMessage> {
        let instruction = page_instruction(request.text, request.tables_markdown);
        vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(instruction.as_str(), vec![request.image.clone()]),
        ]
    }
}

#[async_trait]
impl PageDescriber for VisionDescriber {
    async fn describe(&self, request: &PageDescriptionRequest<'_>) -> Result<String, Pdf2MdError> {
        let page = request.page;
        let messages = self.messages(request);
        let start = Instant::now();

        info!("{}: requesting description of page {}", request.source, page);

        let response = tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&self.options)))
            .await
            .map_err(|_| Pdf2MdError::ApiTimeout {
                page,
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| Pdf2MdError::LlmApiError {
                page,
                message: e.to_string(),
            })?;

        debug!(
            "Page {}: {} input tokens, {} output tokens, {:?}",
            page,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        let content = validate_description(page, response.content)?;
        info!("Received response for page {}: {}...", page, preview(&content, 120));
        Ok(content)
    }
}

/// Reject a description with no usable content.
///
/// Whitespace-only counts as empty. Applied to every describer's output by
/// the converter, so fakes and custom describers are held to it as well.
pub fn validate_description(page: usize, content: String) -> Result<String, Pdf2MdError> {
    if content.trim().is_empty() {
        Err(Pdf2MdError::EmptyResponse { page })
    } else {
        Ok(content)
    }
}

fn build_options(config: &ConversionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// First `max_chars` characters, cut on a char boundary.
fn preview(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
