//! Production [`ModelGateway`] backed by an `edgequake-llm` provider.
//!
//! This is the only module that knows about provider SDK types. It owns
//! three concerns the rest of the pipeline is insulated from:
//!
//! 1. **Provider resolution** — pre-built provider, named provider + model,
//!    `AUTOSCAN_PROVIDER`/`AUTOSCAN_MODEL` env pair, or full auto-detection
//!    from API-key environment variables, in that order.
//! 2. **Message assembly** — prompts from [`crate::prompts`] plus the page
//!    image(s); in high accuracy the previous page's image and Markdown ride
//!    along and the model is asked for a two-field JSON object.
//! 3. **Failure classification** — the provider surfaces errors as one
//!    opaque type, so we classify from the rendered message (429/timeout/5xx
//!    transient, 401/403 fatal) and wrap every call in our own timeout so
//!    hangs are classified deterministically.

use super::{ModelGateway, PageCompletion, PageRequest, RefineRequest, TextCompletion};
use crate::config::{Accuracy, ScanConfig};
use crate::error::{AutoScanError, GatewayError};
use crate::prompts;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::debug;

const DEFAULT_MODEL: &str = "gpt-4o";

/// The two named fields of a high-accuracy page-pair response.
///
/// `previous_page` is `None` when the model left the prior page untouched;
/// `current_page` is mandatory. Responses that do not parse into this shape
/// are classified [`GatewayError::MalformedResponse`] and retried.
#[derive(Debug, Deserialize)]
struct PagePair {
    previous_page: Option<String>,
    current_page: String,
}

/// [`ModelGateway`] implementation over an `edgequake-llm` chat provider.
pub struct LlmGateway {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    api_timeout_secs: u64,
}

impl LlmGateway {
    /// Wrap an already-constructed provider.
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ScanConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_timeout_secs: config.api_timeout_secs,
        }
    }

    /// Resolve a provider from the config and environment.
    ///
    /// Resolution order, most specific first:
    /// 1. `config.provider_name` (+ optional `config.model`)
    /// 2. `AUTOSCAN_PROVIDER` + `AUTOSCAN_MODEL`, both non-empty
    /// 3. `OPENAI_API_KEY` present → OpenAI with the configured model
    /// 4. `ProviderFactory::from_env()` auto-detection
    pub fn from_config(config: &ScanConfig) -> Result<Self, AutoScanError> {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

        if let Some(ref name) = config.provider_name {
            return Ok(Self::new(create_provider(name, model)?, config));
        }

        if let (Ok(prov), Ok(model)) = (
            std::env::var("AUTOSCAN_PROVIDER"),
            std::env::var("AUTOSCAN_MODEL"),
        ) {
            if !prov.is_empty() && !model.is_empty() {
                return Ok(Self::new(create_provider(&prov, &model)?, config));
            }
        }

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                return Ok(Self::new(create_provider("openai", model)?, config));
            }
        }

        let (provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| AutoScanError::ProviderNotConfigured {
                provider: "auto".to_string(),
                hint: format!(
                    "No model provider could be auto-detected from the environment.\n\
                     Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or name a provider explicitly.\n\
                     Error: {e}"
                ),
            })?;
        Ok(Self::new(provider, config))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    /// Issue one chat call under the per-call timeout and classify failures.
    async fn chat(
        &self,
        messages: &[ChatMessage],
    ) -> Result<(String, usize, usize), GatewayError> {
        let start = Instant::now();
        let options = self.options();
        let call = self.provider.chat(messages, Some(&options));

        let response = match timeout(Duration::from_secs(self.api_timeout_secs), call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(classify_provider_error(&format!("{e}"))),
            Err(_) => {
                return Err(GatewayError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
        };

        let content = response.content.trim().to_string();
        if content.is_empty() {
            return Err(GatewayError::MalformedResponse {
                detail: "model returned empty content".into(),
            });
        }

        Ok((
            content,
            response.prompt_tokens as usize,
            response.completion_tokens as usize,
        ))
    }
}

#[async_trait]
impl ModelGateway for LlmGateway {
    async fn transcribe_page(
        &self,
        req: PageRequest<'_>,
    ) -> Result<PageCompletion, GatewayError> {
        let page_image = to_image_data(&req.page.base64, &req.page.mime_type);

        let (messages, pair_response) = match (req.accuracy, req.prior) {
            // High accuracy from page 2 on: both images plus the prior
            // page's Markdown, answered as a two-field JSON object.
            (Accuracy::High, Some(prior)) => {
                let system = prompts::with_instructions(prompts::PAIR_SYSTEM_PROMPT, req.instructions);
                let prior_image = to_image_data(&prior.image.base64, &prior.image.mime_type);
                let messages = vec![
                    ChatMessage::system(system),
                    ChatMessage::system(prompts::prior_page_context(&prior.markdown)),
                    ChatMessage::user_with_images(
                        "The first image is the previous page; the second is the new page.",
                        vec![prior_image, page_image],
                    ),
                ];
                (messages, true)
            }
            // Low accuracy, and the first step of a high-accuracy run,
            // which has no context yet.
            _ => {
                let system = prompts::with_instructions(prompts::PAGE_SYSTEM_PROMPT, req.instructions);
                let messages = vec![
                    ChatMessage::system(system),
                    ChatMessage::user_with_images("", vec![page_image]),
                ];
                (messages, false)
            }
        };

        let (content, input_tokens, output_tokens) = self.chat(&messages).await?;
        debug!(
            page = req.page.page_num,
            input_tokens, output_tokens, "page transcription complete"
        );

        if pair_response {
            let pair = parse_pair(&content)?;
            Ok(PageCompletion {
                markdown: pair.current_page,
                prior_revision: pair.previous_page,
                input_tokens,
                output_tokens,
            })
        } else {
            Ok(PageCompletion {
                markdown: content,
                prior_revision: None,
                input_tokens,
                output_tokens,
            })
        }
    }

    async fn refine_document(
        &self,
        req: RefineRequest<'_>,
    ) -> Result<TextCompletion, GatewayError> {
        let system = prompts::with_instructions(prompts::POLISH_SYSTEM_PROMPT, req.instructions);
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user(req.markdown.to_string()),
        ];

        let (content, input_tokens, output_tokens) = self.chat(&messages).await?;
        Ok(TextCompletion {
            markdown: content,
            input_tokens,
            output_tokens,
        })
    }
}

/// Instantiate a named provider with the given model.
fn create_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, AutoScanError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        AutoScanError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn to_image_data(base64: &str, mime_type: &str) -> ImageData {
    ImageData::new(base64.to_string(), mime_type.to_string()).with_detail("high")
}

/// Parse the two-field pair response, tolerating code fences and prose
/// around the JSON object.
fn parse_pair(content: &str) -> Result<PagePair, GatewayError> {
    let stripped = strip_code_fence(content);
    let candidate = extract_json_object(&stripped).unwrap_or(stripped.as_str());

    serde_json::from_str::<PagePair>(candidate).map_err(|e| GatewayError::MalformedResponse {
        detail: format!("pair response is not the expected JSON object: {e}"),
    })
}

/// Remove a single outer ``` fence (with optional language tag) if present.
fn strip_code_fence(content: &str) -> String {
    let trimmed = content.trim();
    if let Some(inner) = trimmed
        .strip_prefix("```")
        .and_then(|s| s.strip_suffix("```"))
    {
        let inner = inner
            .trim_start_matches("json")
            .trim_start_matches("markdown")
            .trim_start_matches("md");
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

/// Slice from the first `{` to the last `}` so trailing prose does not break
/// the parse.
fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}

/// Map a provider error message onto the gateway taxonomy.
///
/// The provider crate surfaces one opaque error type, so classification is
/// by message content. Unknown errors default to transient: a wasted retry
/// is cheaper than dropping a page on a recoverable blip.
fn classify_provider_error(message: &str) -> GatewayError {
    let lower = message.to_ascii_lowercase();

    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("invalid api key")
        || lower.contains("authentication")
    {
        return GatewayError::Auth {
            detail: message.to_string(),
        };
    }
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("quota") {
        return GatewayError::RateLimited {
            detail: message.to_string(),
        };
    }
    if lower.contains("timed out") || lower.contains("timeout") {
        return GatewayError::Timeout { elapsed_ms: 0 };
    }
    if lower.contains("unsupported") || lower.contains("does not support") {
        return GatewayError::Unsupported {
            detail: message.to_string(),
        };
    }
    // Remaining 4xx client errors will not succeed on retry.
    if lower.contains("400")
        || lower.contains("404")
        || lower.contains("invalid request")
        || lower.contains("not found")
    {
        return GatewayError::Fatal {
            detail: message.to_string(),
        };
    }
    GatewayError::Api {
        detail: message.to_string(),
    }
}
