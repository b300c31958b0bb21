//! The page converter: one gateway call wrapped in retry/backoff and
//! result normalisation.
//!
//! ## Retry strategy
//!
//! A page gets one initial attempt plus `max_retries` retries, but only for
//! failures the gateway classified as transient (timeouts, rate limits,
//! malformed structured responses). Backoff is exponential,
//! `retry_backoff_ms * 2^(attempt-1)`: with the 500 ms default and 3
//! retries the wait sequence is 500 ms → 1 s → 2 s. Fatal errors
//! (authentication, unsupported input) end the page immediately.
//!
//! A converter never propagates an error upward: it always returns a
//! [`PageResult`], failed or not, so one bad page cannot abort the job.

use crate::config::ScanConfig;
use crate::error::PageError;
use crate::gateway::{ModelGateway, PageImage, PageRequest, PriorPage};
use crate::output::PageResult;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Outcome of converting one page.
pub struct PageOutcome {
    /// The fragment, failed or successful.
    pub result: PageResult,
    /// High accuracy only: the model's revision of the previous page's text.
    pub prior_revision: Option<String>,
}

/// Convert a single page via the gateway, retrying transient failures.
pub async fn convert_page(
    gateway: &Arc<dyn ModelGateway>,
    page: &PageImage,
    prior: Option<&PriorPage>,
    config: &ScanConfig,
) -> PageOutcome {
    let start = Instant::now();
    let page_num = page.page_num;

    let request = PageRequest {
        page,
        prior,
        instructions: config.user_instructions.as_deref(),
        accuracy: config.accuracy,
    };

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match gateway.transcribe_page(request).await {
            Ok(completion) => {
                let markdown = normalise(&completion.markdown);
                if markdown.trim().is_empty() {
                    // An empty page body counts as a failed conversion; the
                    // model is asked again like any other transient fault.
                    warn!("Page {}: model returned empty markdown", page_num);
                    last_err = Some("model returned empty markdown".to_string());
                    continue;
                }

                let duration = start.elapsed();
                debug!(
                    "Page {}: {} in / {} out tokens, {:?}",
                    page_num, completion.input_tokens, completion.output_tokens, duration
                );

                capture(config, page_num, Some(&markdown), None).await;

                return PageOutcome {
                    result: PageResult {
                        page_num,
                        markdown,
                        input_tokens: completion.input_tokens,
                        output_tokens: completion.output_tokens,
                        duration_ms: duration.as_millis() as u64,
                        retries: attempt,
                        error: None,
                    },
                    prior_revision: completion.prior_revision,
                };
            }
            Err(e) if e.is_transient() => {
                warn!("Page {}: attempt {} failed — {}", page_num, attempt + 1, e);
                last_err = Some(e.to_string());
            }
            Err(e) => {
                warn!("Page {}: fatal gateway error — {}", page_num, e);
                let detail = e.to_string();
                capture(config, page_num, None, Some(&detail)).await;
                return failed(
                    page_num,
                    start,
                    attempt,
                    PageError::GatewayFatal {
                        page: page_num,
                        detail,
                    },
                );
            }
        }
    }

    let detail = last_err.unwrap_or_else(|| "unknown error".to_string());
    capture(config, page_num, None, Some(&detail)).await;
    failed(
        page_num,
        start,
        config.max_retries,
        PageError::GatewayFailed {
            page: page_num,
            retries: config.max_retries,
            detail,
        },
    )
}

fn failed(page_num: usize, start: Instant, retries: u32, error: PageError) -> PageOutcome {
    PageOutcome {
        result: PageResult {
            page_num,
            markdown: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: start.elapsed().as_millis() as u64,
            retries,
            error: Some(error),
        },
        prior_revision: None,
    }
}

/// Strip a stray outer code fence the model added despite instructions.
fn normalise(markdown: &str) -> String {
    let trimmed = markdown.trim();
    let Some(inner) = trimmed
        .strip_prefix("```")
        .and_then(|s| s.strip_suffix("```"))
    else {
        return trimmed.to_string();
    };
    let inner = inner
        .trim_start_matches("markdown")
        .trim_start_matches("md");
    inner.trim().to_string()
}

/// Persist a per-page diagnostic record when capture is enabled.
///
/// Capture exists for debugging sessions only; any I/O failure is logged
/// and swallowed so diagnostics can never fail a page.
async fn capture(config: &ScanConfig, page_num: usize, markdown: Option<&str>, error: Option<&str>) {
    let Some(ref dir) = config.capture_dir else {
        return;
    };

    let record = serde_json::json!({
        "page": page_num,
        "accuracy": config.accuracy.to_string(),
        "model": config.model,
        "markdown": markdown,
        "error": error,
    });

    let path = dir.join(format!("page_{page_num:04}.json"));
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!("capture: cannot create {}: {}", dir.display(), e);
        return;
    }
    if let Err(e) = tokio::fs::write(&path, record.to_string()).await {
        warn!("capture: cannot write {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalise_strips_fences() {
        assert_eq!(normalise("```markdown\n# Title\n```"), "# Title");
        assert_eq!(normalise("```\n# Title\n```"), "# Title");
        assert_eq!(normalise("# Title"), "# Title");
        assert_eq!(normalise("  # Title \n"), "# Title");
    }

    #[test]
    fn normalise_keeps_inner_fences() {
        let input = "Text\n```rust\nfn main() {}\n```\nMore";
        assert_eq!(normalise(input), input);
    }
}
