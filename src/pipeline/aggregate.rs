//! The aggregator: merge ordered fragments into the final artifact, with an
//! optional whole-document polish pass.
//!
//! Base aggregation is a pure join: fragments in page order, one separator
//! between pages, an explicit placeholder for each failed page. It never
//! reorders and never drops a page, so the artifact's segment count always
//! matches the selected page count. Running it twice over the same
//! fragments produces byte-identical output.
//!
//! The polish pass sends the joined document back through the gateway once
//! to reconcile heading hierarchy, re-join tables split across page breaks,
//! and drop repeated headers/footers. Polish shares the page converter's
//! retry policy but its failure is never fatal: the job falls back to the
//! unpolished text and reports `polish_applied = false`.

use crate::config::{PageSeparator, ScanConfig};
use crate::gateway::{ModelGateway, RefineRequest};
use crate::output::{PageResult, TokenUsage};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Join fragments into one document, in page order.
///
/// Expects `fragments` pre-sorted by page number (the scheduler guarantees
/// this). A failed fragment contributes a visible placeholder.
pub fn aggregate(fragments: &[PageResult], separator: &PageSeparator) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(fragments.len() * 2);

    for (i, fragment) in fragments.iter().enumerate() {
        if i > 0 {
            parts.push(separator.render(fragment.page_num));
        }
        if fragment.is_ok() {
            parts.push(fragment.markdown.clone());
        } else {
            parts.push(placeholder(fragment.page_num));
        }
    }

    parts.join("")
}

/// The stand-in emitted for a page that produced no usable text.
fn placeholder(page_num: usize) -> String {
    format!("> *Page {page_num} could not be converted.*")
}

/// Run the polish pass over the aggregated document.
///
/// Returns the final text and whether polish was actually applied. Token
/// usage from successful polish calls is folded into `usage`.
pub async fn polish(
    gateway: &Arc<dyn ModelGateway>,
    markdown: String,
    config: &ScanConfig,
    usage: &mut TokenUsage,
) -> (String, bool) {
    let request = RefineRequest {
        markdown: &markdown,
        instructions: config.user_instructions.as_deref(),
    };

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Polish: retry {}/{} after {}ms",
                attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match gateway.refine_document(request).await {
            Ok(completion) if !completion.markdown.trim().is_empty() => {
                usage.add(completion.input_tokens, completion.output_tokens);
                debug!(
                    "Polish complete: {} in / {} out tokens",
                    completion.input_tokens, completion.output_tokens
                );
                return (completion.markdown, true);
            }
            Ok(_) => {
                warn!("Polish: model returned empty document");
            }
            Err(e) if e.is_transient() => {
                warn!("Polish: attempt {} failed — {}", attempt + 1, e);
            }
            Err(e) => {
                warn!("Polish: fatal gateway error — {}; keeping unpolished output", e);
                return (markdown, false);
            }
        }
    }

    info!("Polish exhausted retries; keeping unpolished output");
    (markdown, false)
}
