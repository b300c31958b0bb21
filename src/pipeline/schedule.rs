//! The scheduler: dispatch page conversions according to the accuracy level
//! and collect fragments in page order.
//!
//! Two strategies sit behind the one [`schedule`] entry point:
//!
//! * **Low accuracy** — pages are independent, so conversions run across a
//!   bounded pool (`config.concurrency` simultaneous gateway calls) via
//!   `buffer_unordered`. Completion order is unspecified; fragments are
//!   re-sorted by page number before returning. One page's failure never
//!   blocks or cancels the others.
//!
//! * **High accuracy** — strictly sequential. Step *n* carries the previous
//!   step's image and final Markdown as context, and may receive back a
//!   revision of page *n−1*'s text, which is applied to the stored fragment
//!   exactly once before step *n+1* begins. The context is replaced, never
//!   merged: a request can only ever see one page back.
//!
//! Cancellation is cooperative: once [`crate::config::CancelFlag`] is set,
//! no further page is dispatched, calls already in flight finish naturally,
//! and never-dispatched pages yield `Cancelled` fragments so the aggregate
//! still accounts for every selected page.

use crate::config::{Accuracy, ScanConfig};
use crate::gateway::{ModelGateway, PageImage, PriorPage};
use crate::output::{PageResult, TokenUsage};
use crate::pipeline::page;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Job phases, traced for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobPhase {
    Pending,
    Dispatching,
    Collecting,
    Done,
    Failed,
}

fn trace_phase(phase: JobPhase) {
    debug!(?phase, "scheduler phase");
}

/// Convert all pages and return their fragments sorted by page number.
///
/// Token usage is folded into `usage` as each fragment completes; the
/// accumulator is owned by the caller and only touched here, at the single
/// collection point, so concurrent conversions share no mutable state.
pub async fn schedule(
    gateway: &Arc<dyn ModelGateway>,
    pages: Vec<PageImage>,
    config: &ScanConfig,
    usage: &mut TokenUsage,
) -> Vec<PageResult> {
    trace_phase(JobPhase::Pending);

    let mut results = match config.accuracy {
        Accuracy::Low => run_concurrent(gateway, pages, config).await,
        Accuracy::High => run_sequential(gateway, pages, config).await,
    };

    trace_phase(JobPhase::Collecting);
    results.sort_by_key(|r| r.page_num);
    for result in &results {
        usage.add(result.input_tokens, result.output_tokens);
    }

    let failed = results.iter().filter(|r| !r.is_ok()).count();
    if !results.is_empty() && failed == results.len() {
        trace_phase(JobPhase::Failed);
    } else {
        trace_phase(JobPhase::Done);
    }
    info!(
        "Scheduled {} pages, {} failed ({} accuracy)",
        results.len(),
        failed,
        config.accuracy
    );

    results
}

/// Low accuracy: independent pages over a bounded worker pool.
async fn run_concurrent(
    gateway: &Arc<dyn ModelGateway>,
    pages: Vec<PageImage>,
    config: &ScanConfig,
) -> Vec<PageResult> {
    trace_phase(JobPhase::Dispatching);
    let total = pages.len();

    stream::iter(pages.into_iter().map(|page| {
        let gateway = Arc::clone(gateway);
        let config = config.clone();
        async move {
            let page_num = page.page_num;

            // A flag set after this future was created but before it is
            // polled still prevents the dispatch; in-flight calls are
            // unaffected.
            if config.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                return PageResult::cancelled(page_num);
            }

            if let Some(ref cb) = config.progress_callback {
                cb.on_page_start(page_num, total);
            }
            let outcome = page::convert_page(&gateway, &page, None, &config).await;
            if let Some(ref cb) = config.progress_callback {
                match &outcome.result.error {
                    None => cb.on_page_complete(page_num, total, outcome.result.markdown.len()),
                    Some(e) => cb.on_page_error(page_num, total, &e.to_string()),
                }
            }
            outcome.result
        }
    }))
    .buffer_unordered(config.concurrency)
    .collect()
    .await
}

/// High accuracy: sequential steps with single-page lookback context.
async fn run_sequential(
    gateway: &Arc<dyn ModelGateway>,
    pages: Vec<PageImage>,
    config: &ScanConfig,
) -> Vec<PageResult> {
    trace_phase(JobPhase::Dispatching);
    let total = pages.len();
    let mut results: Vec<PageResult> = Vec::with_capacity(total);
    let mut prior: Option<PriorPage> = None;

    let mut iter = pages.into_iter();
    while let Some(page) = iter.next() {
        if config.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            results.push(PageResult::cancelled(page.page_num));
            results.extend(iter.map(|p| PageResult::cancelled(p.page_num)));
            break;
        }

        let page_num = page.page_num;
        if let Some(ref cb) = config.progress_callback {
            cb.on_page_start(page_num, total);
        }

        let outcome = page::convert_page(gateway, &page, prior.as_ref(), config).await;

        if let Some(ref cb) = config.progress_callback {
            match &outcome.result.error {
                None => cb.on_page_complete(page_num, total, outcome.result.markdown.len()),
                Some(e) => cb.on_page_error(page_num, total, &e.to_string()),
            }
        }

        // Apply the returned revision to the stored fragment for the
        // previous page — once, immediately, and never further back.
        if let Some(revision) = outcome.prior_revision {
            if let Some(prev) = results.last_mut().filter(|r| r.is_ok()) {
                debug!(
                    "Page {}: applying revision to page {}",
                    page_num, prev.page_num
                );
                prev.markdown = revision;
            }
        }

        // The next step's context is this step's final output. A failed
        // page contributes no context rather than stale or empty text.
        prior = if outcome.result.is_ok() {
            Some(PriorPage {
                markdown: outcome.result.markdown.clone(),
                image: page,
            })
        } else {
            None
        };

        results.push(outcome.result);
    }

    results
}
