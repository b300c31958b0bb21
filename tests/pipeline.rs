//! Scheduler and aggregation tests driven by an in-memory model gateway.
//!
//! No PDF rendering and no network: pages are synthetic `PageImage`s and the
//! gateway is a scripted double, so these tests exercise the scheduling,
//! retry, context-carry, and aggregation behaviour deterministically.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use autoscan::pipeline::{aggregate, schedule};
use autoscan::{
    Accuracy, CancelFlag, GatewayError, ModelGateway, PageCompletion, PageError, PageImage,
    PageRequest, PageSeparator, RefineRequest, ScanConfig, TextCompletion, TokenUsage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Mock gateway ─────────────────────────────────────────────────────────────

type PageScript =
    dyn for<'a> Fn(PageRequest<'a>, u32) -> Result<PageCompletion, GatewayError> + Send + Sync;
type RefineScript = dyn Fn(&str) -> Result<TextCompletion, GatewayError> + Send + Sync;

/// A scripted [`ModelGateway`]: each call is answered by a closure that
/// receives the request and the per-page attempt index (0-based), and every
/// call is recorded for later assertions.
struct MockGateway {
    page_script: Box<PageScript>,
    refine_script: Box<RefineScript>,
    /// Artificial per-page latency, keyed by page number.
    delay_ms: HashMap<usize, u64>,
    /// Attempt counts per page.
    attempts: Mutex<HashMap<usize, u32>>,
    /// The prior-page context each page saw on its first attempt:
    /// `(prior page number, prior markdown)`.
    prior_seen: Mutex<HashMap<usize, Option<(usize, String)>>>,
    refine_calls: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockGateway {
    fn new<F>(page_script: F) -> Self
    where
        F: for<'a> Fn(PageRequest<'a>, u32) -> Result<PageCompletion, GatewayError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            page_script: Box::new(page_script),
            refine_script: Box::new(|md| {
                Ok(TextCompletion {
                    markdown: format!("{md}\n<!-- polished -->"),
                    input_tokens: 7,
                    output_tokens: 3,
                })
            }),
            delay_ms: HashMap::new(),
            attempts: Mutex::new(HashMap::new()),
            prior_seen: Mutex::new(HashMap::new()),
            refine_calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every page succeeds with `"Page {n} text."` and fixed token counts.
    fn ok() -> Self {
        Self::new(|req, _attempt| Ok(ok_completion(req.page.page_num)))
    }

    fn with_delays(mut self, delays: &[(usize, u64)]) -> Self {
        self.delay_ms = delays.iter().copied().collect();
        self
    }

    fn with_refine<F>(mut self, script: F) -> Self
    where
        F: Fn(&str) -> Result<TextCompletion, GatewayError> + Send + Sync + 'static,
    {
        self.refine_script = Box::new(script);
        self
    }

    fn attempts_for(&self, page_num: usize) -> u32 {
        *self.attempts.lock().unwrap().get(&page_num).unwrap_or(&0)
    }

    fn prior_for(&self, page_num: usize) -> Option<(usize, String)> {
        self.prior_seen
            .lock()
            .unwrap()
            .get(&page_num)
            .cloned()
            .flatten()
    }
}

fn ok_completion(page_num: usize) -> PageCompletion {
    PageCompletion {
        markdown: format!("Page {page_num} text."),
        prior_revision: None,
        input_tokens: 10,
        output_tokens: 5,
    }
}

#[async_trait]
impl ModelGateway for MockGateway {
    async fn transcribe_page(
        &self,
        req: PageRequest<'_>,
    ) -> Result<PageCompletion, GatewayError> {
        let page_num = req.page.page_num;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(&ms) = self.delay_ms.get(&page_num) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let counter = attempts.entry(page_num).or_insert(0);
            let current = *counter;
            *counter += 1;
            current
        };
        if attempt == 0 {
            self.prior_seen.lock().unwrap().insert(
                page_num,
                req.prior.map(|p| (p.image.page_num, p.markdown.clone())),
            );
        }

        let result = (self.page_script)(req, attempt);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn refine_document(
        &self,
        req: RefineRequest<'_>,
    ) -> Result<TextCompletion, GatewayError> {
        self.refine_calls.fetch_add(1, Ordering::SeqCst);
        (self.refine_script)(req.markdown)
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

fn make_pages(n: usize) -> Vec<PageImage> {
    (1..=n)
        .map(|i| PageImage::new(i, format!("cGFnZXtpfQ=={i}"), "image/png"))
        .collect()
}

/// Fast-retry config so failing-page tests finish in milliseconds.
fn test_config(accuracy: Accuracy) -> ScanConfig {
    ScanConfig::builder()
        .accuracy(accuracy)
        .max_retries(3)
        .retry_backoff_ms(1)
        .build()
        .expect("valid config")
}

async fn run(
    mock: Arc<MockGateway>,
    pages: Vec<PageImage>,
    config: &ScanConfig,
) -> (Vec<autoscan::PageResult>, TokenUsage) {
    let gateway: Arc<dyn ModelGateway> = mock;
    let mut usage = TokenUsage::default();
    let results = schedule::schedule(&gateway, pages, config, &mut usage).await;
    (results, usage)
}

// ── Ordering ─────────────────────────────────────────────────────────────────

/// Fragments come back sorted by page number even when completion order is
/// inverted by per-page latency.
#[tokio::test]
async fn concurrent_results_are_page_ordered() {
    let mock = Arc::new(
        MockGateway::ok().with_delays(&[(1, 80), (2, 50), (3, 20), (4, 1)]),
    );
    let config = test_config(Accuracy::Low);

    let (results, _) = run(Arc::clone(&mock), make_pages(4), &config).await;

    let order: Vec<usize> = results.iter().map(|r| r.page_num).collect();
    assert_eq!(order, vec![1, 2, 3, 4]);
    assert_eq!(results[0].markdown, "Page 1 text.");
    assert_eq!(results[3].markdown, "Page 4 text.");
}

/// Token counts from every page are folded into the one accumulator.
#[tokio::test]
async fn token_usage_is_folded_once_per_page() {
    let mock = Arc::new(MockGateway::ok());
    let config = test_config(Accuracy::Low);

    let (results, usage) = run(mock, make_pages(3), &config).await;

    assert_eq!(results.len(), 3);
    assert_eq!(usage.input, 30);
    assert_eq!(usage.output, 15);
}

// ── Concurrency bound ────────────────────────────────────────────────────────

/// With 6 pages and a limit of 2, no more than 2 gateway calls are ever in
/// flight at once.
#[tokio::test]
async fn concurrency_never_exceeds_limit() {
    let mock = Arc::new(MockGateway::ok().with_delays(&[
        (1, 30),
        (2, 30),
        (3, 30),
        (4, 30),
        (5, 30),
        (6, 30),
    ]));
    let config = ScanConfig::builder()
        .accuracy(Accuracy::Low)
        .concurrency(2)
        .build()
        .expect("valid config");

    let (results, _) = run(Arc::clone(&mock), make_pages(6), &config).await;

    assert_eq!(results.len(), 6);
    assert!(results.iter().all(|r| r.is_ok()));
    let peak = mock.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak in-flight calls was {peak}, limit is 2");
}

// ── High-accuracy context carry ──────────────────────────────────────────────

/// Each sequential step sees exactly the previous page as context, and the
/// first page sees none.
#[tokio::test]
async fn sequential_context_is_single_page_lookback() {
    let mock = Arc::new(MockGateway::ok());
    let config = test_config(Accuracy::High);

    let (results, _) = run(Arc::clone(&mock), make_pages(3), &config).await;

    assert_eq!(results.len(), 3);
    assert_eq!(mock.prior_for(1), None);
    assert_eq!(mock.prior_for(2), Some((1, "Page 1 text.".to_string())));
    assert_eq!(mock.prior_for(3), Some((2, "Page 2 text.".to_string())));
}

/// A returned revision replaces the previous page's stored fragment, and the
/// next step's context is the revising page's own text (never two back).
#[tokio::test]
async fn prior_revision_is_applied_to_stored_fragment() {
    let mock = Arc::new(MockGateway::new(|req, _attempt| {
        let page_num = req.page.page_num;
        let mut completion = ok_completion(page_num);
        if page_num == 2 {
            completion.prior_revision = Some("Page 1 text, with the table completed.".to_string());
        }
        Ok(completion)
    }));
    let config = test_config(Accuracy::High);

    let (results, _) = run(Arc::clone(&mock), make_pages(3), &config).await;

    assert_eq!(
        results[0].markdown,
        "Page 1 text, with the table completed."
    );
    assert_eq!(results[1].markdown, "Page 2 text.");
    // Page 3's context came from page 2's own output.
    assert_eq!(mock.prior_for(3), Some((2, "Page 2 text.".to_string())));
}

/// After a failed page the next step runs with no context rather than a
/// stale one.
#[tokio::test]
async fn failed_page_clears_context() {
    let mock = Arc::new(MockGateway::new(|req, _attempt| {
        if req.page.page_num == 2 {
            Err(GatewayError::Api {
                detail: "boom".to_string(),
            })
        } else {
            Ok(ok_completion(req.page.page_num))
        }
    }));
    let config = ScanConfig::builder()
        .accuracy(Accuracy::High)
        .max_retries(1)
        .retry_backoff_ms(1)
        .build()
        .expect("valid config");

    let (results, _) = run(Arc::clone(&mock), make_pages(3), &config).await;

    assert!(results[0].is_ok());
    assert!(!results[1].is_ok());
    assert!(results[2].is_ok());
    assert_eq!(mock.prior_for(3), None);
}

// ── Retry policy ─────────────────────────────────────────────────────────────

/// A page failing with transient errors gets exactly one initial attempt
/// plus `max_retries` retries, then a `GatewayFailed` fragment.
#[tokio::test]
async fn transient_failure_retries_up_to_cap() {
    let mock = Arc::new(MockGateway::new(|_req, _attempt| {
        Err(GatewayError::RateLimited {
            detail: "429".to_string(),
        })
    }));
    let config = test_config(Accuracy::Low);

    let (results, usage) = run(Arc::clone(&mock), make_pages(1), &config).await;

    assert_eq!(mock.attempts_for(1), 4, "1 initial attempt + 3 retries");
    assert_eq!(usage.input, 0);
    match &results[0].error {
        Some(PageError::GatewayFailed { page, retries, .. }) => {
            assert_eq!(*page, 1);
            assert_eq!(*retries, 3);
        }
        other => panic!("expected GatewayFailed, got {other:?}"),
    }
}

/// A transient failure that succeeds on a later attempt records its retry
/// count in the fragment.
#[tokio::test]
async fn transient_failure_recovers_on_retry() {
    let mock = Arc::new(MockGateway::new(|req, attempt| {
        if attempt < 2 {
            Err(GatewayError::Timeout { elapsed_ms: 1 })
        } else {
            Ok(ok_completion(req.page.page_num))
        }
    }));
    let config = test_config(Accuracy::Low);

    let (results, _) = run(Arc::clone(&mock), make_pages(1), &config).await;

    assert!(results[0].is_ok());
    assert_eq!(results[0].retries, 2);
    assert_eq!(mock.attempts_for(1), 3);
}

/// A fatal error ends the page immediately: exactly one call, no retries.
#[tokio::test]
async fn fatal_error_short_circuits_retries() {
    let mock = Arc::new(MockGateway::new(|_req, _attempt| {
        Err(GatewayError::Auth {
            detail: "401 invalid api key".to_string(),
        })
    }));
    let config = test_config(Accuracy::Low);

    let (results, _) = run(Arc::clone(&mock), make_pages(1), &config).await;

    assert_eq!(mock.attempts_for(1), 1, "fatal errors must not be retried");
    assert!(matches!(
        results[0].error,
        Some(PageError::GatewayFatal { page: 1, .. })
    ));
}

/// An empty page body is a failed conversion and gets retried like any
/// other transient fault.
#[tokio::test]
async fn empty_markdown_is_retried_as_transient() {
    let mock = Arc::new(MockGateway::new(|_req, _attempt| {
        Ok(PageCompletion {
            markdown: "   \n".to_string(),
            prior_revision: None,
            input_tokens: 10,
            output_tokens: 0,
        })
    }));
    let config = test_config(Accuracy::Low);

    let (results, _) = run(Arc::clone(&mock), make_pages(1), &config).await;

    assert_eq!(mock.attempts_for(1), 4);
    assert!(matches!(
        results[0].error,
        Some(PageError::GatewayFailed { .. })
    ));
}

// ── Partial failure and aggregation ──────────────────────────────────────────

/// One failed page among successes yields a placeholder at its position;
/// the surrounding pages are untouched.
#[tokio::test]
async fn failed_page_yields_placeholder_in_position() {
    let mock = Arc::new(MockGateway::new(|req, _attempt| {
        if req.page.page_num == 2 {
            Err(GatewayError::Api {
                detail: "503".to_string(),
            })
        } else {
            Ok(ok_completion(req.page.page_num))
        }
    }));
    let config = ScanConfig::builder()
        .accuracy(Accuracy::Low)
        .max_retries(0)
        .retry_backoff_ms(1)
        .build()
        .expect("valid config");

    let (results, _) = run(mock, make_pages(3), &config).await;
    let doc = aggregate::aggregate(&results, &PageSeparator::None);

    let segments: Vec<&str> = doc.split("\n\n").collect();
    assert_eq!(segments[0], "Page 1 text.");
    assert!(segments[1].contains("Page 2 could not be converted"));
    assert_eq!(segments[2], "Page 3 text.");
}

/// Aggregating the same fragments twice produces the same document.
#[tokio::test]
async fn aggregation_is_deterministic() {
    let mock = Arc::new(MockGateway::ok().with_delays(&[(1, 30), (2, 1), (3, 15)]));
    let config = test_config(Accuracy::Low);

    let (results, _) = run(mock, make_pages(3), &config).await;

    let first = aggregate::aggregate(&results, &PageSeparator::HorizontalRule);
    let second = aggregate::aggregate(&results, &PageSeparator::HorizontalRule);
    assert_eq!(first, second);
    assert!(first.contains("\n\n---\n\n"));
}

// ── Polish pass ──────────────────────────────────────────────────────────────

/// A successful polish replaces the document and reports `applied = true`.
#[tokio::test]
async fn polish_success_replaces_document() {
    let mock = Arc::new(MockGateway::ok());
    let config = ScanConfig::builder()
        .accuracy(Accuracy::Low)
        .polish(true)
        .retry_backoff_ms(1)
        .build()
        .expect("valid config");

    let (results, mut usage) = run(Arc::clone(&mock), make_pages(2), &config).await;
    let doc = aggregate::aggregate(&results, &PageSeparator::None);

    let gateway: Arc<dyn ModelGateway> = Arc::clone(&mock) as Arc<dyn ModelGateway>;
    let (polished, applied) = aggregate::polish(&gateway, doc.clone(), &config, &mut usage).await;

    assert!(applied);
    assert!(polished.ends_with("<!-- polished -->"));
    assert_eq!(mock.refine_calls.load(Ordering::SeqCst), 1);
    // Polish tokens were folded on top of the page tokens.
    assert_eq!(usage.input, 27);
    assert_eq!(usage.output, 13);
}

/// A failed polish pass falls back to the unpolished document unchanged.
#[tokio::test]
async fn polish_failure_falls_back_to_unpolished() {
    let mock = Arc::new(MockGateway::ok().with_refine(|_md| {
        Err(GatewayError::Timeout { elapsed_ms: 1 })
    }));
    let config = ScanConfig::builder()
        .accuracy(Accuracy::Low)
        .polish(true)
        .max_retries(1)
        .retry_backoff_ms(1)
        .build()
        .expect("valid config");

    let (results, mut usage) = run(Arc::clone(&mock), make_pages(2), &config).await;
    let doc = aggregate::aggregate(&results, &PageSeparator::None);

    let gateway: Arc<dyn ModelGateway> = Arc::clone(&mock) as Arc<dyn ModelGateway>;
    let (polished, applied) = aggregate::polish(&gateway, doc.clone(), &config, &mut usage).await;

    assert!(!applied);
    assert_eq!(polished, doc, "fallback must return the input unchanged");
    assert_eq!(
        mock.refine_calls.load(Ordering::SeqCst),
        2,
        "1 initial attempt + 1 retry"
    );
}

// ── Cancellation ─────────────────────────────────────────────────────────────

/// Cancelling mid-run in sequential mode stops further dispatch; completed
/// fragments are kept and never-dispatched pages come back as `Cancelled`.
#[tokio::test]
async fn sequential_cancel_stops_dispatch_keeps_completed() {
    let flag = CancelFlag::new();
    let flag_in_mock = flag.clone();
    let mock = Arc::new(MockGateway::new(move |req, _attempt| {
        // The job is cancelled while page 1 is in flight.
        flag_in_mock.cancel();
        Ok(ok_completion(req.page.page_num))
    }));
    let config = ScanConfig::builder()
        .accuracy(Accuracy::High)
        .cancel_flag(flag)
        .retry_backoff_ms(1)
        .build()
        .expect("valid config");

    let (results, _) = run(Arc::clone(&mock), make_pages(3), &config).await;

    assert_eq!(results.len(), 3, "every selected page is accounted for");
    assert!(results[0].is_ok(), "in-flight page finishes naturally");
    assert!(matches!(
        results[1].error,
        Some(PageError::Cancelled { page: 2 })
    ));
    assert!(matches!(
        results[2].error,
        Some(PageError::Cancelled { page: 3 })
    ));
    assert_eq!(
        mock.attempts_for(2),
        0,
        "page 2 must never reach the gateway"
    );
}

/// A flag set before the run starts cancels every page in concurrent mode.
#[tokio::test]
async fn preset_cancel_flag_converts_nothing() {
    let flag = CancelFlag::new();
    flag.cancel();
    let mock = Arc::new(MockGateway::ok());
    let config = ScanConfig::builder()
        .accuracy(Accuracy::Low)
        .cancel_flag(flag)
        .build()
        .expect("valid config");

    let (results, usage) = run(Arc::clone(&mock), make_pages(4), &config).await;

    assert_eq!(results.len(), 4);
    assert!(results
        .iter()
        .all(|r| matches!(r.error, Some(PageError::Cancelled { .. }))));
    assert_eq!(usage.input, 0);
    assert_eq!(mock.attempts_for(1), 0);
}
