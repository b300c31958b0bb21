//! Progress events for a running scan.
//!
//! Callers inject an `Arc<dyn ScanProgressCallback>` through
//! [`crate::config::ScanConfigBuilder::progress_callback`] to observe the
//! pipeline: a terminal progress bar, a websocket, a log — the library does
//! not care. All methods default to no-ops so implementors override only
//! what they need.
//!
//! In low accuracy, page events fire concurrently from different tasks;
//! implementations must synchronise their own shared state.

/// Observer for per-page scan events. Must be `Send + Sync`.
pub trait ScanProgressCallback: Send + Sync {
    /// Fired once, before any page is dispatched, with the number of pages
    /// actually selected for conversion.
    fn on_scan_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Fired just before a page's first gateway call.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Fired when a page converted successfully.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, markdown_len: usize) {
        let _ = (page_num, total_pages, markdown_len);
    }

    /// Fired when a page failed for good (retries spent or fatal error).
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Fired once after every selected page has been attempted.
    fn on_scan_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// Default observer: ignores everything.
pub struct NoopProgressCallback;

impl ScanProgressCallback for NoopProgressCallback {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        completes: AtomicUsize,
        errors: AtomicUsize,
    }

    impl ScanProgressCallback for Counting {
        fn on_page_complete(&self, _page: usize, _total: usize, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
        fn on_page_error(&self, _page: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_scan_start(3);
        cb.on_page_start(1, 3);
        cb.on_page_complete(1, 3, 42);
        cb.on_page_error(2, 3, "boom");
        cb.on_scan_complete(3, 2);
    }

    #[test]
    fn events_are_countable_through_dyn() {
        let counting = Arc::new(Counting {
            completes: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        });
        let cb: Arc<dyn ScanProgressCallback> = counting.clone();
        cb.on_page_complete(1, 2, 10);
        cb.on_page_error(2, 2, "x");
        assert_eq!(counting.completes.load(Ordering::SeqCst), 1);
        assert_eq!(counting.errors.load(Ordering::SeqCst), 1);
    }
}
