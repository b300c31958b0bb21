//! Result records returned by a scan job.
//!
//! Fragments ([`PageResult`]) are immutable once produced and ordered solely
//! by page number; the scheduler guarantees the `pages` vector handed to the
//! aggregator (and stored here) is sorted regardless of completion order.

use crate::config::Accuracy;
use crate::error::PageError;
use serde::{Deserialize, Serialize};

/// The fragment produced for one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-based page number.
    pub page_num: usize,
    /// Normalised Markdown for the page. Empty when `error` is set.
    pub markdown: String,
    /// Prompt tokens consumed by this page's successful call.
    pub input_tokens: usize,
    /// Completion tokens produced by this page's successful call.
    pub output_tokens: usize,
    /// Wall-clock duration of the page conversion, including retries.
    pub duration_ms: u64,
    /// Retries spent before the final outcome.
    pub retries: u32,
    /// Set when the page failed for good; the aggregator emits a placeholder.
    pub error: Option<PageError>,
}

impl PageResult {
    /// A fragment for a page that was never dispatched (cancellation).
    pub fn cancelled(page_num: usize) -> Self {
        Self {
            page_num,
            markdown: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
            retries: 0,
            error: Some(PageError::Cancelled { page: page_num }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Job-level token accumulator.
///
/// Owned by the scheduler and folded at each fragment completion, so no
/// shared mutable state crosses concurrent page conversions. Monotonic for
/// the lifetime of the job; the polish pass adds to the same counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn add(&mut self, input: usize, output: usize) {
        self.input += input as u64;
        self.output += output as u64;
    }
}

/// Aggregate statistics for one scan job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStats {
    /// Pages in the source document.
    pub total_pages: usize,
    /// Pages that produced usable Markdown.
    pub processed_pages: usize,
    /// Pages whose fragment carries an error.
    pub failed_pages: usize,
    /// Selected pages that never produced a fragment (render/encode loss).
    pub skipped_pages: usize,
    /// Total prompt tokens across all model calls, polish included.
    pub total_input_tokens: u64,
    /// Total completion tokens across all model calls, polish included.
    pub total_output_tokens: u64,
    /// End-to-end wall-clock time.
    pub total_duration_ms: u64,
    /// Time spent rasterising pages.
    pub render_duration_ms: u64,
    /// Time spent inside model calls (page conversions plus polish).
    pub model_duration_ms: u64,
}

/// Document metadata extracted without any model involvement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// The result of one scan job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoScanOutput {
    /// The final aggregated Markdown artifact.
    pub markdown: String,
    /// Per-page fragments, sorted by page number.
    pub pages: Vec<PageResult>,
    /// Document metadata.
    pub metadata: DocumentMetadata,
    /// Timing, counts, and token totals.
    pub stats: ScanStats,
    /// Accuracy level the job ran with.
    pub accuracy: Accuracy,
    /// Whether the polish pass ran and succeeded. `false` both when polish
    /// was not requested and when it fell back after exhausting retries.
    pub polish_applied: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_usage_accumulates() {
        let mut usage = TokenUsage::default();
        usage.add(100, 40);
        usage.add(250, 90);
        assert_eq!(usage.input, 350);
        assert_eq!(usage.output, 130);
    }

    #[test]
    fn cancelled_fragment_is_failed() {
        let pr = PageResult::cancelled(3);
        assert!(!pr.is_ok());
        assert_eq!(pr.page_num, 3);
        assert!(pr.markdown.is_empty());
    }
}
