//! Configuration types for a scan job.
//!
//! Every knob lives in [`ScanConfig`], built via [`ScanConfigBuilder`].
//! A scan job is immutable once built: the scheduler, page converter, and
//! aggregator all borrow the same config and never mutate it.

use crate::error::AutoScanError;
use crate::gateway::ModelGateway;
use crate::progress::ScanProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Accuracy level for a scan job.
///
/// This is the single policy switch of the pipeline: it selects the render
/// resolution, whether pages run concurrently or sequentially, and whether
/// cross-page context is carried between model calls.
///
/// | Level | DPI | Scheduling | Context |
/// |-------|-----|------------|---------|
/// | Low   | 150 | concurrent, bounded pool | none |
/// | High  | 200 | strictly sequential | previous page's image + Markdown |
///
/// `"medium"` parses as [`Accuracy::Low`] for callers migrating from older
/// tooling; it is a synonym, not a third strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accuracy {
    /// Independent pages, bounded concurrency, 150 DPI. (default)
    #[default]
    Low,
    /// Sequential page-pair processing with context carry, 200 DPI.
    High,
}

impl Accuracy {
    /// Render resolution for this accuracy level.
    pub fn dpi(self) -> u32 {
        match self {
            Accuracy::Low => 150,
            Accuracy::High => 200,
        }
    }
}

impl FromStr for Accuracy {
    type Err = AutoScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "medium" => Ok(Accuracy::Low),
            "high" => Ok(Accuracy::High),
            other => Err(AutoScanError::InvalidConfig(format!(
                "unknown accuracy level '{other}' (expected 'low' or 'high')"
            ))),
        }
    }
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accuracy::Low => write!(f, "low"),
            Accuracy::High => write!(f, "high"),
        }
    }
}

/// Cooperative cancellation flag for a scan job.
///
/// Cloning shares the flag. Calling [`CancelFlag::cancel`] stops the
/// scheduler from dispatching further pages; model calls already in flight
/// finish (or fail) naturally so no partially-applied context revision is
/// left behind.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Configuration for one scan job.
///
/// Built via [`ScanConfig::builder()`] or [`ScanConfig::default()`].
///
/// # Example
/// ```rust
/// use autoscan::{Accuracy, ScanConfig};
///
/// let config = ScanConfig::builder()
///     .accuracy(Accuracy::High)
///     .model("gpt-4o")
///     .polish(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ScanConfig {
    /// Accuracy level. Selects DPI, scheduling strategy, and context carry.
    pub accuracy: Accuracy,

    /// Render DPI override. When `None`, [`Accuracy::dpi`] applies.
    pub dpi: Option<u32>,

    /// Maximum rendered image dimension in pixels. Default: 2000.
    ///
    /// Caps either dimension regardless of DPI so an oversized page cannot
    /// exhaust memory or exceed provider upload limits.
    pub max_rendered_pixels: u32,

    /// Concurrent model calls in low-accuracy mode. Default: 4.
    ///
    /// Ignored in high-accuracy mode, which is sequential by construction.
    pub concurrency: usize,

    /// Model identifier, e.g. "gpt-4o". `None` uses the provider default.
    pub model: Option<String>,

    /// Provider name (e.g. "openai", "anthropic", "ollama").
    /// `None` means auto-detect from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed model gateway. Takes precedence over provider
    /// resolution; this is also the injection point for test doubles.
    pub gateway: Option<Arc<dyn ModelGateway>>,

    /// Free-text instructions appended verbatim to every page request.
    pub user_instructions: Option<String>,

    /// Run the whole-document polish pass after aggregation. Default: false.
    pub polish: bool,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// Separator inserted between pages in the final artifact. Default: none.
    pub page_separator: PageSeparator,

    /// Maximum retry attempts per model call on a transient failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds; doubles per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-model-call timeout in seconds. Default: 90.
    ///
    /// A timed-out call is classified as a transient failure and retried.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Sampling temperature. Default: 0.0 (deterministic transcription).
    pub temperature: f32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Directory for raw request/response capture files, one JSON per page.
    /// `None` disables capture. Capture failures are logged, never fatal.
    pub capture_dir: Option<PathBuf>,

    /// Per-page progress callback.
    pub progress_callback: Option<Arc<dyn ScanProgressCallback>>,

    /// Cooperative cancellation flag shared with the caller.
    pub cancel: Option<CancelFlag>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            accuracy: Accuracy::Low,
            dpi: None,
            max_rendered_pixels: 2000,
            concurrency: 4,
            model: None,
            provider_name: None,
            gateway: None,
            user_instructions: None,
            polish: false,
            pages: PageSelection::default(),
            page_separator: PageSeparator::default(),
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 90,
            download_timeout_secs: 120,
            max_tokens: 4096,
            temperature: 0.0,
            password: None,
            capture_dir: None,
            progress_callback: None,
            cancel: None,
        }
    }
}

impl fmt::Debug for ScanConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanConfig")
            .field("accuracy", &self.accuracy)
            .field("dpi", &self.dpi)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("gateway", &self.gateway.as_ref().map(|_| "<dyn ModelGateway>"))
            .field("polish", &self.polish)
            .field("pages", &self.pages)
            .field("max_retries", &self.max_retries)
            .field("capture_dir", &self.capture_dir)
            .finish()
    }
}

impl ScanConfig {
    /// Create a new builder.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder {
            config: Self::default(),
        }
    }

    /// Effective render DPI: explicit override, else the accuracy default.
    pub fn effective_dpi(&self) -> u32 {
        self.dpi.unwrap_or_else(|| self.accuracy.dpi())
    }
}

/// Builder for [`ScanConfig`].
#[derive(Debug)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    pub fn accuracy(mut self, level: Accuracy) -> Self {
        self.config.accuracy = level;
        self
    }

    /// Override the accuracy-derived render DPI. Validated by [`build`].
    ///
    /// [`build`]: ScanConfigBuilder::build
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = Some(dpi);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn gateway(mut self, gateway: Arc<dyn ModelGateway>) -> Self {
        self.config.gateway = Some(gateway);
        self
    }

    pub fn user_instructions(mut self, text: impl Into<String>) -> Self {
        self.config.user_instructions = Some(text.into());
        self
    }

    pub fn polish(mut self, v: bool) -> Self {
        self.config.polish = v;
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.capture_dir = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn ScanProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.config.cancel = Some(flag);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ScanConfig, AutoScanError> {
        let c = &self.config;
        if let Some(dpi) = c.dpi {
            if !(72..=400).contains(&dpi) {
                return Err(AutoScanError::InvalidConfig(format!(
                    "DPI must be 72–400, got {dpi}"
                )));
            }
        }
        if c.concurrency == 0 {
            return Err(AutoScanError::InvalidConfig(
                "concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which pages of the document to scan. 1-based, inclusive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// All pages (default).
    #[default]
    All,
    /// A single page.
    Single(usize),
    /// A contiguous inclusive range.
    Range(usize, usize),
    /// Specific pages (deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

/// Separator inserted between page fragments in the final artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Pages joined with a single blank line. (default)
    #[default]
    None,
    /// Horizontal rule between pages.
    HorizontalRule,
    /// HTML comment carrying the page number.
    Comment,
    /// Custom string between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator preceding the given page (1-based).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_parse_and_alias() {
        assert_eq!("low".parse::<Accuracy>().unwrap(), Accuracy::Low);
        assert_eq!("HIGH".parse::<Accuracy>().unwrap(), Accuracy::High);
        // `medium` is a compatibility synonym for low, not a third level.
        assert_eq!("medium".parse::<Accuracy>().unwrap(), Accuracy::Low);
        assert!("ultra".parse::<Accuracy>().is_err());
    }

    #[test]
    fn accuracy_selects_dpi() {
        assert_eq!(Accuracy::Low.dpi(), 150);
        assert_eq!(Accuracy::High.dpi(), 200);
    }

    #[test]
    fn dpi_override_wins() {
        let config = ScanConfig::builder()
            .accuracy(Accuracy::High)
            .dpi(96)
            .build()
            .unwrap();
        assert_eq!(config.effective_dpi(), 96);

        let config = ScanConfig::builder().accuracy(Accuracy::High).build().unwrap();
        assert_eq!(config.effective_dpi(), 200);
    }

    #[test]
    fn builder_rejects_zero_concurrency() {
        let err = ScanConfig::builder().concurrency(0).build().unwrap_err();
        assert!(matches!(err, AutoScanError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_out_of_range_dpi() {
        assert!(ScanConfig::builder().dpi(50).build().is_err());
        assert!(ScanConfig::builder().dpi(600).build().is_err());
        assert!(ScanConfig::builder().dpi(300).build().is_ok());
    }

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(5), vec![0, 1, 2, 3, 4]);
        assert_eq!(PageSelection::Single(3).to_indices(5), vec![2]);
        assert_eq!(PageSelection::Single(6).to_indices(5), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 4).to_indices(5), vec![1, 2, 3]);
        assert_eq!(
            PageSelection::Set(vec![3, 1, 3]).to_indices(5),
            vec![0, 2] // deduplicated and sorted
        );
    }

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn separator_render() {
        assert_eq!(PageSeparator::None.render(2), "\n\n");
        assert!(PageSeparator::Comment.render(2).contains("page 2"));
    }
}
