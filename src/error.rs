//! Error types for the autoscan library.
//!
//! Three layers reflect three failure scopes:
//!
//! * [`GatewayError`] — one model call failed. Carries the transient/fatal
//!   classification that drives the retry policy in
//!   [`crate::pipeline::page`]: transient errors (timeouts, rate limits,
//!   malformed structured responses) are retried with backoff, fatal errors
//!   (bad credentials, unsupported input) are not.
//!
//! * [`PageError`] — one page failed for good (all retries spent, or a fatal
//!   gateway error). Stored inside [`crate::output::PageResult`] so the rest
//!   of the document survives; the aggregator replaces the page with an
//!   explicit placeholder.
//!
//! * [`AutoScanError`] — the whole scan cannot proceed (bad input file,
//!   provider not configured, every page failed). Returned as
//!   `Err(AutoScanError)` from the top-level `scan*` functions.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the autoscan library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::output::PageResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum AutoScanError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The page selection matched nothing in the document.
    #[error("Page selection is empty (document has {total} pages)")]
    NoPagesSelected { total: usize },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Gateway errors ────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("Model provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The very first page hit a non-retryable gateway error (bad
    /// credentials, unsupported input); nothing useful can follow.
    #[error("First page failed with a non-retryable error: {detail}")]
    FirstPageFatal { detail: String },

    /// Every page failed; the output would be empty.
    #[error("All {total} pages failed after {retries} retries each.\nFirst error: {first_error}")]
    AllPagesFailed {
        total: usize,
        retries: u32,
        first_error: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Stored inside [`crate::output::PageResult`] when a page fails.
/// The overall scan continues unless every page fails.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation or encoding failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// Model calls exhausted all retries.
    #[error("Page {page}: model call failed after {retries} retries: {detail}")]
    GatewayFailed {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// The gateway reported a non-retryable error; no retries were attempted.
    #[error("Page {page}: fatal model error: {detail}")]
    GatewayFatal { page: usize, detail: String },

    /// The scan was cancelled before this page was dispatched.
    #[error("Page {page}: scan cancelled before dispatch")]
    Cancelled { page: usize },
}

impl PageError {
    /// The 1-based page number this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::GatewayFailed { page, .. }
            | PageError::GatewayFatal { page, .. }
            | PageError::Cancelled { page } => *page,
        }
    }
}

/// A classified failure from one model-gateway call.
///
/// The transient/fatal split is the contract between the gateway and the
/// page converter's retry loop: [`GatewayError::is_transient`] decides
/// whether another attempt is worth making.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The call did not complete within the configured per-call timeout.
    #[error("model call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// HTTP 429 or equivalent provider throttling.
    #[error("rate limited by provider: {detail}")]
    RateLimited { detail: String },

    /// Transient provider-side failure (5xx, connection reset, …).
    #[error("transient API error: {detail}")]
    Api { detail: String },

    /// The model answered, but not in the shape the request asked for
    /// (empty output, or high-mode JSON that cannot be parsed).
    #[error("malformed model response: {detail}")]
    MalformedResponse { detail: String },

    /// Authentication failure (401/403). Retrying cannot help.
    #[error("authentication failed: {detail}")]
    Auth { detail: String },

    /// The provider rejected the input as unsupported (image too large,
    /// model without vision capability, …).
    #[error("unsupported input: {detail}")]
    Unsupported { detail: String },

    /// Any other non-retryable failure.
    #[error("fatal gateway error: {detail}")]
    Fatal { detail: String },
}

impl GatewayError {
    /// Whether the retry loop should attempt this call again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout { .. }
                | GatewayError::RateLimited { .. }
                | GatewayError::Api { .. }
                | GatewayError::MalformedResponse { .. }
        )
    }
}
