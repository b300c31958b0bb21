//! The model-gateway seam: one trait between the pipeline and the vision model.
//!
//! The pipeline never talks to a provider SDK directly. Everything upstream
//! of the network — scheduling, retries, context carry, aggregation — is
//! written against [`ModelGateway`], so tests drive the whole pipeline with
//! an in-memory double and the production path plugs in [`LlmGateway`].
//!
//! The trait has exactly the two capabilities the pipeline needs:
//!
//! * [`ModelGateway::transcribe_page`] — one page image (plus, in high
//!   accuracy, the previous page's image and final Markdown) in, Markdown
//!   and token counts out. In high accuracy the completion may also carry a
//!   typed revision of the previous page's text.
//! * [`ModelGateway::refine_document`] — the polish variant: full
//!   concatenated Markdown in, reconciled Markdown out. No image.
//!
//! Failures come back as [`GatewayError`], already classified as transient
//! or fatal; the retry policy lives one level up in
//! [`crate::pipeline::page`], never inside a gateway implementation.

mod llm;

pub use llm::LlmGateway;

use crate::config::Accuracy;
use crate::error::GatewayError;
use async_trait::async_trait;

/// One rendered page, encoded for a multimodal request body.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-based page number.
    pub page_num: usize,
    /// Base64-encoded raster payload.
    pub base64: String,
    /// MIME type of the payload, e.g. `image/png`.
    pub mime_type: String,
}

impl PageImage {
    pub fn new(page_num: usize, base64: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            page_num,
            base64: base64.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// The single-step lookback context carried in high accuracy.
///
/// At most one of these exists per sequential run: the scheduler replaces it
/// after every step, so a request for page *n* can only ever see page *n−1*.
#[derive(Debug, Clone)]
pub struct PriorPage {
    /// The previous page's image.
    pub image: PageImage,
    /// The previous page's final Markdown (revision already applied).
    pub markdown: String,
}

/// A page-conversion request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    /// The page to convert.
    pub page: &'a PageImage,
    /// Previous-page context; `Some` only in high accuracy from page 2 on.
    pub prior: Option<&'a PriorPage>,
    /// Caller instructions appended verbatim to the prompt.
    pub instructions: Option<&'a str>,
    /// Accuracy level, selecting the instruction template.
    pub accuracy: Accuracy,
}

/// A successful page conversion.
#[derive(Debug, Clone)]
pub struct PageCompletion {
    /// Markdown for the requested page.
    pub markdown: String,
    /// High accuracy only: a revised version of the *previous* page's text,
    /// returned when the model corrected formatting across the page break
    /// (e.g. a table spanning both pages). Applied at most once by the
    /// scheduler, immediately on receipt.
    pub prior_revision: Option<String>,
    /// Prompt tokens consumed.
    pub input_tokens: usize,
    /// Completion tokens produced.
    pub output_tokens: usize,
}

/// A whole-document refinement request (the polish pass).
#[derive(Debug, Clone, Copy)]
pub struct RefineRequest<'a> {
    /// The fully concatenated Markdown artifact.
    pub markdown: &'a str,
    /// Caller instructions appended verbatim to the prompt.
    pub instructions: Option<&'a str>,
}

/// A successful text-only completion.
#[derive(Debug, Clone)]
pub struct TextCompletion {
    pub markdown: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Capability interface to the generative text-and-vision model.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Convert one page image to Markdown.
    async fn transcribe_page(&self, req: PageRequest<'_>)
        -> Result<PageCompletion, GatewayError>;

    /// Reconcile a fully concatenated document (polish pass).
    async fn refine_document(
        &self,
        req: RefineRequest<'_>,
    ) -> Result<TextCompletion, GatewayError>;
}
