//! Pipeline stages for document-to-Markdown conversion.
//!
//! Each submodule implements one stage; stages only communicate through the
//! types in [`crate::gateway`] and [`crate::output`], so every stage is
//! independently testable.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ schedule ──▶ aggregate
//! (URL/path) (pdfium)  (base64)   (model calls) (join + polish)
//! ```
//!
//! 1. [`input`]    — canonicalise the user-supplied path or URL to a local file
//! 2. [`render`]   — rasterise selected pages at the accuracy-derived DPI;
//!    runs in `spawn_blocking` because pdfium is not async-safe
//! 3. [`encode`]   — PNG-encode and base64-wrap each page
//! 4. [`page`]     — one page conversion: retry/backoff around the gateway call
//! 5. [`schedule`] — concurrent (low) or sequential-with-context (high)
//!    dispatch, cancellation, index-ordered collection
//! 6. [`aggregate`] — join fragments, placeholders for failed pages,
//!    optional polish pass
//! 7. [`postprocess`] — deterministic Markdown cleanup of model quirks

pub mod aggregate;
pub mod encode;
pub mod input;
pub mod page;
pub mod postprocess;
pub mod render;
pub mod schedule;
