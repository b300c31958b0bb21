//! # autoscan
//!
//! Convert PDF documents to Markdown using vision language models.
//!
//! ## Why this crate?
//!
//! Text-extraction tools (pdftotext, pdf-extract) struggle with scanned
//! documents, multi-column layouts, tables, and formulae. Instead this crate
//! rasterises each page into a PNG and lets a vision model read it as a
//! human would, producing Markdown that preserves reading order and
//! structure.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Render     rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Encode     PNG → base64 page images
//!  ├─ 4. Schedule   page conversions through the model gateway
//!  │                  low accuracy:  concurrent, pages independent
//!  │                  high accuracy: sequential, prior page as context
//!  ├─ 5. Aggregate  fragments joined in page order, placeholders for
//!  │                failed pages, optional whole-document polish pass
//!  └─ 6. Output     Markdown + per-page results, stats, token totals
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use autoscan::{scan, ScanConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = ScanConfig::default();
//!     let output = scan("document.pdf", &config).await?;
//!     println!("{}", output.markdown);
//!     eprintln!("tokens: {} in / {} out",
//!         output.stats.total_input_tokens,
//!         output.stats.total_output_tokens);
//!     Ok(())
//! }
//! ```
//!
//! ## Accuracy Modes
//!
//! | Mode | DPI | Scheduling | Context |
//! |------|-----|-----------|---------|
//! | `low` (default) | 150 | concurrent | none |
//! | `high` | 200 | sequential | prior page image + transcript |
//!
//! High accuracy also lets the model revise the previous page's transcript
//! when the new page reveals a continuation (a table or paragraph split
//! across the page break).
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `autoscan` binary (clap + anyhow + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! autoscan = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod gateway;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod scan;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    Accuracy, CancelFlag, PageSelection, PageSeparator, ScanConfig, ScanConfigBuilder,
};
pub use error::{AutoScanError, GatewayError, PageError};
pub use gateway::{
    LlmGateway, ModelGateway, PageCompletion, PageImage, PageRequest, PriorPage, RefineRequest,
    TextCompletion,
};
pub use output::{AutoScanOutput, DocumentMetadata, PageResult, ScanStats, TokenUsage};
pub use progress::{NoopProgressCallback, ScanProgressCallback};
pub use scan::{inspect, scan, scan_from_bytes, scan_sync, scan_to_file};
