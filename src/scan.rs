//! Top-level scan entry points: the full pipeline from input to
//! [`AutoScanOutput`].
//!
//! [`scan`] is the primary API. It resolves the input, rasterises the
//! selected pages at the accuracy-derived DPI, schedules the page
//! conversions, aggregates the fragments (with the optional polish pass),
//! and packages text, timing, and token totals into the result record.
//!
//! Partial failure is a success: as long as at least one page produced
//! usable text the job returns `Ok`, with placeholders for failed pages and
//! the failure count in `stats.failed_pages`.

use crate::config::ScanConfig;
use crate::error::{AutoScanError, PageError};
use crate::gateway::{LlmGateway, ModelGateway, PageImage};
use crate::output::{AutoScanOutput, DocumentMetadata, ScanStats, TokenUsage};
use crate::pipeline::{aggregate, encode, input, postprocess, render, schedule};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert a PDF file or URL to Markdown.
///
/// # Errors
/// Returns `Err(AutoScanError)` only for fatal conditions: missing or
/// invalid input, no provider configured, a non-retryable gateway error on
/// the first page, or every page failing. Individual page failures are
/// reported through `stats.failed_pages` and placeholders in the artifact.
pub async fn scan(
    input_str: impl AsRef<str>,
    config: &ScanConfig,
) -> Result<AutoScanOutput, AutoScanError> {
    let total_start = Instant::now();
    let input_str = input_str.as_ref();
    info!("Starting scan: {} ({} accuracy)", input_str, config.accuracy);

    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let pdf_path = resolved.path().to_path_buf();

    let gateway = resolve_gateway(config)?;

    let metadata = render::extract_metadata(&pdf_path, config.password.as_deref()).await?;
    let total_pages = metadata.page_count;
    info!("PDF has {} pages", total_pages);

    let page_indices = config.pages.to_indices(total_pages);
    if page_indices.is_empty() {
        return Err(AutoScanError::NoPagesSelected { total: total_pages });
    }
    debug!("Selected {} pages", page_indices.len());

    if let Some(ref cb) = config.progress_callback {
        cb.on_scan_start(page_indices.len());
    }

    // ── Rasterise + encode ───────────────────────────────────────────────
    let render_start = Instant::now();
    let rendered = render::render_pages(
        &pdf_path,
        config.effective_dpi(),
        config.max_rendered_pixels,
        config.password.as_deref(),
        &page_indices,
    )
    .await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!("Rendered {} pages in {}ms", rendered.len(), render_duration_ms);

    let pages: Vec<PageImage> = rendered
        .iter()
        .filter_map(|(idx, img)| match encode::encode_page(idx + 1, img) {
            Ok(page) => Some(page),
            Err(e) => {
                warn!("Failed to encode page {}: {}", idx + 1, e);
                None
            }
        })
        .collect();
    drop(rendered);

    // ── Schedule model calls ─────────────────────────────────────────────
    let model_start = Instant::now();
    let mut usage = TokenUsage::default();
    let mut fragments = schedule::schedule(&gateway, pages, config, &mut usage).await;

    for fragment in &mut fragments {
        if fragment.is_ok() {
            fragment.markdown = postprocess::clean_markdown(&fragment.markdown);
        }
    }

    // ── Failure policy ───────────────────────────────────────────────────
    let processed = fragments.iter().filter(|f| f.is_ok()).count();
    let failed = fragments.iter().filter(|f| !f.is_ok()).count();
    let skipped = page_indices.len().saturating_sub(fragments.len());

    if let Some(PageError::GatewayFatal { detail, .. }) =
        fragments.first().and_then(|f| f.error.as_ref())
    {
        return Err(AutoScanError::FirstPageFatal {
            detail: detail.clone(),
        });
    }

    if processed == 0 {
        let first_error = fragments
            .iter()
            .find_map(|f| f.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(AutoScanError::AllPagesFailed {
            total: fragments.len(),
            retries: config.max_retries,
            first_error,
        });
    }

    // ── Aggregate + polish ───────────────────────────────────────────────
    let markdown = aggregate::aggregate(&fragments, &config.page_separator);
    let (markdown, polish_applied) = if config.polish {
        aggregate::polish(&gateway, markdown, config, &mut usage).await
    } else {
        (markdown, false)
    };
    let model_duration_ms = model_start.elapsed().as_millis() as u64;

    if let Some(ref cb) = config.progress_callback {
        cb.on_scan_complete(page_indices.len(), processed);
    }

    let stats = ScanStats {
        total_pages,
        processed_pages: processed,
        failed_pages: failed,
        skipped_pages: skipped,
        total_input_tokens: usage.input,
        total_output_tokens: usage.output,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        render_duration_ms,
        model_duration_ms,
    };

    info!(
        "Scan complete: {}/{} pages, {} in / {} out tokens, {}ms",
        processed,
        page_indices.len(),
        stats.total_input_tokens,
        stats.total_output_tokens,
        stats.total_duration_ms
    );

    Ok(AutoScanOutput {
        markdown,
        pages: fragments,
        metadata,
        stats,
        accuracy: config.accuracy,
        polish_applied,
    })
}

/// Convert a PDF and write the artifact to a file.
///
/// Atomic write (temp file + rename) so readers never see a partial file.
pub async fn scan_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ScanConfig,
) -> Result<AutoScanOutput, AutoScanError> {
    let output = scan(input_str, config).await?;
    let path = output_path.as_ref();

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AutoScanError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
    }

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, &output.markdown)
        .await
        .map_err(|e| AutoScanError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| AutoScanError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok(output)
}

/// Synchronous wrapper around [`scan`]; creates a tokio runtime internally.
pub fn scan_sync(
    input_str: impl AsRef<str>,
    config: &ScanConfig,
) -> Result<AutoScanOutput, AutoScanError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AutoScanError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(scan(input_str, config))
}

/// Convert in-memory PDF bytes to Markdown.
///
/// The bytes are written to a managed temp file that is deleted on return.
pub async fn scan_from_bytes(
    bytes: &[u8],
    config: &ScanConfig,
) -> Result<AutoScanOutput, AutoScanError> {
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| AutoScanError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| AutoScanError::Internal(format!("tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();
    // `tmp` is dropped (and the file deleted) when `scan` returns.
    scan(&path, config).await
}

/// Extract document metadata without converting content.
///
/// Needs no model provider or API key.
pub async fn inspect(input_str: impl AsRef<str>) -> Result<DocumentMetadata, AutoScanError> {
    let resolved = input::resolve_input(input_str.as_ref(), 120).await?;
    render::extract_metadata(resolved.path(), None).await
}

/// The gateway for this job: caller-injected, else resolved from the
/// config and environment.
fn resolve_gateway(config: &ScanConfig) -> Result<Arc<dyn ModelGateway>, AutoScanError> {
    if let Some(ref gateway) = config.gateway {
        return Ok(Arc::clone(gateway));
    }
    Ok(Arc::new(LlmGateway::from_config(config)?))
}
