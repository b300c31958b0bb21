//! CLI binary for autoscan.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ScanConfig` and prints results.

use anyhow::{Context, Result};
use autoscan::{
    inspect, scan, scan_to_file, Accuracy, PageSelection, PageSeparator, ScanConfig,
    ScanProgressCallback,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: renders a live progress bar and per-page log
/// lines using [indicatif]. Works correctly when pages complete out of
/// order (low-accuracy concurrent mode).
struct CliProgressCallback {
    /// The single progress bar anchored at the bottom of the terminal.
    bar: ProgressBar,
    /// Per-page wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
    /// Count of pages that errored out.
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Create a callback whose progress-bar length is set dynamically
    /// by `on_scan_start` (called before any pages are processed).
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_scan_start

        // Initial style: spinner only (no counter until we know the total).
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    /// Switch to the full progress-bar style once we know `total`.
    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Scanning");
        self.bar.reset_eta();
    }
}

impl ScanProgressCallback for CliProgressCallback {
    fn on_scan_start(&self, total_pages: usize) {
        // Switch from spinner-only style to full progress bar now that we
        // know the actual page count.
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting scan of {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap()
            .insert(page_num, Instant::now());
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, markdown_len: usize) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&page_num)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{markdown_len:>5} chars")),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&page_num)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg = if error.len() > 80 {
            format!("{}\u{2026}", &error[..79])
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_scan_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages scanned successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages scanned  ({} failed)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic scan (writes document.md next to the input)
  autoscan document.pdf

  # Scan to an explicit file, or to stdout
  autoscan document.pdf -o output.md
  autoscan document.pdf -o -

  # High accuracy: 200 DPI, sequential, prior page carried as context
  autoscan --accuracy high paper.pdf -o paper.md

  # Specific pages
  autoscan --pages 1-5 report.pdf

  # Use a specific model
  autoscan --model gpt-4o --provider openai document.pdf

  # Scan from URL
  autoscan https://arxiv.org/pdf/1706.03762 -o attention.md

  # Batch a whole directory (each PDF gets a sibling .md)
  autoscan ./invoices/

  # Whole-document polish pass after aggregation
  autoscan --polish book.pdf -o book.md

  # Steer the model for a specific document type
  autoscan --instructions "Transcribe invoice line items as a table" invoice.pdf

  # Inspect PDF metadata (no API key needed)
  autoscan --inspect-only document.pdf

  # JSON output with per-page results and stats
  autoscan --json document.pdf > output.json

ACCURACY:
  low (default)  150 DPI, pages scanned concurrently and independently
  medium         alias of low
  high           200 DPI, pages scanned in order; each call sees the prior
                 page image and transcript and may revise that transcript
                 when a table or paragraph continues across the page break

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY      OpenAI API key
  ANTHROPIC_API_KEY   Anthropic API key
  GEMINI_API_KEY      Google Gemini API key
  AUTOSCAN_PROVIDER   Override provider (openai, anthropic, gemini, ollama)
  AUTOSCAN_MODEL      Override model ID

SETUP:
  1. Set API key:     export OPENAI_API_KEY=sk-...
  2. Scan:            autoscan document.pdf -o output.md
"#;

/// Convert PDF files and URLs to Markdown using vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "autoscan",
    version,
    about = "Convert PDF files and URLs to Markdown using vision LLMs",
    long_about = "Convert PDF documents (local files, URLs, or whole directories) to clean, \
well-structured Markdown using vision language models. Supports OpenAI, Anthropic, Google \
Gemini, and any OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file, directory of PDFs, or HTTP/HTTPS URL.
    input: String,

    /// Output file. Defaults to the input path with a `.md` extension;
    /// pass `-` to write to stdout instead.
    #[arg(short, long, env = "AUTOSCAN_OUTPUT")]
    output: Option<PathBuf>,

    /// Accuracy mode: low, medium (alias of low), or high.
    #[arg(short, long, env = "AUTOSCAN_ACCURACY", default_value = "low")]
    accuracy: String,

    /// Vision model ID (e.g. gpt-4o, claude-sonnet-4-20250514).
    #[arg(long, env = "AUTOSCAN_MODEL")]
    model: Option<String>,

    /// Model provider: openai, anthropic, gemini, ollama.
    #[arg(
        long,
        env = "AUTOSCAN_PROVIDER",
        long_help = "Model provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Rendering DPI override (72–400). Defaults to the accuracy mode's DPI.
    #[arg(long, env = "AUTOSCAN_DPI",
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: Option<u32>,

    /// Number of concurrent model calls (low accuracy only).
    #[arg(short, long, env = "AUTOSCAN_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "AUTOSCAN_PAGES", default_value = "all")]
    pages: String,

    /// Page separator: none, hr, comment, or custom string.
    #[arg(long, env = "AUTOSCAN_SEPARATOR", default_value = "none")]
    separator: String,

    /// Run a whole-document polish pass after aggregation.
    #[arg(long, env = "AUTOSCAN_POLISH")]
    polish: bool,

    /// Extra instructions appended to the system prompt.
    #[arg(long, env = "AUTOSCAN_INSTRUCTIONS")]
    instructions: Option<String>,

    /// Directory to capture raw per-page model responses into (debugging).
    #[arg(long, env = "AUTOSCAN_CAPTURE_DIR")]
    capture_dir: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "AUTOSCAN_PASSWORD")]
    password: Option<String>,

    /// Max model output tokens per page.
    #[arg(long, env = "AUTOSCAN_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "AUTOSCAN_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries per page on transient model failure.
    #[arg(long, env = "AUTOSCAN_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Output structured JSON (AutoScanOutput) instead of Markdown.
    #[arg(long, env = "AUTOSCAN_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "AUTOSCAN_NO_PROGRESS")]
    no_progress: bool,

    /// Print PDF metadata only, no scan.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "AUTOSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "AUTOSCAN_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "AUTOSCAN_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-page model call timeout in seconds.
    #[arg(long, env = "AUTOSCAN_API_TIMEOUT", default_value_t = 90)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let meta = inspect(&cli.input).await.context("Failed to inspect PDF")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialise metadata")?
            );
        } else {
            println!("File:         {}", cli.input);
            if let Some(ref t) = meta.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = meta.author {
                println!("Author:       {}", a);
            }
            if let Some(ref s) = meta.subject {
                println!("Subject:      {}", s);
            }
            println!("Pages:        {}", meta.page_count);
            println!("PDF Version:  {}", meta.pdf_version);
            if let Some(ref p) = meta.producer {
                println!("Producer:     {}", p);
            }
            if let Some(ref c) = meta.creator {
                println!("Creator:      {}", c);
            }
        }
        return Ok(());
    }

    // ── Directory batch mode ─────────────────────────────────────────────
    let input_path = Path::new(&cli.input);
    if input_path.is_dir() {
        return scan_directory(input_path, &cli).await;
    }

    // ── Build config ─────────────────────────────────────────────────────
    // The progress bar starts as a spinner (no page count yet);
    // `on_scan_start` resizes it once the PDF has been inspected.
    let progress_cb: Option<Arc<dyn ScanProgressCallback>> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ScanProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Run scan ─────────────────────────────────────────────────────────
    if let Some(output_path) = resolve_output_path(&cli) {
        let output = scan_to_file(&cli.input, &output_path, &config)
            .await
            .context("Scan failed")?;

        // Summary line (callback already printed the per-page log).
        if !cli.quiet {
            let stats = &output.stats;
            let selected = stats.processed_pages + stats.failed_pages + stats.skipped_pages;
            eprintln!(
                "{}  {}/{} pages  {}ms  →  {}",
                if stats.failed_pages == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                stats.processed_pages,
                selected,
                stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
            eprintln!(
                "   {} tokens in  /  {} tokens out",
                dim(&stats.total_input_tokens.to_string()),
                dim(&stats.total_output_tokens.to_string()),
            );
        }
    } else {
        let output = scan(&cli.input, &config).await.context("Scan failed")?;

        if cli.json {
            let json =
                serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
            println!("{json}");
        } else {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(output.markdown.as_bytes())
                .context("Failed to write to stdout")?;
            // Ensure a trailing newline on stdout.
            if !output.markdown.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }

        // Summary (the callback already printed the final green/red tick).
        if !cli.quiet && !show_progress && !cli.json {
            let selected = output.stats.processed_pages
                + output.stats.failed_pages
                + output.stats.skipped_pages;
            eprintln!(
                "Scanned {}/{} pages in {}ms",
                output.stats.processed_pages, selected, output.stats.total_duration_ms
            );
            if output.stats.failed_pages > 0 {
                eprintln!("  {} pages failed", output.stats.failed_pages);
            }
        } else if !cli.quiet && !cli.json {
            eprintln!(
                "   {} tokens in  /  {} tokens out  /  {}ms total",
                dim(&output.stats.total_input_tokens.to_string()),
                dim(&output.stats.total_output_tokens.to_string()),
                output.stats.total_duration_ms,
            );
        }
    }

    Ok(())
}

/// Where the Markdown goes: `Some(path)` for a file write, `None` for
/// stdout.
///
/// Without `-o` the output lands next to the input with a `.md` extension
/// (URL inputs use the last URL segment, in the current directory).
/// `-o -` forces stdout, as does `--json` when no file was named.
fn resolve_output_path(cli: &Cli) -> Option<PathBuf> {
    match cli.output.as_deref() {
        Some(p) if p.as_os_str() == "-" => None,
        Some(p) => Some(p.to_path_buf()),
        None if cli.json => None,
        None => Some(default_output_path(&cli.input)),
    }
}

fn default_output_path(input: &str) -> PathBuf {
    if input.starts_with("http://") || input.starts_with("https://") {
        let name = input
            .split(['?', '#'])
            .next()
            .unwrap_or(input)
            .rsplit('/')
            .find(|seg| !seg.is_empty())
            .unwrap_or("document");
        // arXiv-style URLs end in a bare ID ("1706.03762"); appending
        // keeps the whole name instead of truncating at the last dot.
        match Path::new(name).extension() {
            Some(ext) if ext.eq_ignore_ascii_case("pdf") => {
                PathBuf::from(name).with_extension("md")
            }
            _ => PathBuf::from(format!("{name}.md")),
        }
    } else {
        Path::new(input).with_extension("md")
    }
}

/// Scan every `*.pdf` in `dir`, writing a sibling `.md` for each.
///
/// Files are processed one at a time; page-level concurrency within each
/// file still applies. A failed file is reported and skipped.
async fn scan_directory(dir: &Path, cli: &Cli) -> Result<()> {
    let mut pdfs: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
        .collect();
    pdfs.sort();

    if pdfs.is_empty() {
        anyhow::bail!("No PDF files found in {}", dir.display());
    }
    if cli.output.is_some() {
        anyhow::bail!("--output cannot be combined with a directory input");
    }

    // Per-page progress bars would interleave across files; keep it quiet
    // and print one line per file instead.
    let config = build_config(cli, None)?;

    let mut failures = 0usize;
    for pdf in &pdfs {
        let out_path = pdf.with_extension("md");
        let input = pdf.to_string_lossy().to_string();
        match scan_to_file(&input, &out_path, &config).await {
            Ok(output) => {
                if !cli.quiet {
                    eprintln!(
                        "{}  {}  ({}/{} pages, {}ms)",
                        green("✔"),
                        bold(&out_path.display().to_string()),
                        output.stats.processed_pages,
                        output.stats.processed_pages + output.stats.failed_pages,
                        output.stats.total_duration_ms,
                    );
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("{}  {}: {}", red("✘"), pdf.display(), e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures}/{} files failed", pdfs.len());
    }
    Ok(())
}

/// Map CLI args to `ScanConfig`.
fn build_config(
    cli: &Cli,
    progress: Option<Arc<dyn ScanProgressCallback>>,
) -> Result<ScanConfig> {
    let accuracy: Accuracy = cli.accuracy.parse().context("Invalid --accuracy")?;
    let pages = parse_pages(&cli.pages)?;
    let separator = parse_separator(&cli.separator);

    let mut builder = ScanConfig::builder()
        .accuracy(accuracy)
        .concurrency(cli.concurrency)
        .pages(pages)
        .page_separator(separator)
        .polish(cli.polish)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(dpi) = cli.dpi {
        builder = builder.dpi(dpi);
    }
    if let Some(ref instructions) = cli.instructions {
        builder = builder.user_instructions(instructions.clone());
    }
    if let Some(ref dir) = cli.capture_dir {
        builder = builder.capture_dir(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    let mut config = builder.build().context("Invalid configuration")?;

    // Fields that stay Option-shaped in the config.
    config.model = cli.model.clone();
    config.provider_name = cli.provider.clone();
    config.password = cli.password.clone();

    Ok(config)
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .context(format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        for &p in &pages {
            if p < 1 {
                anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
            }
        }

        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "none" => PageSeparator::None,
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        custom => PageSeparator::Custom(custom.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_is_sibling_md() {
        assert_eq!(
            default_output_path("/docs/report.pdf"),
            PathBuf::from("/docs/report.md")
        );
        assert_eq!(default_output_path("scan.PDF"), PathBuf::from("scan.md"));
    }

    #[test]
    fn url_output_lands_in_cwd() {
        assert_eq!(
            default_output_path("https://example.com/papers/report.pdf?dl=1"),
            PathBuf::from("report.md")
        );
        // Bare-ID URLs keep the full segment.
        assert_eq!(
            default_output_path("https://arxiv.org/pdf/1706.03762"),
            PathBuf::from("1706.03762.md")
        );
    }

    #[test]
    fn dash_output_means_stdout() {
        let cli = Cli::try_parse_from(["autoscan", "doc.pdf", "-o", "-"]).unwrap();
        assert_eq!(resolve_output_path(&cli), None);

        let cli = Cli::try_parse_from(["autoscan", "doc.pdf"]).unwrap();
        assert_eq!(resolve_output_path(&cli), Some(PathBuf::from("doc.md")));

        let cli = Cli::try_parse_from(["autoscan", "doc.pdf", "--json"]).unwrap();
        assert_eq!(resolve_output_path(&cli), None);
    }
}
