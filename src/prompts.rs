//! Instruction templates for the model gateway.
//!
//! Every prompt lives here so behaviour changes happen in one place and unit
//! tests can inspect the templates without a live model. The page converter
//! and aggregator never embed prompt text themselves.

/// System prompt for low-accuracy page conversion: one independent page in,
/// plain Markdown out.
pub const PAGE_SYSTEM_PROMPT: &str = r#"Convert the PDF page image to clean, well-structured Markdown. Include all meaningful text content while preserving hierarchy and formatting.

Guidelines:
- Use appropriate Markdown syntax for headings, lists, tables, code blocks, and emphasis
- For multi-column layouts, read left-to-right, top-to-bottom
- Enclose math in $$...$$
- Skip page numbers and repetitive headers/footers
- For images and charts, provide a short description in a blockquote

Output only the Markdown content, no explanations and no surrounding code fences."#;

/// System prompt for high-accuracy page-pair conversion.
///
/// The model receives the previous page's image and final Markdown alongside
/// the new page, and must answer with a JSON object carrying two named
/// fields so formatting continuity across the page break can be corrected
/// retroactively:
///
/// ```json
/// {"previous_page": "…revised or null…", "current_page": "…"}
/// ```
///
/// `previous_page` is null when the previous page needs no change;
/// `current_page` is always required. Anything that does not parse as this
/// object is treated as a malformed (retryable) response.
pub const PAIR_SYSTEM_PROMPT: &str = r#"Convert the new PDF page image to clean, well-structured Markdown. You are also given the previous page's image and the Markdown already produced for it.

Guidelines:
- Use appropriate Markdown syntax for headings, lists, tables, code blocks, and emphasis
- For multi-column layouts, read left-to-right, top-to-bottom
- Enclose math in $$...$$
- Skip page numbers and repetitive headers/footers
- Keep heading levels, list numbering, and table formatting consistent with the previous page
- If a table or sentence continues from the previous page, continue it without repeating headers
- If the previous page's Markdown should change to join cleanly with the new page (for example a table split across the break), return the corrected previous page in full; otherwise return null for it

Respond with exactly one JSON object and nothing else:
{"previous_page": <revised previous page Markdown or null>, "current_page": <new page Markdown>}"#;

/// System prompt for the whole-document polish pass.
pub const POLISH_SYSTEM_PROMPT: &str = r#"You are given a Markdown document that was assembled from per-page conversions of a PDF. Reconcile it into one coherent document:

- Normalise the heading hierarchy so levels are consistent throughout
- Merge tables that were split across page boundaries into single tables
- Remove duplicated running headers and footers
- Rejoin sentences and list items fragmented at page breaks
- Keep all factual content exactly as it is; never add, summarise, or reorder content

Output only the corrected Markdown, no explanations and no surrounding code fences."#;

/// Context message carrying the previous page's Markdown in high accuracy.
pub fn prior_page_context(prior_markdown: &str) -> String {
    format!(
        "Markdown already produced for the previous page (the first image):\n\n\"\"\"\n{}\n\"\"\"",
        prior_markdown
    )
}

/// Splice caller instructions onto a system prompt, verbatim.
pub fn with_instructions(system: &str, instructions: Option<&str>) -> String {
    match instructions {
        Some(extra) if !extra.trim().is_empty() => {
            format!("{system}\n\nAdditional instructions from the caller:\n{extra}")
        }
        _ => system.to_string(),
    }
}
