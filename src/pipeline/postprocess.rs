//! Deterministic cleanup of model-generated Markdown.
//!
//! Vision models occasionally emit output that is semantically right but
//! structurally off: CRLF line endings, GFM tables missing their separator
//! row, spurious separator rows mid-table, invisible Unicode. These are
//! cheap string/regex fixes; keeping them here instead of in the prompt
//! keeps the prompt about *what to extract* rather than formatting
//! edge-cases. Outer code fences are already handled by the page converter
//! before the fragment is stored.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to one page fragment, in order.
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = trim_line_ends(&s);
    let s = collapse_blank_lines(&s);
    let s = insert_missing_table_separators(&s);
    let s = drop_mid_table_separators(&s);
    let s = strip_invisible_chars(&s);
    ensure_final_newline(&s)
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_line_ends(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUNS.replace_all(input, "\n\n\n").to_string()
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{trimmed}\n")
    }
}

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.ends_with('|') && t.len() > 2
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// GFM requires a separator row after the header; insert one when the model
/// went straight from the header to data rows.
fn insert_missing_table_separators(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 4);
    let mut prev_was_table = false;

    for (i, line) in lines.iter().enumerate() {
        out.push((*line).to_string());

        let starts_table = is_table_row(line) && !is_separator_row(line) && !prev_was_table;
        if starts_table {
            let next = lines.get(i + 1).copied().unwrap_or("");
            if is_table_row(next) && !is_separator_row(next) {
                let cols = line.matches('|').count().saturating_sub(1).max(1);
                let mut sep = String::from("|");
                for _ in 0..cols {
                    sep.push_str(" --- |");
                }
                out.push(sep);
            }
        }
        prev_was_table = is_table_row(line);
    }

    out.join("\n")
}

/// GFM allows a separator only in row 2 of a table; drop any the model
/// scattered through the body.
fn drop_mid_table_separators(input: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut rows_in_table = 0usize;

    for line in input.lines() {
        if is_table_row(line) {
            rows_in_table += 1;
            if is_separator_row(line) && rows_in_table != 2 {
                continue;
            }
        } else {
            rows_in_table = 0;
        }
        out.push(line);
    }

    out.join("\n")
}

fn strip_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn trailing_whitespace() {
        assert_eq!(trim_line_ends("  hi   \nthere  "), "  hi\nthere");
    }

    #[test]
    fn blank_line_runs() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\n\nb"), "a\n\n\nb");
    }

    #[test]
    fn final_newline() {
        assert_eq!(ensure_final_newline("x"), "x\n");
        assert_eq!(ensure_final_newline("x\n\n\n"), "x\n");
        assert_eq!(ensure_final_newline(""), "\n");
    }

    #[test]
    fn missing_separator_inserted() {
        let fixed = insert_missing_table_separators("| A | B |\n| 1 | 2 |");
        let lines: Vec<&str> = fixed.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(is_separator_row(lines[1]));
    }

    #[test]
    fn intact_table_untouched() {
        let input = "| A | B |\n| --- | --- |\n| 1 | 2 |";
        assert_eq!(insert_missing_table_separators(input), input);
    }

    #[test]
    fn separator_inserted_only_after_first_row() {
        let input = "| 1 | 2 |\n| 3 | 4 |\n| 5 | 6 |";
        let fixed = insert_missing_table_separators(input);
        let lines: Vec<&str> = fixed.lines().collect();
        assert_eq!(lines.iter().filter(|l| is_separator_row(l)).count(), 1);
        assert!(is_separator_row(lines[1]));
    }

    #[test]
    fn mid_table_separator_dropped() {
        let input = "| A | B |\n| --- | --- |\n| 1 | 2 |\n| --- | --- |\n| 3 | 4 |";
        let fixed = drop_mid_table_separators(input);
        assert_eq!(fixed.lines().filter(|l| is_separator_row(l)).count(), 1);
        assert!(fixed.contains("| 3 | 4 |"));
    }

    #[test]
    fn invisible_chars_removed() {
        assert_eq!(
            strip_invisible_chars("a\u{200B}b\u{FEFF}c\u{00AD}d"),
            "abcd"
        );
    }

    #[test]
    fn full_pipeline() {
        let input = "# Title\r\n\r\nText   \n\n\n\n\n\n| A | B |\n| 1 | 2 |";
        let out = clean_markdown(input);
        assert!(out.starts_with("# Title"));
        assert!(out.ends_with('\n'));
        assert!(!out.contains("\r"));
        assert!(!out.contains("\n\n\n\n"));
    }
}
