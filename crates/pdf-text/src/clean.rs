//! Whitespace normalization for extracted text

use std::sync::LazyLock;

use regex::Regex;

static HORIZONTAL_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("static regex"));

static BLANK_LINE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("static regex"));

/// Collapse whitespace while keeping line structure.
///
/// Lines are trimmed, runs of spaces/tabs become one space, three or more
/// consecutive newlines become a single blank line, and the ends are trimmed.
pub fn clean_text(raw: &str) -> String {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<String> = normalized
        .lines()
        .map(|line| HORIZONTAL_RUNS.replace_all(line.trim(), " ").into_owned())
        .collect();
    let joined = lines.join("\n");
    BLANK_LINE_RUNS
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}
