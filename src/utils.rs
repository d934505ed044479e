use regex::Regex;
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// First `max_chars` characters of `text` on one line, for log output.
///
/// Whitespace runs are folded into single spaces; the text itself is never
/// rewritten anywhere else.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = WHITESPACE.replace_all(text.trim(), " ");
    let mut out: String = flat.chars().take(max_chars).collect();
    if flat.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
