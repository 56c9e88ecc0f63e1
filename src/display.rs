//! Small text helpers shared by the command printers.

use chrono::{DateTime, Utc};

/// `YYYY-MM-DD HH:MM:SS`, or `?` when the timestamp is unknown.
pub fn ts(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "?".to_string())
}

/// First `max` characters of `text`, with `...` appended when cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}

/// First `n` characters without an ellipsis, for ids and columns.
pub fn head(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

pub fn rule(c: char, n: usize) -> String {
    std::iter::repeat(c).take(n).collect()
}
