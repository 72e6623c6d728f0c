//! Content preparation before embedding in an evaluation prompt.

use keel_types::DurationMs;

/// Replacement for the prompt delimiter so content cannot close the quoted
/// block it is embedded in.
const DELIMITER: &str = "\"\"\"";
const DELIMITER_REPLACEMENT: &str = "[TRIPLE_QUOTE]";

/// Longest content accepted for evaluation under `timeout`.
///
/// Short budgets get a tighter cap since the model will not get through a
/// long document in time anyway.
pub fn content_cap(timeout: DurationMs) -> usize {
    if timeout.as_millis() < 10_000 {
        10_000
    } else {
        50_000
    }
}

/// Neutralize delimiters, collapse line breaks and truncate to
/// `preview_chars` characters.
pub fn sanitize(content: &str, preview_chars: usize) -> String {
    let escaped = content.replace(DELIMITER, DELIMITER_REPLACEMENT);

    let mut out = String::with_capacity(escaped.len().min(preview_chars * 4));
    let mut in_break = false;
    for ch in escaped.chars() {
        if ch == '\r' || ch == '\n' {
            if !in_break {
                out.push(' ');
                in_break = true;
            }
        } else {
            out.push(ch);
            in_break = false;
        }
    }

    match out.char_indices().nth(preview_chars) {
        Some((idx, _)) => {
            out.truncate(idx);
            out
        }
        None => out,
    }
}
