//! Logging helpers: keep client-supplied text and raw device bytes on one log line.

const MAX_PREVIEW: usize = 120;

/// Escape control characters (and quotes/backslashes) so client text stays on one
/// log line; anything past `MAX_PREVIEW` characters is cut and marked with `…`.
pub fn escape_log(s: &str) -> String {
    let mut out: String = s
        .chars()
        .take(MAX_PREVIEW)
        .flat_map(char::escape_debug)
        .collect();
    if s.chars().nth(MAX_PREVIEW).is_some() {
        out.push('…');
    }
    out
}

/// Space-separated uppercase hex of at most `max` leading bytes.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    let mut out = data
        .iter()
        .take(max)
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ");
    if data.len() > max {
        out.push_str(" …");
    }
    out
}
