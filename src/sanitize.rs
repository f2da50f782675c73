//! Message sanitization
//!
//! Normalizes user-submitted text before relay: whitespace runs
//! (including newlines) collapse to single spaces, leading/trailing
//! whitespace is trimmed, and the result is capped at
//! [`MAX_MESSAGE_LEN`] code points. Output rendering safety is the
//! client's concern, not handled here.

/// Maximum message length in code points after normalization
pub const MAX_MESSAGE_LEN: usize = 500;

/// Normalize and bound a user-submitted message
///
/// Pure and deterministic. An all-whitespace input yields an empty
/// string; callers drop empty messages instead of relaying them.
pub fn sanitize_message(message: &str) -> String {
    let collapsed = message.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_MESSAGE_LEN {
        collapsed.chars().take(MAX_MESSAGE_LEN).collect()
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_whitespace_runs() {
        assert_eq!(sanitize_message("a   b\n\nc"), "a b c");
    }

    #[test]
    fn test_trims_edges() {
        assert_eq!(sanitize_message("  hello world \t"), "hello world");
    }

    #[test]
    fn test_tabs_and_newlines_become_single_spaces() {
        assert_eq!(sanitize_message("one\ttwo\r\nthree"), "one two three");
    }

    #[test]
    fn test_whitespace_only_becomes_empty() {
        assert_eq!(sanitize_message("   \n\t  "), "");
        assert_eq!(sanitize_message(""), "");
    }

    #[test]
    fn test_truncates_to_500_code_points() {
        let input = "x".repeat(600);
        let out = sanitize_message(&input);
        assert_eq!(out.chars().count(), MAX_MESSAGE_LEN);
        assert!(input.starts_with(out.as_str()));
    }

    #[test]
    fn test_truncation_counts_code_points_not_bytes() {
        let input = "é".repeat(600);
        let out = sanitize_message(&input);
        assert_eq!(out.chars().count(), MAX_MESSAGE_LEN);
        assert_eq!(out, "é".repeat(MAX_MESSAGE_LEN));
    }

    #[test]
    fn test_short_message_untouched() {
        assert_eq!(sanitize_message("hello"), "hello");
    }
}
