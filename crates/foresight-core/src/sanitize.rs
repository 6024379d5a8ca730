//! Text hygiene for suggestion fields
//!
//! Everything the generation service writes ends up rendered in a client, so
//! markup tags and `javascript:` schemes are removed and each field is cut to
//! its column limit before a suggestion is constructed.

use lazy_static::lazy_static;
use regex::Regex;

/// Column limit for `title`
pub const TITLE_MAX_CHARS: usize = 200;
/// Column limit for `description`
pub const DESCRIPTION_MAX_CHARS: usize = 1000;
/// Column limit for `rationale`
pub const RATIONALE_MAX_CHARS: usize = 500;
/// Column limit for `category`
pub const CATEGORY_MAX_CHARS: usize = 100;

lazy_static! {
    static ref TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref JS_SCHEME: Regex = Regex::new(r"(?i)javascript\s*:").unwrap();
}

/// Strip markup and script schemes, trim, and cut to `max_chars` characters.
pub fn sanitize_text(input: &str, max_chars: usize) -> String {
    let mut cleaned = TAG.replace_all(input, "").into_owned();
    // Removing one scheme can splice another together ("javajavascript:script:").
    while JS_SCHEME.is_match(&cleaned) {
        cleaned = JS_SCHEME.replace_all(&cleaned, "").into_owned();
    }
    truncate_chars(cleaned.trim(), max_chars)
}

/// Cut a string to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => input[..byte_idx].to_string(),
        None => input.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_scripts() {
        let dirty = "<b>Refactor</b> the <script>alert(1)</script>parser javascript:void(0)";
        let clean = sanitize_text(dirty, TITLE_MAX_CHARS);
        assert_eq!(clean, "Refactor the alert(1)parser void(0)");
    }

    #[test]
    fn scheme_match_is_case_insensitive() {
        assert_eq!(sanitize_text("JavaScript : go", 50), "go");
    }

    #[test]
    fn spliced_scheme_is_removed() {
        assert_eq!(sanitize_text("javajavascript:script:alert", 50), "alert");
    }

    #[test]
    fn truncates_on_char_boundary() {
        let s = "é".repeat(300);
        let out = sanitize_text(&s, TITLE_MAX_CHARS);
        assert_eq!(out.chars().count(), TITLE_MAX_CHARS);
    }

    #[test]
    fn short_input_is_untouched() {
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abcdef", 3), "abc");
    }
}
