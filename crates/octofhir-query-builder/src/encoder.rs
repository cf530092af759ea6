//! Encoding of raw search values before they reach SQL text or bind lists.
//!
//! Three independent concerns live here:
//! - LIKE pattern escaping with `+` as the escape character
//! - quote neutralization for literals rendered inline
//! - accent-insensitive normalization matching the `STR_VALUE_LCASE` column

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Escape character used by every generated `LIKE` predicate.
pub const LIKE_ESCAPE_CHAR: char = '+';

/// Clause appended to every generated `LIKE` predicate.
pub const LIKE_ESCAPE_CLAUSE: &str = " ESCAPE '+'";

/// Escape LIKE wildcards so they match literally.
///
/// The escape character itself is doubled first. Must be applied exactly
/// once, before any operator wildcards are appended.
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len() + 4);
    for c in raw.chars() {
        if matches!(c, LIKE_ESCAPE_CHAR | '%' | '_') {
            escaped.push(LIKE_ESCAPE_CHAR);
        }
        escaped.push(c);
    }
    escaped
}

/// Fold a value the same way the indexer fills `STR_VALUE_LCASE`:
/// canonical decomposition, combining marks dropped, lowercase.
pub fn normalize_for_search(raw: &str) -> String {
    raw.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Literal encoding for schemas that inline values into SQL text.
pub struct SqlParameterEncoder;

impl SqlParameterEncoder {
    /// Neutralize quote breakout by doubling single quotes.
    pub fn encode(raw: &str) -> String {
        raw.replace('\'', "''")
    }

    /// Encode and wrap as a SQL string literal.
    pub fn quote(raw: &str) -> String {
        format!("'{}'", Self::encode(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like_wildcards() {
        assert_eq!(escape_like("50%"), "50+%");
        assert_eq!(escape_like("a_b"), "a+_b");
        assert_eq!(escape_like("c++"), "c++++");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_normalize_strips_accents() {
        assert_eq!(normalize_for_search("Müller"), "muller");
        assert_eq!(normalize_for_search("ÉCOLE"), "ecole");
        assert_eq!(normalize_for_search("Zoë+50%"), "zoe+50%");
    }

    #[test]
    fn test_quote_doubles_single_quotes() {
        assert_eq!(SqlParameterEncoder::encode("O'Brien"), "O''Brien");
        assert_eq!(
            SqlParameterEncoder::quote("x' OR '1'='1"),
            "'x'' OR ''1''=''1'"
        );
    }
}
