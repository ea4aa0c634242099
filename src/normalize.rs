//! Shared normalization helpers for OCR text, song headings and book names.
//!
//! Used by detection (heading cleanup, upper-case artist inference), metadata
//! loading (song identity) and the pipeline (book file resolution).

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Regex to collapse multiple whitespace into single space
pub static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Whitespace run that does not cross a line break
pub static INLINE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]+").unwrap());

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Check if a character is a Unicode combining mark (diacritical mark).
/// Used to filter out accents during normalization.
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// Fold Unicode text to ASCII by applying NFKD decomposition and removing combining marks.
/// e.g., "Das Ding 1 (grün)" → "das ding 1 (grun)"
pub fn fold_to_ascii(s: &str) -> String {
    // First strip diacritics via NFKD decomposition
    let stripped: String = s.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    // Then transliterate any remaining non-ASCII
    any_ascii(&stripped).to_lowercase()
}

/// Normalize punctuation damaged by OCR: curly quotes and stray accents become
/// straight quotes, runs of spaces collapse to one.
pub fn normalize_punctuation(s: &str) -> String {
    let result = s.replace(['\u{2018}', '\u{2019}'], "'")  // Left/right single curly quotes
        .replace(['\u{201C}', '\u{201D}', '\u{201E}'], "\"")  // Curly and low double quotes
        .replace(['\u{00B4}', '\u{0060}'], "'");  // Acute accent and grave accent used as apostrophe
    MULTI_SPACE.replace_all(result.trim(), " ").to_string()
}

/// Convert `\r\n` and lone `\r` line endings to `\n`.
pub fn normalize_line_endings(s: &str) -> Cow<'_, str> {
    if s.contains('\r') {
        Cow::Owned(s.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(s)
    }
}

/// Collapse whitespace runs inside one line to single spaces and trim it.
pub fn collapse_inline_whitespace(line: &str) -> String {
    INLINE_WHITESPACE.replace_all(line.trim(), " ").to_string()
}

/// True when the string has at least one cased character and none of them
/// are lower-case ("THE BEATLES", "AC/DC"). Digits and punctuation are ignored.
pub fn is_upper_case(s: &str) -> bool {
    let mut has_cased = false;
    for c in s.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            has_cased = true;
        }
    }
    has_cased
}

/// Case-insensitive check whether either string contains the other.
pub fn texts_overlap(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    a.contains(&b) || b.contains(&a)
}

// ============================================================================
// NORMALIZATION FUNCTIONS
// ============================================================================

/// Derive the song identity for a title within a book:
/// lower-cased title with spaces replaced by underscores, then `_<book_id>`.
/// e.g., ("Song A", "1") → "song_a_1"
pub fn song_identity(title: &str, book_id: &str) -> String {
    format!("{}_{}", title.replace(' ', "_").to_lowercase(), book_id)
}

/// Key used to match a book name against file names on disk.
/// Folds diacritics (NFC vs NFD file names), case and inner whitespace.
pub fn book_name_key(name: &str) -> String {
    MULTI_SPACE.replace_all(fold_to_ascii(name).trim(), " ").to_string()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_song_identity() {
        assert_eq!(song_identity("Song A", "1"), "song_a_1");
        assert_eq!(song_identity("Über den Wolken", "W"), "über_den_wolken_W");
        assert_eq!(song_identity("Let  It Be", "2"), "let__it_be_2");
    }

    #[test]
    fn test_is_upper_case() {
        assert!(is_upper_case("THE BEATLES"));
        assert!(is_upper_case("AC/DC"));
        assert!(is_upper_case("ÄRZTE"));
        assert!(!is_upper_case("Yesterday"));
        assert!(!is_upper_case("1984"));
        assert!(!is_upper_case(""));
    }

    #[test]
    fn test_texts_overlap() {
        assert!(texts_overlap("Yesterday", "yesterday (live)"));
        assert!(texts_overlap("YESTERDAY", "Yesterday"));
        assert!(!texts_overlap("The Beatles", "Yesterday"));
    }

    #[test]
    fn test_fold_to_ascii() {
        assert_eq!(fold_to_ascii("grün"), "grun");
        assert_eq!(fold_to_ascii("Weihnachtslieder"), "weihnachtslieder");
    }

    #[test]
    fn test_book_name_key_matches_nfd_names() {
        let nfc = "Das Ding 1 (gr\u{00FC}n)";
        let nfd = "Das Ding 1 (gru\u{0308}n)";
        assert_ne!(nfc, nfd);
        assert_eq!(book_name_key(nfc), book_name_key(nfd));
        assert_eq!(book_name_key("Das  Ding 1 (GRÜN)"), "das ding 1 (grun)");
    }

    #[test]
    fn test_normalize_punctuation() {
        assert_eq!(normalize_punctuation("Don\u{2019}t  Stop"), "Don't Stop");
        assert_eq!(normalize_punctuation("\u{201E}Alte Liebe\u{201C}"), "\"Alte Liebe\"");
    }

    #[test]
    fn test_collapse_inline_whitespace() {
        assert_eq!(collapse_inline_whitespace("  I  walked \t alone "), "I walked alone");
    }

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(normalize_line_endings("a\r\nb\rc"), "a\nb\nc");
        assert!(matches!(normalize_line_endings("a\nb"), Cow::Borrowed(_)));
    }
}
