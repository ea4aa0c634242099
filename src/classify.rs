//! Chord/lyric line separation.
//!
//! A line is a chord line when chord tokens dominate its word tokens:
//! `chords / (words + 0.1) > 0.7`. Chord lines are pulled out of the text and
//! joined into one chord string; everything else is the lyric body.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::normalize::{collapse_inline_whitespace, normalize_line_endings};

// ============================================================================
// Thresholds
// ============================================================================

/// Minimum chord/word ratio (exclusive) for a chord line
pub const CHORD_RATIO_THRESHOLD: f64 = 0.7;

/// Added to the word count so that a line of one chord and one word stays defined
pub const RATIO_SMOOTHING: f64 = 0.1;

// ============================================================================
// Regex Patterns
// ============================================================================

/// Chord token: root A-G, optional accidental, optional quality or extension,
/// optional slash bass. Matches "G", "Am", "F#m", "Dsus4", "G7", "C/G", "Bb".
pub static CHORD_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-G][#b]?(?:maj|min|m|sus|dim|aug|\+|-|\d)?\d*(?:/[A-G][#b]?)?\b").unwrap()
});

pub static WORD_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").unwrap());

/// Lines dropped before classification
pub static ANNOTATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Copyright notes: "© 1965 Northern Songs", "(c) Sony", "(C) 1971", "All Rights Reserved".
        // A bare "(C)" is a bracketed chord, so the upper-case form needs a year.
        Regex::new(r"(?i)©|(?-i:\(c\))|\(C\)\s*\d{4}|copyright|rights\s+reserved|secured|reproduced|permission")
            .unwrap(),
        // Author credits: "M + T: Lennon/McCartney", "Music + Text: ..."
        Regex::new(r"\bM(?:usic|usik)?\s*\+\s*T(?:ext)?\s*:").unwrap(),
    ]
});

// ============================================================================
// Line Classification
// ============================================================================

pub fn is_annotation_line(line: &str) -> bool {
    ANNOTATION_PATTERNS.iter().any(|p| p.is_match(line))
}

pub fn chord_token_count(line: &str) -> usize {
    CHORD_TOKEN.find_iter(line).count()
}

pub fn word_token_count(line: &str) -> usize {
    WORD_TOKEN.find_iter(line).count()
}

/// Chord tokens per (smoothed) word token.
pub fn chord_ratio(line: &str) -> f64 {
    chord_token_count(line) as f64 / (word_token_count(line) as f64 + RATIO_SMOOTHING)
}

pub fn is_chord_line(line: &str) -> bool {
    chord_token_count(line) > 0 && chord_ratio(line) > CHORD_RATIO_THRESHOLD
}

// ============================================================================
// Classifier
// ============================================================================

/// Result of classifying a text block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classified {
    pub lyrics: String,
    pub chords: String,
}

/// Splits a page or song body into cleaned lyrics and a chord string.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChordLyricsClassifier;

impl ChordLyricsClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Drop annotation lines, pull out chord lines (in order, space-joined),
    /// then clean the remaining lyric body: whitespace runs inside a line
    /// become one space and consecutive blank lines collapse to one.
    ///
    /// Classifying the returned lyrics again returns them unchanged.
    pub fn classify(&self, text: &str) -> Classified {
        let text = normalize_line_endings(text);

        let mut chord_lines: Vec<&str> = Vec::new();
        let mut lyric_lines: Vec<String> = Vec::new();

        for line in text.lines() {
            if is_annotation_line(line) {
                continue;
            }
            if is_chord_line(line) {
                chord_lines.push(line.trim());
                continue;
            }
            lyric_lines.push(collapse_inline_whitespace(line));
        }

        Classified {
            lyrics: join_collapsing_blank_lines(&lyric_lines),
            chords: chord_lines.join(" "),
        }
    }
}

/// Join lines, keeping at most one blank line in a row and none at either end.
fn join_collapsing_blank_lines(lines: &[String]) -> String {
    let mut out = String::new();
    let mut pending_blank = false;

    for line in lines {
        if line.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        out.push_str(line);
        pending_blank = false;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chord_line_threshold() {
        let line = "G Am C Em D G";
        assert_eq!(chord_token_count(line), 6);
        assert_eq!(word_token_count(line), 6);
        assert!((chord_ratio(line) - 6.0 / 6.1).abs() < 1e-9);
        assert!(is_chord_line(line));
    }

    #[test]
    fn test_lyric_line_with_single_chord_stays() {
        let line = "I walked alone that G day";
        assert_eq!(chord_token_count(line), 1);
        assert!(chord_ratio(line) < CHORD_RATIO_THRESHOLD);
        assert!(!is_chord_line(line));
    }

    #[test]
    fn test_chord_token_variants() {
        assert_eq!(chord_token_count("F#m Dsus4 G7 Bb Cmaj7 Edim Aaug"), 7);
        assert_eq!(chord_token_count("Hello world"), 0);
        assert_eq!(chord_token_count("Da war ein Baum"), 0);
    }

    #[test]
    fn test_slash_chord_counts_once_but_two_words() {
        // "C/G" is one chord token but two word tokens
        assert_eq!(chord_token_count("C/G"), 1);
        assert_eq!(word_token_count("C/G"), 2);
        assert!(!is_chord_line("C/G"));
    }

    #[test]
    fn test_classify_separates_chords() {
        let text = "G        D\nYesterday, all my troubles\nEm   A7\nseemed so far away";
        let result = ChordLyricsClassifier::new().classify(text);
        assert_eq!(result.lyrics, "Yesterday, all my troubles\nseemed so far away");
        assert_eq!(result.chords, "G        D Em   A7");
    }

    #[test]
    fn test_classify_strips_annotations() {
        let text = "First line\n© 1965 Northern Songs Ltd.\nAll Rights Reserved\n\
                    International Copyright Secured\nM + T: Lennon/McCartney\nMusic + Text: Someone\nLast line";
        let result = ChordLyricsClassifier::new().classify(text);
        assert_eq!(result.lyrics, "First line\nLast line");
        assert_eq!(result.chords, "");
    }

    #[test]
    fn test_bracketed_chord_is_not_a_copyright_note() {
        assert!(!is_annotation_line("G (C) D"));
        assert!(!is_annotation_line("(C)"));
        assert!(is_annotation_line("(c) Sony"));
        assert!(is_annotation_line("(C) 1971 Apple Records"));

        let result = ChordLyricsClassifier::new().classify("G (C) D\nla la la");
        assert_eq!(result.chords, "G (C) D");
        assert_eq!(result.lyrics, "la la la");
    }

    #[test]
    fn test_classify_collapses_whitespace_and_blank_lines() {
        let text = "\n\n  Verse   one\tline \n\n\n\nVerse two\n   \n\n";
        let result = ChordLyricsClassifier::new().classify(text);
        assert_eq!(result.lyrics, "Verse one line\n\nVerse two");
    }

    #[test]
    fn test_removed_chord_lines_do_not_leave_double_blanks() {
        let text = "Verse one\n\nC G\n\nVerse two";
        let result = ChordLyricsClassifier::new().classify(text);
        assert_eq!(result.lyrics, "Verse one\n\nVerse two");
        assert_eq!(result.chords, "C G");
    }

    #[test]
    fn test_classify_is_idempotent() {
        let classifier = ChordLyricsClassifier::new();
        let samples = [
            "G Am\n  Hey   Jude,\r\n\r\n\r\ndon't make it bad\n(c) Sony\nC/G D\n\nTake a sad song",
            "",
            "Em\n\n\n",
            "   \n  Zeile\t\teins  \n\n\n  Zeile zwei",
        ];
        for text in samples {
            let once = classifier.classify(text).lyrics;
            let twice = classifier.classify(&once).lyrics;
            assert_eq!(once, twice, "not idempotent for {:?}", text);
        }
    }

    #[test]
    fn test_classify_empty_text() {
        let result = ChordLyricsClassifier::new().classify("");
        assert_eq!(result, Classified::default());
    }
}
