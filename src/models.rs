//! Core data models for songbook extraction.
//!
//! This module contains the struct definitions and type aliases shared by the
//! segmentation, detection, classification and reconciliation passes.

use serde::Serialize;
use std::collections::BTreeMap;

// ============================================================================
// Type Aliases
// ============================================================================

/// Page number → page text for one book. Keyed, never positional: page numbers
/// may be sparse or arrive out of order in the source text.
pub type PageMap = BTreeMap<u32, String>;

// ============================================================================
// Page Models
// ============================================================================

/// Text of a single source page, as produced by the page segmenter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageBlock {
    pub page_number: u32, // 1-based
    pub text: String,     // trimmed
}

// ============================================================================
// Detection Models
// ============================================================================

/// Which detection strategy produced a song match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionStrategy {
    /// Numbered heading line, blank line, body
    Direct,
    /// Table-of-contents entry resolved against its page block
    TableOfContents,
}

/// Raw song unit found in a book's text, before lyrics/chords separation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SongMatch {
    pub number: Option<String>, // None for TOC matches
    pub title: String,
    pub artist: String,
    pub body: String,
    pub offset: usize,     // byte offset of the match in the book text
    pub page: Option<u32>, // attributed source page
    pub strategy: DetectionStrategy,
}

// ============================================================================
// Metadata Models
// ============================================================================

/// One row of the curated metadata table. Authoritative for identity,
/// title and artist in reconciliation mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataEntry {
    pub title: String,
    pub artist: String,
    pub book_id: String,
    pub page: Option<u32>,
    pub notes_page: Option<u32>, // page in the sheet-music edition, reference only
}

/// Song listed on a given page of the book page index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedSong {
    pub id: String,
    pub title: String,
    pub artist: String,
}

// ============================================================================
// Output Models
// ============================================================================

/// Finished song record, the unit of the interchange output.
///
/// Direct mode fills `number` and `page` from the text and leaves `id` empty;
/// reconciliation mode fills `id`, `page` and `notes_page` from the metadata
/// table and records where the lyrics came from in `source_page`/`source_book`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SongRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    pub title: String,
    pub artist: String,
    pub lyrics: String, // empty = no lyrics known
    pub chords: String,
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes_page: Option<u32>,
    #[serde(rename = "book")]
    pub book_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_book: Option<String>,
}

impl SongRecord {
    /// Record for a detected song, with its body already split into lyrics and chords.
    pub fn from_match(m: SongMatch, book_id: &str, lyrics: String, chords: String) -> Self {
        Self {
            id: None,
            number: m.number,
            title: m.title,
            artist: m.artist,
            lyrics,
            chords,
            page: m.page,
            notes_page: None,
            book_id: book_id.to_string(),
            source_page: None,
            source_book: None,
        }
    }

    /// Record for a metadata row; lyrics stay empty until reconciliation assigns them.
    pub fn from_metadata(id: &str, entry: &MetadataEntry) -> Self {
        Self {
            id: Some(id.to_string()),
            number: None,
            title: entry.title.clone(),
            artist: entry.artist.clone(),
            lyrics: String::new(),
            chords: String::new(),
            page: entry.page,
            notes_page: entry.notes_page,
            book_id: entry.book_id.clone(),
            source_page: None,
            source_book: None,
        }
    }

    pub fn has_lyrics(&self) -> bool {
        !self.lyrics.is_empty()
    }
}

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// Per-run counters, merged across books and reported at the end of a run.
#[derive(Default, Debug, Clone, Serialize)]
pub struct RunStats {
    // Books
    pub books_processed: usize,
    pub books_skipped: usize,

    // Segmentation
    pub pages_segmented: usize,
    pub form_feed_fallbacks: usize,

    // Direct extraction
    pub direct_matches: usize,
    pub toc_matches: usize,
    pub toc_entries_without_page: usize,

    // Metadata table
    pub metadata_rows: usize,
    pub metadata_rows_skipped: usize,
    pub metadata_short_rows: usize,
    pub invalid_page_values: usize,
    pub duplicate_identities: usize,

    // Reconciliation
    pub pages_without_songs: usize,
    pub songs_updated: usize,
    pub songs_without_lyrics: usize,

    // Final totals
    pub total_songs: usize,

    // Timing
    pub elapsed_seconds: f64,
}

impl RunStats {
    /// Add the per-book counters of `other` into `self`.
    pub fn merge(&mut self, other: &RunStats) {
        self.books_processed += other.books_processed;
        self.books_skipped += other.books_skipped;
        self.pages_segmented += other.pages_segmented;
        self.form_feed_fallbacks += other.form_feed_fallbacks;
        self.direct_matches += other.direct_matches;
        self.toc_matches += other.toc_matches;
        self.toc_entries_without_page += other.toc_entries_without_page;
        self.pages_without_songs += other.pages_without_songs;
        self.songs_updated += other.songs_updated;
    }

    /// Songs found by either detection strategy
    pub fn songs_found(&self) -> usize {
        self.direct_matches + self.toc_matches
    }

    /// Log stats as pretty JSON at debug level
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            tracing::debug!("[STATS:{}]\n{}", phase, json);
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_adds_book_counters() {
        let mut total = RunStats {
            books_processed: 1,
            direct_matches: 4,
            ..Default::default()
        };
        let book = RunStats {
            books_processed: 1,
            direct_matches: 2,
            toc_matches: 3,
            songs_updated: 5,
            ..Default::default()
        };
        total.merge(&book);
        assert_eq!(total.books_processed, 2);
        assert_eq!(total.songs_found(), 9);
        assert_eq!(total.songs_updated, 5);
    }

    #[test]
    fn test_song_record_serialization_omits_absent_fields() {
        let record = SongRecord {
            title: "Yesterday".to_string(),
            artist: "THE BEATLES".to_string(),
            book_id: "1".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["book"], "1");
        assert!(json["page"].is_null());
        assert!(json.get("number").is_none());
        assert!(json.get("id").is_none());
        assert!(json.get("source_page").is_none());
    }

    #[test]
    fn test_from_metadata_starts_without_lyrics() {
        let entry = MetadataEntry {
            title: "Song A".to_string(),
            artist: "Artist".to_string(),
            book_id: "1".to_string(),
            page: Some(7),
            notes_page: None,
        };
        let record = SongRecord::from_metadata("song_a_1", &entry);
        assert_eq!(record.id.as_deref(), Some("song_a_1"));
        assert_eq!(record.page, Some(7));
        assert!(!record.has_lyrics());
    }
}
