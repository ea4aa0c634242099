//! Reconciliation mode: attach extracted page text to the songs the metadata
//! table lists on that page.
//!
//! Each page is classified once and its lyrics/chords go to every song indexed
//! on it; a page carrying two songs gives both the same text. Planning is pure
//! so books can be planned in parallel and applied in a fixed order.

use rustc_hash::FxHashMap;

use crate::classify::ChordLyricsClassifier;
use crate::metadata::{BookPageIndex, MetadataIndex};
use crate::models::{PageMap, SongRecord};

// ============================================================================
// Song Catalog
// ============================================================================

/// Song records keyed by identity, in metadata row order.
#[derive(Debug, Default, Clone)]
pub struct SongCatalog {
    records: Vec<SongRecord>,
    positions: FxHashMap<String, usize>,
}

impl SongCatalog {
    /// One record per metadata entry, lyrics empty.
    pub fn from_index(index: &MetadataIndex) -> Self {
        let mut catalog = Self::default();
        for (id, entry) in index.entries() {
            catalog.positions.insert(id.to_string(), catalog.records.len());
            catalog.records.push(SongRecord::from_metadata(id, entry));
        }
        catalog
    }

    pub fn get(&self, id: &str) -> Option<&SongRecord> {
        self.positions.get(id).map(|&pos| &self.records[pos])
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut SongRecord> {
        match self.positions.get(id) {
            Some(&pos) => self.records.get_mut(pos),
            None => None,
        }
    }

    pub fn records(&self) -> &[SongRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn with_lyrics(&self) -> impl Iterator<Item = &SongRecord> {
        self.records.iter().filter(|r| r.has_lyrics())
    }

    /// Songs of `book_id` that have a page in the metadata but no lyrics.
    pub fn unassigned_in_book(&self, book_id: &str) -> usize {
        self.records
            .iter()
            .filter(|r| r.book_id == book_id && r.page.is_some() && !r.has_lyrics())
            .count()
    }
}

// ============================================================================
// Reconciler
// ============================================================================

/// Lyrics and chords destined for one song.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub song_id: String,
    pub lyrics: String,
    pub chords: String,
    pub source_page: u32,
    pub source_book: String,
}

/// Result of planning one book.
#[derive(Debug, Default, Clone)]
pub struct BookPlan {
    pub assignments: Vec<Assignment>,
    pub pages_without_songs: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LyricsReconciler {
    classifier: ChordLyricsClassifier,
}

impl LyricsReconciler {
    pub fn new(classifier: ChordLyricsClassifier) -> Self {
        Self { classifier }
    }

    /// Work out which songs receive which page text, without touching the catalog.
    pub fn plan(&self, book_id: &str, pages: &PageMap, index: &BookPageIndex) -> BookPlan {
        let mut plan = BookPlan::default();

        for (&page, text) in pages {
            let songs = index.songs_at(book_id, page);
            if songs.is_empty() {
                tracing::debug!("Book {} page {}: no songs listed, skipping", book_id, page);
                plan.pages_without_songs += 1;
                continue;
            }

            let classified = self.classifier.classify(text);
            if songs.len() > 1 {
                tracing::debug!(
                    "Book {} page {}: shared by {} songs, assigning the same text",
                    book_id,
                    page,
                    songs.len()
                );
            }

            for song in songs {
                tracing::debug!("Updated lyrics for {} - {}", song.artist, song.title);
                plan.assignments.push(Assignment {
                    song_id: song.id.clone(),
                    lyrics: classified.lyrics.clone(),
                    chords: classified.chords.clone(),
                    source_page: page,
                    source_book: book_id.to_string(),
                });
            }
        }

        plan
    }

    /// Write planned assignments into the catalog. Returns how many songs were
    /// updated. Re-applying the same plan leaves the catalog unchanged.
    pub fn apply(&self, assignments: Vec<Assignment>, catalog: &mut SongCatalog) -> usize {
        let mut updated = 0;
        for assignment in assignments {
            let Some(record) = catalog.get_mut(&assignment.song_id) else {
                tracing::warn!("Song '{}' is indexed but not in the catalog", assignment.song_id);
                continue;
            };
            record.lyrics = assignment.lyrics;
            record.chords = assignment.chords;
            record.source_page = Some(assignment.source_page);
            record.source_book = Some(assignment.source_book);
            updated += 1;
        }
        updated
    }

    /// Plan and apply one book. Returns the number of songs updated.
    pub fn reconcile(
        &self,
        book_id: &str,
        pages: &PageMap,
        index: &BookPageIndex,
        catalog: &mut SongCatalog,
    ) -> usize {
        let plan = self.plan(book_id, pages, index);
        self.apply(plan.assignments, catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetadataConfig;

    fn index(csv: &str) -> MetadataIndex {
        let table = format!("Seite (Noten),Seite,Buch,Künstler,Titel\n{}", csv);
        MetadataIndex::from_reader(table.as_bytes(), &MetadataConfig::default()).unwrap()
    }

    fn pages(entries: &[(u32, &str)]) -> PageMap {
        entries.iter().map(|&(p, t)| (p, t.to_string())).collect()
    }

    #[test]
    fn test_shared_page_fan_out() {
        let metadata = index("1,7,1,Artist A,Song A\n2,7,1,Artist B,Song B\n3,8,1,Artist C,Song C\n");
        let mut catalog = SongCatalog::from_index(&metadata);
        let reconciler = LyricsReconciler::default();

        let book = pages(&[(7, "G D\nShared lyrics line\n© 2001 Someone")]);
        let updated = reconciler.reconcile("1", &book, metadata.page_index(), &mut catalog);
        assert_eq!(updated, 2);

        let a = catalog.get("song_a_1").unwrap();
        let b = catalog.get("song_b_1").unwrap();
        assert_eq!(a.lyrics, "Shared lyrics line");
        assert_eq!(a.lyrics, b.lyrics);
        assert_eq!(a.chords, "G D");
        assert_eq!(b.chords, "G D");
        assert_eq!(a.source_page, Some(7));
        assert_eq!(b.source_book.as_deref(), Some("1"));

        let c = catalog.get("song_c_1").unwrap();
        assert!(!c.has_lyrics());
        assert_eq!(catalog.unassigned_in_book("1"), 1);
    }

    #[test]
    fn test_reconcile_is_repeatable() {
        let metadata = index("1,3,2,Artist,Song\n");
        let mut catalog = SongCatalog::from_index(&metadata);
        let reconciler = LyricsReconciler::default();
        let book = pages(&[(3, "Some   lyrics\n\n\nhere")]);

        reconciler.reconcile("2", &book, metadata.page_index(), &mut catalog);
        let first = catalog.records().to_vec();
        let updated = reconciler.reconcile("2", &book, metadata.page_index(), &mut catalog);

        assert_eq!(updated, 1);
        assert_eq!(catalog.records(), first.as_slice());
        assert_eq!(catalog.get("song_2").unwrap().lyrics, "Some lyrics\n\nhere");
    }

    #[test]
    fn test_pages_without_songs_are_skipped() {
        let metadata = index("1,3,1,Artist,Song\n");
        let reconciler = LyricsReconciler::default();
        let book = pages(&[(1, "cover"), (2, "foreword"), (3, "lyrics")]);

        let plan = reconciler.plan("1", &book, metadata.page_index());
        assert_eq!(plan.pages_without_songs, 2);
        assert_eq!(plan.assignments.len(), 1);
        assert_eq!(plan.assignments[0].song_id, "song_1");
    }

    #[test]
    fn test_other_books_pages_are_not_used() {
        let metadata = index("1,3,1,Artist,Song\n");
        let mut catalog = SongCatalog::from_index(&metadata);
        let book = pages(&[(3, "wrong book")]);
        let updated = LyricsReconciler::default().reconcile("W", &book, metadata.page_index(), &mut catalog);
        assert_eq!(updated, 0);
        assert!(!catalog.get("song_1").unwrap().has_lyrics());
    }

    #[test]
    fn test_song_without_page_stays_in_catalog() {
        let metadata = index("1,N/A,1,Artist,Song\n");
        let catalog = SongCatalog::from_index(&metadata);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("song_1").unwrap().page, None);
        assert_eq!(catalog.unassigned_in_book("1"), 0);
    }
}
