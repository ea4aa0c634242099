//! Curated metadata table: the authoritative book/page/title/artist list.
//!
//! Loading builds two lookups:
//! - song identity → [`MetadataEntry`], in row order (last row wins on collision)
//! - [`BookPageIndex`]: book id → page → songs printed on that page

use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use crate::config::MetadataConfig;
use crate::models::{IndexedSong, MetadataEntry};
use crate::normalize::song_identity;

// ============================================================================
// Book Page Index
// ============================================================================

/// book id → page number → songs on that page, in row order.
///
/// Lookups never create entries: asking for an unknown book or page returns an
/// empty slice.
#[derive(Debug, Default, Clone)]
pub struct BookPageIndex {
    books: FxHashMap<String, BTreeMap<u32, Vec<IndexedSong>>>,
}

impl BookPageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, book_id: &str, page: u32, song: IndexedSong) {
        self.books
            .entry(book_id.to_string())
            .or_default()
            .entry(page)
            .or_default()
            .push(song);
    }

    /// Songs listed on `page` of `book_id`.
    pub fn songs_at(&self, book_id: &str, page: u32) -> &[IndexedSong] {
        self.books
            .get(book_id)
            .and_then(|pages| pages.get(&page))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Drop one song identity from a page, removing the page (and book) when
    /// it becomes empty.
    pub fn remove_identity(&mut self, book_id: &str, page: u32, id: &str) {
        let Some(pages) = self.books.get_mut(book_id) else {
            return;
        };
        if let Some(songs) = pages.get_mut(&page) {
            songs.retain(|s| s.id != id);
            if songs.is_empty() {
                pages.remove(&page);
            }
        }
        if pages.is_empty() {
            self.books.remove(book_id);
        }
    }

    /// Indexed page numbers of a book, ascending.
    pub fn pages(&self, book_id: &str) -> impl Iterator<Item = u32> + '_ {
        self.books
            .get(book_id)
            .into_iter()
            .flat_map(|pages| pages.keys().copied())
    }

    pub fn song_count(&self) -> usize {
        self.books
            .values()
            .flat_map(|pages| pages.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

// ============================================================================
// Load Report
// ============================================================================

/// Row-level counters collected while loading the table.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub rows: usize,
    pub rows_skipped: usize,
    /// Kept rows with fewer fields than the header
    pub short_rows: usize,
    pub invalid_page_values: usize,
    pub duplicate_identities: usize,
}

// ============================================================================
// Header Resolution
// ============================================================================

/// Column positions resolved from the header row.
struct Columns {
    notes_page: usize,
    page: usize,
    book: usize,
    artist: usize,
    title: usize,
}

impl Columns {
    fn resolve(headers: &StringRecord, config: &MetadataConfig) -> Result<Self> {
        let names: Vec<&str> = headers
            .iter()
            .map(|h| h.trim_start_matches('\u{FEFF}').trim())
            .collect();
        let find = |wanted: &str| names.iter().position(|h| *h == wanted);
        let require = |wanted: &str| {
            find(wanted).with_context(|| format!("Metadata table has no '{}' column (found {:?})", wanted, names))
        };

        let notes_page = match config.notes_page_columns.iter().find_map(|c| find(c.as_str())) {
            Some(idx) => idx,
            None => bail!(
                "Metadata table has none of the note-page columns {:?} (found {:?})",
                config.notes_page_columns,
                names
            ),
        };

        Ok(Self {
            notes_page,
            page: require(config.page_column.as_str())?,
            book: require(config.book_column.as_str())?,
            artist: require(config.artist_column.as_str())?,
            title: require(config.title_column.as_str())?,
        })
    }
}

/// Parse a page field. Empty fields are absent; anything that is not a
/// positive integer is reported as invalid.
fn parse_page(field: Option<&str>) -> Result<Option<u32>, String> {
    let field = field.map(str::trim).unwrap_or("");
    if field.is_empty() {
        return Ok(None);
    }
    match field.parse::<u32>() {
        Ok(n) if n >= 1 => Ok(Some(n)),
        _ => Err(field.to_string()),
    }
}

// ============================================================================
// Metadata Index
// ============================================================================

/// Loaded metadata table.
#[derive(Debug, Default, Clone)]
pub struct MetadataIndex {
    entries: Vec<(String, MetadataEntry)>,
    positions: FxHashMap<String, usize>,
    pages: BookPageIndex,
    report: LoadReport,
}

impl MetadataIndex {
    pub fn from_path(path: &Path, config: &MetadataConfig) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open metadata table: {}", path.display()))?;
        Self::from_reader(file, config)
            .with_context(|| format!("Failed to load metadata table: {}", path.display()))
    }

    /// Parse delimited rows with a header line. Quoted fields may contain the
    /// delimiter; a doubled quote inside quotes is a literal quote.
    pub fn from_reader<R: Read>(reader: R, config: &MetadataConfig) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(config.delimiter as u8)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let headers = reader.headers().context("Failed to read metadata header row")?.clone();
        let columns = Columns::resolve(&headers, config)?;
        let mut index = Self::default();

        for (row_idx, result) in reader.records().enumerate() {
            // Header is line 1
            let line = row_idx + 2;
            index.report.rows += 1;

            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("Metadata line {}: unreadable row: {}", line, e);
                    index.report.rows_skipped += 1;
                    continue;
                }
            };

            let title = record.get(columns.title).unwrap_or("");
            let book_id = record.get(columns.book).unwrap_or("");
            if title.is_empty() || book_id.is_empty() {
                tracing::warn!("Metadata line {}: missing title or book, skipping row", line);
                index.report.rows_skipped += 1;
                continue;
            }

            if record.len() < headers.len() {
                tracing::warn!(
                    "Metadata line {}: {} of {} fields, missing columns are empty",
                    line,
                    record.len(),
                    headers.len()
                );
                index.report.short_rows += 1;
            }

            let page = index.page_value(&record, columns.page, line, &config.page_column);
            let notes_page = index.page_value(&record, columns.notes_page, line, config.notes_page_header());

            index.insert(MetadataEntry {
                title: title.to_string(),
                artist: record.get(columns.artist).unwrap_or("").to_string(),
                book_id: book_id.to_string(),
                page,
                notes_page,
            });
        }

        Ok(index)
    }

    fn page_value(&mut self, record: &StringRecord, column: usize, line: usize, name: &str) -> Option<u32> {
        match parse_page(record.get(column)) {
            Ok(page) => page,
            Err(raw) => {
                tracing::warn!("Metadata line {}: invalid {} value {:?}, treating as absent", line, name, raw);
                self.report.invalid_page_values += 1;
                None
            }
        }
    }

    /// Add an entry. An identity seen before is replaced in place (keeping its
    /// original position) and its old page-index slot is released.
    pub fn insert(&mut self, entry: MetadataEntry) {
        let id = song_identity(&entry.title, &entry.book_id);

        if let Some(&pos) = self.positions.get(&id) {
            let previous = &self.entries[pos].1;
            tracing::warn!(
                "Duplicate song identity '{}': '{}' replaces '{}'",
                id,
                entry.artist,
                previous.artist
            );
            self.report.duplicate_identities += 1;
            if let Some(old_page) = previous.page {
                self.pages.remove_identity(&previous.book_id, old_page, &id);
            }
            if let Some(page) = entry.page {
                self.pages.insert(&entry.book_id, page, indexed(&id, &entry));
            }
            self.entries[pos].1 = entry;
            return;
        }

        if let Some(page) = entry.page {
            self.pages.insert(&entry.book_id, page, indexed(&id, &entry));
        }
        self.positions.insert(id.clone(), self.entries.len());
        self.entries.push((id, entry));
    }

    pub fn get(&self, id: &str) -> Option<&MetadataEntry> {
        self.positions.get(id).map(|&pos| &self.entries[pos].1)
    }

    /// Entries with their identities, in first-seen row order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &MetadataEntry)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    pub fn page_index(&self) -> &BookPageIndex {
        &self.pages
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn indexed(id: &str, entry: &MetadataEntry) -> IndexedSong {
    IndexedSong {
        id: id.to_string(),
        title: entry.title.clone(),
        artist: entry.artist.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Seite (Noten),Seite,Buch,Künstler,Titel\n";

    fn load(csv: &str) -> MetadataIndex {
        MetadataIndex::from_reader(csv.as_bytes(), &MetadataConfig::default()).unwrap()
    }

    #[test]
    fn test_load_builds_page_index() {
        let index = load(&format!(
            "{}12,7,1,The Beatles,Yesterday\n13,7,1,ABBA,Waterloo\n,9,2,Queen,Bohemian Rhapsody\n",
            HEADER
        ));
        assert_eq!(index.len(), 3);

        let songs = index.page_index().songs_at("1", 7);
        assert_eq!(songs.len(), 2);
        assert_eq!(songs[0].id, "yesterday_1");
        assert_eq!(songs[1].id, "waterloo_1");

        let entry = index.get("bohemian_rhapsody_2").unwrap();
        assert_eq!(entry.page, Some(9));
        assert_eq!(entry.notes_page, None);
        assert_eq!(index.get("yesterday_1").unwrap().notes_page, Some(12));
    }

    #[test]
    fn test_last_row_wins_on_identity_collision() {
        let index = load(&format!(
            "{}1,3,1,First Artist,Song A\n2,4,1,Second Artist,Song A\n",
            HEADER
        ));
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("song_a_1").unwrap().artist, "Second Artist");
        assert_eq!(index.report().duplicate_identities, 1);

        // the earlier row's page no longer lists the song
        assert!(index.page_index().songs_at("1", 3).is_empty());
        let songs = index.page_index().songs_at("1", 4);
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].artist, "Second Artist");
    }

    #[test]
    fn test_non_numeric_page_is_absent_not_fatal() {
        let index = load(&format!("{},N/A,1,Somebody,Song B\n", HEADER));
        let entry = index.get("song_b_1").unwrap();
        assert_eq!(entry.page, None);
        assert_eq!(index.report().invalid_page_values, 1);
        assert!(index.page_index().is_empty());
    }

    #[test]
    fn test_quoted_fields_with_delimiter_and_doubled_quotes() {
        let index = load(&format!(
            "{}5,6,1,\"Simon, Garfunkel\",\"The \"\"Boxer\"\"\"\n",
            HEADER
        ));
        let entry = index.get("the_\"boxer\"_1").unwrap();
        assert_eq!(entry.artist, "Simon, Garfunkel");
        assert_eq!(entry.title, "The \"Boxer\"");
    }

    #[test]
    fn test_header_variant_for_notes_page() {
        let index = load("Seite Noten,Seite,Buch,Künstler,Titel\n44,2,W,Trad.,Stille Nacht\n");
        assert_eq!(index.get("stille_nacht_W").unwrap().notes_page, Some(44));
    }

    #[test]
    fn test_missing_required_header_is_error() {
        let result = MetadataIndex::from_reader(
            "Seite (Noten),Seite,Künstler,Titel\n1,2,A,B\n".as_bytes(),
            &MetadataConfig::default(),
        );
        assert!(result.unwrap_err().to_string().contains("'Buch'"));
    }

    #[test]
    fn test_short_and_incomplete_rows() {
        let index = load(&format!("{}1,2,1\n3,4,,Artist,Title\n,5,1,,Lonely Title\n", HEADER));
        assert_eq!(index.report().rows, 3);
        assert_eq!(index.report().rows_skipped, 2);
        assert_eq!(index.report().short_rows, 0);
        let entry = index.get("lonely_title_1").unwrap();
        assert_eq!(entry.artist, "");
        assert_eq!(entry.page, Some(5));
    }

    #[test]
    fn test_short_row_with_trailing_page_columns_is_counted() {
        let csv = "Titel,Künstler,Buch,Seite,Seite (Noten)\nSong,Artist,1\nOther,Band,1,7,8\n";
        let index = load(csv);
        assert_eq!(index.report().rows, 2);
        assert_eq!(index.report().rows_skipped, 0);
        assert_eq!(index.report().short_rows, 1);

        let entry = index.get("song_1").unwrap();
        assert_eq!(entry.artist, "Artist");
        assert_eq!(entry.page, None);
        assert_eq!(entry.notes_page, None);
        assert_eq!(index.get("other_1").unwrap().page, Some(7));
    }

    #[test]
    fn test_crlf_and_bom() {
        let index = load("\u{FEFF}Seite (Noten),Seite,Buch,Künstler,Titel\r\n1,2,3,Artist,Title\r\n");
        assert_eq!(index.page_index().songs_at("3", 2).len(), 1);
    }

    #[test]
    fn test_custom_delimiter() {
        let config = MetadataConfig {
            delimiter: ';',
            ..MetadataConfig::default()
        };
        let csv = "Seite (Noten);Seite;Buch;Künstler;Titel\n1;2;1;A, B;Song\n";
        let index = MetadataIndex::from_reader(csv.as_bytes(), &config).unwrap();
        assert_eq!(index.get("song_1").unwrap().artist, "A, B");
    }

    #[test]
    fn test_book_page_index_lookup_does_not_create() {
        let index = BookPageIndex::new();
        assert!(index.songs_at("1", 1).is_empty());
        assert!(index.is_empty());
        assert_eq!(index.pages("1").count(), 0);
    }
}
