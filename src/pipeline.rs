//! Per-book orchestration for both run modes.
//!
//! - **extract**: segment → detect songs → classify each body
//! - **reconcile**: segment → plan page assignments against the metadata index
//!
//! Books are independent. They are processed on the rayon pool and merged back
//! in configured book order, so output does not depend on the worker count. A
//! book that fails (missing or unreadable file) is logged and skipped.

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

use crate::classify::ChordLyricsClassifier;
use crate::config::Config;
use crate::detect::SongBoundaryDetector;
use crate::metadata::MetadataIndex;
use crate::models::{DetectionStrategy, PageMap, RunStats, SongRecord};
use crate::normalize::{book_name_key, normalize_line_endings};
use crate::pages::{has_form_feeds, segment_by_form_feed};
use crate::progress::PhaseProgress;
use crate::reconcile::{BookPlan, LyricsReconciler, SongCatalog};

// ============================================================================
// Book Files
// ============================================================================

/// A configured book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    pub name: String,
    pub id: String,
}

/// Locate the text file of a book: `<dir>/<name>.<ext>`, otherwise a file in
/// `dir` whose stem matches the name after accent and case folding.
pub fn resolve_book_file(input_dir: &Path, name: &str, extension: &str) -> Result<PathBuf> {
    let direct = input_dir.join(format!("{}.{}", name, extension));
    if direct.is_file() {
        return Ok(direct);
    }

    let wanted = book_name_key(name);
    let entries = std::fs::read_dir(input_dir)
        .with_context(|| format!("Failed to read input directory: {}", input_dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        let ext_matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if !ext_matches || !path.is_file() {
            continue;
        }
        let stem_matches = path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|s| book_name_key(s) == wanted);
        if stem_matches {
            return Ok(path);
        }
    }

    bail!("No text file for book '{}' in {}", name, input_dir.display())
}

/// Read a book's text. Invalid UTF-8 from the OCR stage is replaced rather
/// than rejected; line endings are normalized to `\n`.
pub fn read_book_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read book text: {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(normalize_line_endings(&text).into_owned())
}

// ============================================================================
// Pipeline
// ============================================================================

/// Output of an extraction run.
#[derive(Debug, Default)]
pub struct Extraction {
    pub records: Vec<SongRecord>,
    pub stats: RunStats,
}

/// Output of a reconciliation run.
#[derive(Debug, Default)]
pub struct Reconciliation {
    pub catalog: SongCatalog,
    pub stats: RunStats,
}

pub struct Pipeline {
    config: Config,
    detector: SongBoundaryDetector,
    classifier: ChordLyricsClassifier,
    reconciler: LyricsReconciler,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        let detector = SongBoundaryDetector::new(&config.input)?;
        let classifier = ChordLyricsClassifier::new();
        Ok(Self {
            config,
            detector,
            classifier,
            reconciler: LyricsReconciler::new(classifier),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Configured books in name order.
    pub fn books(&self) -> Vec<Book> {
        self.config
            .books
            .iter()
            .map(|(name, id)| Book {
                name: name.clone(),
                id: id.clone(),
            })
            .collect()
    }

    /// Text files of all books that can be found in `input_dir`.
    pub fn existing_book_files(&self, input_dir: &Path) -> Vec<PathBuf> {
        self.books()
            .iter()
            .filter_map(|book| resolve_book_file(input_dir, &book.name, &self.config.input.extension).ok())
            .collect()
    }

    /// Read and segment one book. Falls back to form-feed pages when the text
    /// has no page markers.
    fn load_book(&self, book: &Book, input_dir: &Path, stats: &mut RunStats) -> Result<(String, PageMap)> {
        let path = resolve_book_file(input_dir, &book.name, &self.config.input.extension)?;
        tracing::info!("Processing book {} ({})", book.name, path.display());
        let text = read_book_text(&path)?;

        let mut pages = self.detector.segmenter().segment(&text);
        if pages.is_empty() && has_form_feeds(&text) {
            tracing::debug!("Book {}: no page markers, splitting on form feeds", book.name);
            pages = segment_by_form_feed(&text);
            stats.form_feed_fallbacks += 1;
        }
        stats.pages_segmented += pages.len();
        Ok((text, pages))
    }

    // ------------------------------------------------------------------------
    // Direct extraction
    // ------------------------------------------------------------------------

    /// Detect songs in one book and split each body into lyrics and chords.
    pub fn extract_book(&self, book: &Book, input_dir: &Path) -> Result<(Vec<SongRecord>, RunStats)> {
        let mut stats = RunStats::default();
        let (text, pages) = self.load_book(book, input_dir, &mut stats)?;

        let detection = self.detector.detect(&text, &pages);
        stats.toc_entries_without_page += detection.unresolved_toc_entries;

        let records: Vec<SongRecord> = detection
            .matches
            .into_iter()
            .map(|m| {
                match m.strategy {
                    DetectionStrategy::Direct => stats.direct_matches += 1,
                    DetectionStrategy::TableOfContents => stats.toc_matches += 1,
                }
                let classified = self.classifier.classify(&m.body);
                SongRecord::from_match(m, &book.id, classified.lyrics, classified.chords)
            })
            .collect();

        tracing::info!("Found {} songs in {}", records.len(), book.name);
        stats.books_processed = 1;
        Ok((records, stats))
    }

    pub fn extract(&self, input_dir: &Path) -> Extraction {
        let books = self.books();
        let progress = PhaseProgress::books("extract", "Extracting songs", books.len());

        let results: Vec<(Book, Result<(Vec<SongRecord>, RunStats)>)> = books
            .into_par_iter()
            .map(|book| {
                let result = self.extract_book(&book, input_dir);
                progress.advance(1);
                (book, result)
            })
            .collect();

        let mut extraction = Extraction::default();
        for (book, result) in results {
            match result {
                Ok((records, stats)) => {
                    extraction.records.extend(records);
                    extraction.stats.merge(&stats);
                }
                Err(e) => {
                    tracing::error!("Skipping book {}: {:#}", book.name, e);
                    extraction.stats.books_skipped += 1;
                }
            }
        }
        extraction.stats.total_songs = extraction.records.len();

        progress.finish(format!("Extracted {} songs", extraction.records.len()));
        extraction
    }

    // ------------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------------

    /// Plan the page assignments of one book.
    pub fn plan_book(&self, book: &Book, input_dir: &Path, metadata: &MetadataIndex) -> Result<(BookPlan, RunStats)> {
        let mut stats = RunStats::default();
        let (_, pages) = self.load_book(book, input_dir, &mut stats)?;

        let plan = self.reconciler.plan(&book.id, &pages, metadata.page_index());
        stats.pages_without_songs = plan.pages_without_songs;
        stats.books_processed = 1;
        Ok((plan, stats))
    }

    pub fn reconcile(&self, input_dir: &Path, metadata: &MetadataIndex) -> Reconciliation {
        self.warn_unknown_books(metadata);

        let mut catalog = SongCatalog::from_index(metadata);
        let mut stats = metadata_stats(metadata);

        let books = self.books();
        let progress = PhaseProgress::books("reconcile", "Reconciling lyrics", books.len());

        let results: Vec<(Book, Result<(BookPlan, RunStats)>)> = books
            .into_par_iter()
            .map(|book| {
                let result = self.plan_book(&book, input_dir, metadata);
                progress.advance(1);
                (book, result)
            })
            .collect();

        for (book, result) in results {
            match result {
                Ok((plan, book_stats)) => {
                    let updated = self.reconciler.apply(plan.assignments, &mut catalog);
                    tracing::info!("Updated {} songs from {}", updated, book.name);
                    let unassigned = catalog.unassigned_in_book(&book.id);
                    if unassigned > 0 {
                        tracing::warn!("{} songs of {} have a page but no text", unassigned, book.name);
                    }
                    stats.merge(&book_stats);
                    stats.songs_updated += updated;
                }
                Err(e) => {
                    tracing::error!("Skipping book {}: {:#}", book.name, e);
                    stats.books_skipped += 1;
                }
            }
        }

        stats.total_songs = catalog.len();
        stats.songs_without_lyrics = catalog.len() - catalog.with_lyrics().count();

        progress.finish(format!("Updated {} songs", stats.songs_updated));
        Reconciliation { catalog, stats }
    }

    fn warn_unknown_books(&self, metadata: &MetadataIndex) {
        let mut unknown: Vec<&str> = metadata
            .entries()
            .map(|(_, entry)| entry.book_id.as_str())
            .filter(|id| !self.config.is_known_book_id(id))
            .collect();
        unknown.sort_unstable();
        unknown.dedup();
        for id in unknown {
            tracing::warn!("Metadata references unknown book id '{}'; its songs get no lyrics", id);
        }
    }
}

/// Load the metadata table. A table that cannot be read is logged and
/// treated as empty so the run still produces output.
pub fn load_metadata_or_empty(path: &Path, config: &Config) -> MetadataIndex {
    match MetadataIndex::from_path(path, &config.metadata) {
        Ok(index) => {
            tracing::info!(
                "Loaded {} songs from metadata ({} indexed by page)",
                index.len(),
                index.page_index().song_count()
            );
            index
        }
        Err(e) => {
            tracing::error!("{:#}; continuing without metadata", e);
            MetadataIndex::default()
        }
    }
}

fn metadata_stats(metadata: &MetadataIndex) -> RunStats {
    let report = metadata.report();
    RunStats {
        metadata_rows: report.rows,
        metadata_rows_skipped: report.rows_skipped,
        metadata_short_rows: report.short_rows,
        invalid_page_values: report.invalid_page_values,
        duplicate_identities: report.duplicate_identities,
        ..Default::default()
    }
}
