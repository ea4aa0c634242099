//! SQLite export in the songbook app's database schema.
//!
//! Tables: `songs`, `books`, `book_song_page`, `lyrics` (plus the app's empty
//! `user_data`/`user_comments`). Chords have no column in this schema and are
//! only carried by the JSON/CSV outputs.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::Config;
use crate::models::SongRecord;
use crate::normalize::song_identity;
use crate::progress::PhaseProgress;

const WRITE_BATCH_SIZE: usize = 1_000;

const SCHEMA: &str = "
    CREATE TABLE songs (
        id TEXT NOT NULL PRIMARY KEY,
        title TEXT NOT NULL,
        author TEXT NOT NULL,
        lyrics TEXT NOT NULL,
        genre TEXT,
        year INTEGER,
        favorite INTEGER DEFAULT 0
    );

    CREATE TABLE books (
        id TEXT NOT NULL PRIMARY KEY,
        title TEXT NOT NULL,
        year INTEGER,
        favorite INTEGER DEFAULT 0
    );

    CREATE TABLE book_song_page (
        song_id TEXT NOT NULL REFERENCES songs(id),
        book_id TEXT NOT NULL REFERENCES books(id),
        page INTEGER,
        page_notes INTEGER,
        PRIMARY KEY (song_id, book_id)
    );

    CREATE TABLE lyrics (
        song_id TEXT NOT NULL REFERENCES songs(id),
        text TEXT NOT NULL,
        PRIMARY KEY (song_id)
    );

    CREATE TABLE user_data (
        id TEXT NOT NULL PRIMARY KEY,
        song_id TEXT REFERENCES songs(id),
        book_id TEXT REFERENCES books(id),
        favorite INTEGER DEFAULT 0,
        note TEXT
    );

    CREATE TABLE user_comments (
        id TEXT NOT NULL PRIMARY KEY,
        song_id TEXT REFERENCES songs(id),
        book_id TEXT REFERENCES books(id),
        comment TEXT NOT NULL,
        timestamp INTEGER NOT NULL
    );";

/// Counts of what was written.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub books: usize,
    pub songs: usize,
    pub lyrics: usize,
}

/// Write records into a fresh database at `path`, replacing any existing file.
pub fn export(path: &Path, records: &[SongRecord], config: &Config) -> Result<ExportSummary> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove existing database: {}", path.display()))?;
    }

    let mut conn = Connection::open(path)
        .with_context(|| format!("Failed to create database: {}", path.display()))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;",
    )?;
    conn.execute_batch(SCHEMA).context("Failed to create schema")?;

    let books = write_books(&mut conn, records, config)?;
    let (songs, lyrics) = write_songs(&mut conn, records)?;

    // WAL sidecar files would otherwise outlive the connection
    conn.execute_batch("PRAGMA journal_mode = DELETE;")?;

    Ok(ExportSummary { books, songs, lyrics })
}

/// Configured books, plus any book id that only the records mention.
fn write_books(conn: &mut Connection, records: &[SongRecord], config: &Config) -> Result<usize> {
    let mut books: BTreeMap<&str, &str> = config
        .books
        .iter()
        .map(|(name, id)| (id.as_str(), name.as_str()))
        .collect();
    for record in records {
        books.entry(record.book_id.as_str()).or_insert(record.book_id.as_str());
    }

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached("INSERT OR REPLACE INTO books (id, title) VALUES (?1, ?2)")?;
        for (id, title) in &books {
            stmt.execute(params![id, title])?;
        }
    }
    tx.commit()?;
    Ok(books.len())
}

fn write_songs(conn: &mut Connection, records: &[SongRecord]) -> Result<(usize, usize)> {
    let progress = PhaseProgress::rows("db", "Writing database", records.len());

    for chunk in records.chunks(WRITE_BATCH_SIZE) {
        let tx = conn.transaction()?;
        {
            let mut song_stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO songs (id, title, author, lyrics) VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut page_stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO book_song_page (song_id, book_id, page, page_notes)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut lyrics_stmt =
                tx.prepare_cached("INSERT OR REPLACE INTO lyrics (song_id, text) VALUES (?1, ?2)")?;

            for record in chunk {
                let id = record
                    .id
                    .clone()
                    .unwrap_or_else(|| song_identity(&record.title, &record.book_id));

                song_stmt.execute(params![id, record.title, record.artist, record.lyrics])?;
                page_stmt.execute(params![id, record.book_id, record.page, record.notes_page])?;
                if record.has_lyrics() {
                    lyrics_stmt.execute(params![id, record.lyrics])?;
                }
                progress.advance(1);
            }
        }
        tx.commit()?;
    }

    let songs: i64 = conn.query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))?;
    let lyrics: i64 = conn.query_row("SELECT COUNT(*) FROM lyrics", [], |row| row.get(0))?;
    progress.finish(format!("Wrote {} songs", songs));
    Ok((songs as usize, lyrics as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn config() -> Config {
        parse_config("[books]\n\"Das Ding 1 (grün)\" = \"1\"\n\"Weihnachtslieder\" = \"W\"\n").unwrap()
    }

    fn song(id: Option<&str>, title: &str, lyrics: &str, page: Option<u32>) -> SongRecord {
        SongRecord {
            id: id.map(str::to_string),
            title: title.to_string(),
            artist: "Artist".to_string(),
            lyrics: lyrics.to_string(),
            page,
            book_id: "1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_export_writes_app_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("songs.db");
        let records = vec![
            song(Some("song_a_1"), "Song A", "la la", Some(7)),
            song(None, "Song B", "", None),
        ];

        let summary = export(&path, &records, &config()).unwrap();
        assert_eq!(summary, ExportSummary { books: 2, songs: 2, lyrics: 1 });

        let conn = Connection::open(&path).unwrap();
        let author: String = conn
            .query_row("SELECT author FROM songs WHERE id = 'song_b_1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(author, "Artist");

        let page: Option<i64> = conn
            .query_row("SELECT page FROM book_song_page WHERE song_id = 'song_a_1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(page, Some(7));

        let title: String = conn
            .query_row("SELECT title FROM books WHERE id = 'W'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(title, "Weihnachtslieder");
    }

    #[test]
    fn test_export_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("songs.db");
        export(&path, &[song(None, "Old", "x", Some(1))], &config()).unwrap();
        let summary = export(&path, &[song(None, "New", "y", Some(2))], &config()).unwrap();
        assert_eq!(summary.songs, 1);

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM songs WHERE id = 'old_1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_duplicate_direct_titles_collapse_to_one_song() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("songs.db");
        let records = vec![song(None, "Same", "first", Some(1)), song(None, "Same", "second", Some(2))];
        let summary = export(&path, &records, &config()).unwrap();
        assert_eq!(summary.songs, 1);
    }
}
