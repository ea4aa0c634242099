//! Interchange writers: song collection as JSON and CSV, plus the
//! metadata-shaped seed table written in extraction mode.

use anyhow::{Context, Result};
use csv::{QuoteStyle, WriterBuilder};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::config::MetadataConfig;
use crate::models::SongRecord;

/// Header of the song CSV
pub const SONG_CSV_HEADER: [&str; 7] = ["Artist", "Title", "Lyrics", "Chords", "Book", "Page", "NotesPage"];

fn page_field(page: Option<u32>) -> String {
    page.map(|p| p.to_string()).unwrap_or_default()
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Pretty-printed JSON array of records.
pub fn write_json<'a, I>(path: &Path, records: I) -> Result<()>
where
    I: IntoIterator<Item = &'a SongRecord>,
{
    let records: Vec<&SongRecord> = records.into_iter().collect();
    let mut writer = create(path)?;
    serde_json::to_writer_pretty(&mut writer, &records)
        .with_context(|| format!("Failed to write JSON: {}", path.display()))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Song CSV: every field quoted, quotes inside fields doubled.
pub fn write_song_csv<'a, W, I>(writer: W, records: I) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'a SongRecord>,
{
    let mut csv = WriterBuilder::new().quote_style(QuoteStyle::Always).from_writer(writer);
    csv.write_record(SONG_CSV_HEADER)?;

    let mut written = 0;
    for record in records {
        csv.write_record([
            record.artist.as_str(),
            record.title.as_str(),
            record.lyrics.as_str(),
            record.chords.as_str(),
            record.book_id.as_str(),
            page_field(record.page).as_str(),
            page_field(record.notes_page).as_str(),
        ])?;
        written += 1;
    }
    csv.flush()?;
    Ok(written)
}

pub fn write_song_csv_file<'a, I>(path: &Path, records: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a SongRecord>,
{
    write_song_csv(create(path)?, records)
        .with_context(|| format!("Failed to write CSV: {}", path.display()))
}

/// Seed rows for the curated metadata table, using its configured headers.
/// The page column gets the detected page; the note-page column stays empty.
pub fn write_seed_csv<'a, W, I>(writer: W, records: I, config: &MetadataConfig) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'a SongRecord>,
{
    let mut csv = WriterBuilder::new()
        .delimiter(config.delimiter as u8)
        .from_writer(writer);
    csv.write_record([
        config.notes_page_header(),
        config.page_column.as_str(),
        config.book_column.as_str(),
        config.artist_column.as_str(),
        config.title_column.as_str(),
    ])?;

    let mut written = 0;
    for record in records {
        csv.write_record([
            page_field(record.notes_page).as_str(),
            page_field(record.page).as_str(),
            record.book_id.as_str(),
            record.artist.as_str(),
            record.title.as_str(),
        ])?;
        written += 1;
    }
    csv.flush()?;
    Ok(written)
}

pub fn write_seed_csv_file<'a, I>(path: &Path, records: I, config: &MetadataConfig) -> Result<usize>
where
    I: IntoIterator<Item = &'a SongRecord>,
{
    write_seed_csv(create(path)?, records, config)
        .with_context(|| format!("Failed to write seed table: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataIndex;

    fn record() -> SongRecord {
        SongRecord {
            number: Some("1".to_string()),
            title: "The \"Boxer\"".to_string(),
            artist: "Simon, Garfunkel".to_string(),
            lyrics: "line one\nline two".to_string(),
            chords: "C G".to_string(),
            page: Some(7),
            book_id: "1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_song_csv_quotes_every_field() {
        let mut buf = Vec::new();
        let written = write_song_csv(&mut buf, [&record()]).unwrap();
        assert_eq!(written, 1);

        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("\"Artist\",\"Title\",\"Lyrics\",\"Chords\",\"Book\",\"Page\",\"NotesPage\"")
        );
        assert!(text.contains("\"Simon, Garfunkel\",\"The \"\"Boxer\"\"\",\"line one\nline two\",\"C G\",\"1\",\"7\",\"\""));
    }

    #[test]
    fn test_seed_csv_loads_back_as_metadata() {
        let config = MetadataConfig::default();
        let mut buf = Vec::new();
        write_seed_csv(&mut buf, [&record()], &config).unwrap();

        let index = MetadataIndex::from_reader(buf.as_slice(), &config).unwrap();
        let entry = index.get("the_\"boxer\"_1").unwrap();
        assert_eq!(entry.artist, "Simon, Garfunkel");
        assert_eq!(entry.page, Some(7));
        assert_eq!(entry.notes_page, None);
    }

    #[test]
    fn test_write_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all_songs.json");
        write_json(&path, &[record()]).unwrap();

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let songs = value.as_array().unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0]["number"], "1");
        assert_eq!(songs[0]["book"], "1");
        assert_eq!(songs[0]["page"], 7);
    }
}
