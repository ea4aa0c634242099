//! Configuration loading for songbook extraction.
//!
//! The book-name → book-id table and the text conventions of the upstream OCR
//! stage are data, read once from a TOML file and handed to each component.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Book name (input file stem) → short book id used in the metadata table
    pub books: BTreeMap<String, String>,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InputConfig {
    /// Word inside the page marker, e.g. "Page" for `[Page 12]`
    pub page_label: String,
    /// Headings that open a table of contents, tried in order
    pub toc_headings: Vec<String>,
    /// Extension of the per-book text files
    pub extension: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            page_label: "Page".to_string(),
            toc_headings: vec![
                "Table of Contents".to_string(),
                "Contents".to_string(),
                "Inhaltsverzeichnis".to_string(),
                "Inhalt".to_string(),
            ],
            extension: "txt".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MetadataConfig {
    /// Accepted headers for the sheet-music page column; the first is canonical
    pub notes_page_columns: Vec<String>,
    pub page_column: String,
    pub book_column: String,
    pub artist_column: String,
    pub title_column: String,
    pub delimiter: char,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            notes_page_columns: vec!["Seite (Noten)".to_string(), "Seite Noten".to_string()],
            page_column: "Seite".to_string(),
            book_column: "Buch".to_string(),
            artist_column: "Künstler".to_string(),
            title_column: "Titel".to_string(),
            delimiter: ',',
        }
    }
}

impl MetadataConfig {
    /// Header written for the sheet-music page column
    pub fn notes_page_header(&self) -> &str {
        self.notes_page_columns
            .first()
            .map(String::as_str)
            .unwrap_or("Seite (Noten)")
    }
}

impl Config {
    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.books.is_empty() {
            bail!("Config must list at least one book in [books]");
        }
        if let Some((name, _)) = self.books.iter().find(|(_, id)| id.trim().is_empty()) {
            bail!("Book '{}' has an empty id", name);
        }
        if self.input.page_label.trim().is_empty() {
            bail!("input.page_label must not be empty");
        }
        if self.metadata.notes_page_columns.is_empty() {
            bail!("metadata.notes_page_columns must name at least one header");
        }
        if !self.metadata.delimiter.is_ascii() {
            bail!("metadata.delimiter must be an ASCII character");
        }
        Ok(())
    }

    pub fn is_known_book_id(&self, book_id: &str) -> bool {
        self.books.values().any(|id| id == book_id)
    }
}

pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("Failed to parse config file as TOML")?;
    config.validate()?;
    Ok(config)
}

/// Load the configuration file. A missing file is an error: without the book
/// table there is nothing to process.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        bail!("Config file not found: {}", path.display());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("Invalid config file: {}", path.display()))
}
