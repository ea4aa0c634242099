//! Page segmentation of a book's raw OCR text.
//!
//! The OCR stage writes a marker such as `[Page 12]` before each page's text.
//! A page runs from its marker to the next marker (or end of input).

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::InputConfig;
use crate::models::{PageBlock, PageMap};

const FORM_FEED: char = '\u{000C}';

/// Splits book text into pages using the configured page-marker label.
pub struct PageSegmenter {
    marker: Regex,
}

impl PageSegmenter {
    pub fn new(config: &InputConfig) -> Result<Self> {
        Self::with_label(&config.page_label)
    }

    /// Segmenter for markers of the form `[<label> <N>]`.
    pub fn with_label(label: &str) -> Result<Self> {
        let pattern = format!(r"\[\s*{}\s+(\d+)\s*\]", regex::escape(label.trim()));
        let marker = Regex::new(&pattern)
            .with_context(|| format!("Invalid page marker label: {:?}", label))?;
        Ok(Self { marker })
    }

    /// Page blocks in text order. A page number appearing twice yields two
    /// blocks; markers with page 0 or an unparseable number are ignored.
    pub fn blocks(&self, raw_text: &str) -> Vec<PageBlock> {
        let markers: Vec<(usize, usize, Option<u32>)> = self
            .marker
            .captures_iter(raw_text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let page = caps[1].parse::<u32>().ok().filter(|&n| n >= 1);
                if page.is_none() {
                    tracing::debug!("Ignoring page marker {:?}", whole.as_str());
                }
                Some((whole.start(), whole.end(), page))
            })
            .collect();

        markers
            .iter()
            .enumerate()
            .filter_map(|(i, &(_, content_start, page))| {
                let page_number = page?;
                let content_end = markers
                    .get(i + 1)
                    .map(|&(next_start, _, _)| next_start)
                    .unwrap_or(raw_text.len());
                Some(PageBlock {
                    page_number,
                    text: raw_text[content_start..content_end].trim().to_string(),
                })
            })
            .collect()
    }

    /// Page number → page text. Empty when the text carries no markers.
    /// A page number seen twice keeps the later text.
    pub fn segment(&self, raw_text: &str) -> PageMap {
        self.blocks(raw_text)
            .into_iter()
            .map(|block| (block.page_number, block.text))
            .collect()
    }

    /// Page on which the byte `offset` lies: the most recent marker starting
    /// before it, otherwise one more than the number of form feeds before it.
    pub fn page_at_offset(&self, raw_text: &str, offset: usize) -> u32 {
        let offset = floor_char_boundary(raw_text, offset);
        let prefix = &raw_text[..offset];

        let last_marker = self
            .marker
            .captures_iter(prefix)
            .filter_map(|caps| caps[1].parse::<u32>().ok())
            .filter(|&n| n >= 1)
            .last();

        last_marker.unwrap_or_else(|| form_feed_page(prefix))
    }

    /// Start of the first marker at or after `from`.
    pub fn next_marker_start(&self, raw_text: &str, from: usize) -> Option<usize> {
        let from = floor_char_boundary(raw_text, from);
        self.marker.find_at(raw_text, from).map(|m| m.start())
    }

    /// Remove marker tokens from a text span (e.g. a song body crossing pages).
    pub fn strip_markers(&self, text: &str) -> String {
        self.marker.replace_all(text, "").to_string()
    }
}

/// Approximate pages from form feeds: content before the first form feed is
/// page 1. Blank pages are left out.
pub fn segment_by_form_feed(raw_text: &str) -> PageMap {
    raw_text
        .split(FORM_FEED)
        .enumerate()
        .filter_map(|(i, text)| {
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                Some((i as u32 + 1, text.to_string()))
            }
        })
        .collect()
}

pub fn has_form_feeds(raw_text: &str) -> bool {
    raw_text.contains(FORM_FEED)
}

fn form_feed_page(prefix: &str) -> u32 {
    prefix.matches(FORM_FEED).count() as u32 + 1
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
