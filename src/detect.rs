//! Song boundary detection in a book's text.
//!
//! Two ordered strategies:
//! 1. **Direct**: a numbered heading line (`12 Yesterday - THE BEATLES`), a
//!    blank line, then the body up to the next numbered line.
//! 2. **Table of contents**: only when the direct pattern finds nothing.
//!    Entries `Title ....... 12` are resolved against their page blocks.
//!
//! Input text is expected to use `\n` line endings.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::InputConfig;
use crate::models::{DetectionStrategy, PageMap, SongMatch};
use crate::normalize::{is_upper_case, normalize_punctuation, texts_overlap};
use crate::pages::PageSegmenter;

/// Artist used when a TOC page carries no "title - artist" line
pub const UNKNOWN_ARTIST: &str = "Unknown";

/// How many non-empty lines from the top of a page are searched for the artist line
const ARTIST_SEARCH_LINES: usize = 5;

/// Separators a heading may not start or end with
const DASH_CHARS: [char; 3] = ['-', '–', '—'];

// ============================================================================
// Regex Patterns
// ============================================================================

/// Numbered heading line followed by a blank line: "12 Yesterday - THE BEATLES\n\n"
static SONG_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(\d+)\.?[ \t]+([^\n]*?\S)[ \t]*\n[ \t]*\n").unwrap()
});

/// Any line led by a number token; ends the body of the previous song
static NUMBERED_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*\d+\.?[ \t]+\S").unwrap()
});

/// Dash between title and artist. Hyphens need surrounding spaces
/// ("Rock-n-Roll" stays whole); en/em dashes do not.
static HEADING_DASH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s+-+\s+|\s*[–—]\s*").unwrap()
});

/// TOC entry: title, a run of filler dots, page number at line end
static TOC_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(\S[^\n]*?)[ \t]*(?:(?:[.·_][ \t]*){2,}|(?:…[ \t]*)+)(\d+)[ \t]*$").unwrap()
});

/// "part - part" line near the top of a page
static ARTIST_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+?)(?:\s+-+\s+|\s*[–—]\s*)(.+)$").unwrap()
});

static BLANK_LINE_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n").unwrap());

// ============================================================================
// Heading Helpers
// ============================================================================

/// Decide title/artist order for a captured pair. When exactly one side is
/// fully upper-case it is the artist; otherwise capture order is kept.
pub fn assign_title_artist(first: String, second: String) -> (String, String) {
    if is_upper_case(&first) && !is_upper_case(&second) {
        (second, first)
    } else {
        (first, second)
    }
}

/// Token made of upper-case letters, digits and punctuation only
fn is_upper_token(token: &str) -> bool {
    !token.chars().any(char::is_lowercase)
}

/// Split a heading (number already removed) into its two captured parts.
///
/// Prefers a dash separator. Without one, a run of upper-case words at the
/// end or start of the heading is split off; failing that, the first word
/// is separated from the rest. Returns `None` for one-word headings.
pub fn split_heading(heading: &str) -> Option<(String, String)> {
    let heading = heading.trim();
    if heading.starts_with(DASH_CHARS) || heading.ends_with(DASH_CHARS) {
        return None;
    }
    if let Some(m) = HEADING_DASH.find(heading) {
        let left = heading[..m.start()].trim();
        let right = heading[m.end()..].trim();
        if left.is_empty() || right.is_empty() {
            return None;
        }
        return Some((normalize_punctuation(left), normalize_punctuation(right)));
    }

    let tokens: Vec<&str> = heading.split_whitespace().collect();
    if tokens.len() < 2 {
        return None;
    }

    let upper_run = |run: &[&str]| run.iter().any(|t| is_upper_case(t));

    let trailing = tokens.iter().rev().take_while(|t| is_upper_token(t)).count();
    let leading = tokens.iter().take_while(|t| is_upper_token(t)).count();

    let split_at = if trailing > 0 && trailing < tokens.len() && upper_run(&tokens[tokens.len() - trailing..]) {
        tokens.len() - trailing
    } else if leading > 0 && leading < tokens.len() && upper_run(&tokens[..leading]) {
        leading
    } else {
        1
    };

    Some((
        normalize_punctuation(&tokens[..split_at].join(" ")),
        normalize_punctuation(&tokens[split_at..].join(" ")),
    ))
}

// ============================================================================
// Table of Contents
// ============================================================================

/// One parsed table-of-contents line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub title: String,
    pub page: u32,
    pub offset: usize,
}

/// Result of running both strategies over one book.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub matches: Vec<SongMatch>,
    /// TOC entries whose page had no text block
    pub unresolved_toc_entries: usize,
}

// ============================================================================
// Detector
// ============================================================================

pub struct SongBoundaryDetector {
    segmenter: PageSegmenter,
    toc_heading: Option<Regex>,
}

impl SongBoundaryDetector {
    pub fn new(config: &InputConfig) -> Result<Self> {
        let segmenter = PageSegmenter::new(config)?;
        let headings: Vec<String> = config
            .toc_headings
            .iter()
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .map(regex::escape)
            .collect();
        let toc_heading = if headings.is_empty() {
            None
        } else {
            let pattern = format!(r"\b(?:{})\b", headings.join("|"));
            Some(Regex::new(&pattern).context("Invalid table of contents heading")?)
        };
        Ok(Self { segmenter, toc_heading })
    }

    pub fn segmenter(&self) -> &PageSegmenter {
        &self.segmenter
    }

    /// Run the direct strategy; fall back to the table of contents only when
    /// it finds no songs.
    pub fn detect(&self, book_text: &str, pages: &PageMap) -> Detection {
        let matches = self.detect_direct(book_text);
        if !matches.is_empty() {
            return Detection { matches, unresolved_toc_entries: 0 };
        }

        tracing::debug!("No numbered song headings found, trying table of contents");
        self.detect_via_toc(book_text, pages)
    }

    /// Songs introduced by a numbered heading line and a blank line. The body
    /// runs to the next numbered line or end of text, with page markers removed.
    pub fn detect_direct(&self, book_text: &str) -> Vec<SongMatch> {
        let mut songs = Vec::new();

        for caps in SONG_HEADING.captures_iter(book_text) {
            let whole = match caps.get(0) {
                Some(m) => m,
                None => continue,
            };
            let number = caps[1].to_string();
            let heading = &caps[2];

            let body_start = whole.end();
            let body_end = NUMBERED_LINE
                .find_at(book_text, body_start)
                .map(|m| m.start())
                .unwrap_or(book_text.len());
            let body = self.segmenter.strip_markers(&book_text[body_start..body_end]);
            let body = body.trim();
            if body.is_empty() {
                tracing::debug!("Heading {:?} has no body, skipping", heading);
                continue;
            }

            let (first, second) = match split_heading(heading) {
                Some(parts) => parts,
                None => {
                    tracing::debug!("Heading {:?} has no separable title and artist", heading);
                    continue;
                }
            };
            let (title, artist) = assign_title_artist(first, second);
            let page = self.segmenter.page_at_offset(book_text, whole.start());

            tracing::debug!("Found song: {} by {} on page {}", title, artist, page);
            songs.push(SongMatch {
                number: Some(number),
                title,
                artist,
                body: body.to_string(),
                offset: whole.start(),
                page: Some(page),
                strategy: DetectionStrategy::Direct,
            });
        }

        songs
    }

    /// Entries of the first table of contents in the text. The region runs
    /// from the heading to the next page marker or form feed.
    pub fn toc_entries(&self, book_text: &str) -> Vec<TocEntry> {
        let heading = match self.toc_heading.as_ref().and_then(|re| re.find(book_text)) {
            Some(m) => m,
            None => return Vec::new(),
        };
        let region_start = heading.end();
        let next_form_feed = book_text[region_start..]
            .find('\u{000C}')
            .map(|i| region_start + i);
        let region_end = self
            .segmenter
            .next_marker_start(book_text, region_start)
            .into_iter()
            .chain(next_form_feed)
            .min()
            .unwrap_or(book_text.len());
        let region = &book_text[region_start..region_end];

        TOC_ENTRY
            .captures_iter(region)
            .filter_map(|caps| {
                let title = normalize_punctuation(&caps[1]);
                let page = caps[2].parse::<u32>().ok().filter(|&p| p >= 1)?;
                if title.is_empty() {
                    return None;
                }
                Some(TocEntry {
                    title,
                    page,
                    offset: region_start + caps.get(0)?.start(),
                })
            })
            .collect()
    }

    /// Songs listed in the table of contents, read from their page blocks.
    /// Entries whose page has no text are counted, not returned.
    pub fn detect_via_toc(&self, book_text: &str, pages: &PageMap) -> Detection {
        let entries = self.toc_entries(book_text);
        let matches = self.resolve_toc_entries(&entries, pages);
        Detection {
            unresolved_toc_entries: entries.len() - matches.len(),
            matches,
        }
    }

    fn resolve_toc_entries(&self, entries: &[TocEntry], pages: &PageMap) -> Vec<SongMatch> {
        entries
            .iter()
            .filter_map(|entry| {
                let page_text = match pages.get(&entry.page) {
                    Some(text) => text,
                    None => {
                        tracing::warn!(
                            "TOC entry '{}' points to page {} which has no text",
                            entry.title,
                            entry.page
                        );
                        return None;
                    }
                };

                let artist = find_artist(page_text, &entry.title)
                    .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
                tracing::debug!("Found song from TOC: {} on page {}", entry.title, entry.page);

                Some(SongMatch {
                    number: None,
                    title: entry.title.clone(),
                    artist,
                    body: text_after_first_blank_line(page_text).to_string(),
                    offset: entry.offset,
                    page: Some(entry.page),
                    strategy: DetectionStrategy::TableOfContents,
                })
            })
            .collect()
    }
}

/// Artist from the first "part - part" line near the top of a page: the side
/// that does not overlap the known title.
pub fn find_artist(page_text: &str, title: &str) -> Option<String> {
    page_text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(ARTIST_SEARCH_LINES)
        .find_map(|line| {
            let caps = ARTIST_LINE.captures(line)?;
            let first = caps[1].trim();
            let second = caps[2].trim();
            if first.is_empty() || second.is_empty() {
                return None;
            }
            let artist = if texts_overlap(first, title) { second } else { first };
            Some(normalize_punctuation(artist))
        })
}

/// Everything after the first blank line, trimmed; empty when there is none.
pub fn text_after_first_blank_line(text: &str) -> &str {
    BLANK_LINE_SEPARATOR
        .find(text)
        .map(|m| text[m.end()..].trim())
        .unwrap_or("")
}
