use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of the book currently open in a reader.
///
/// Every per-book cache and state machine is partitioned by this value; when it
/// changes they all reset, and async results tagged with an older value are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookContext {
    pub book_id: i64,
    pub format: String,
}

impl BookContext {
    pub fn new(book_id: i64, format: impl Into<String>) -> Self {
        Self {
            book_id,
            format: format.into().to_lowercase(),
        }
    }

    /// Directory-safe key used by the on-disk page cache.
    pub fn cache_key(&self) -> String {
        let format: String = self
            .format
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        format!("{}-{}", self.book_id, format)
    }
}

impl fmt::Display for BookContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.book_id, self.format)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingMode {
    #[default]
    Paged,
    Continuous,
    Webtoon,
}

impl ReadingMode {
    /// Continuous and webtoon views scroll through a virtualized list of pages.
    pub fn is_scrolling(self) -> bool {
        !matches!(self, ReadingMode::Paged)
    }

    pub fn cycle(self) -> Self {
        match self {
            ReadingMode::Paged => ReadingMode::Continuous,
            ReadingMode::Continuous => ReadingMode::Webtoon,
            ReadingMode::Webtoon => ReadingMode::Paged,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReadingMode::Paged => "Paged",
            ReadingMode::Continuous => "Continuous",
            ReadingMode::Webtoon => "Webtoon",
        }
    }
}

/// Comic archive formats handled by the page reader.
pub const COMIC_FORMATS: [&str; 4] = ["cbz", "cbr", "cb7", "cbc"];

pub fn is_comic_format(format: &str) -> bool {
    COMIC_FORMATS
        .iter()
        .any(|f| f.eq_ignore_ascii_case(format))
}
