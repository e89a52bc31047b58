//! Core domain types for a harvest: the work, its chapters and their page images.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Title used until a real one has been extracted.
pub const DEFAULT_TITLE: &str = "unknown";

/// Status used until a real one has been extracted.
pub const DEFAULT_STATUS: &str = "Unknown";

/// Work id used when none can be derived from the target URL.
pub const UNKNOWN_WORK_ID: &str = "unknown";

static NON_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_]+").expect("valid collection-name regex"));

// ---------------------------------------------------------------------------
// Work
// ---------------------------------------------------------------------------

/// The top-level item being harvested.
///
/// `id` is fixed at construction. `title` and `status` start at their defaults
/// and can only move away from them: a later failed or empty extraction never
/// reverts a value that was already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Work {
    id: String,
    title: String,
    status: String,
    /// Number of chapters, valid once discovery has parsed it.
    pub chapter_count: u32,
}

impl Work {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: DEFAULT_TITLE.to_string(),
            status: DEFAULT_STATUS.to_string(),
            chapter_count: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Whether a non-default title has been resolved.
    pub fn has_title(&self) -> bool {
        self.title != DEFAULT_TITLE
    }

    /// Record an extracted title. Returns `true` if the stored title changed.
    pub fn resolve_title(&mut self, title: &str) -> bool {
        let title = title.trim();
        if title.is_empty() || title == DEFAULT_TITLE || title == self.title {
            return false;
        }
        self.title = title.to_string();
        true
    }

    /// Record an extracted status. Returns `true` if the stored status changed.
    pub fn resolve_status(&mut self, status: &str) -> bool {
        let status = status.trim();
        if status.is_empty() || status == DEFAULT_STATUS || status == self.status {
            return false;
        }
        self.status = status.to_string();
        true
    }
}

/// Derive a work id from the target URL: the path text after `marker`
/// (e.g. `/manga/`), with any trailing `/` removed.
pub fn work_id_from_url(url: &str, marker: &str) -> String {
    url.split_once(marker)
        .map(|(_, rest)| rest.trim_end_matches('/'))
        .filter(|id| !id.is_empty())
        .unwrap_or(UNKNOWN_WORK_ID)
        .to_string()
}

// ---------------------------------------------------------------------------
// Images and chapters
// ---------------------------------------------------------------------------

/// Classified format of a downloaded page image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    /// Anything else, keyed by the (lower-case) file extension it came with.
    Other(String),
}

impl ImageFormat {
    /// Map a bare file extension (no dot) to a format.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Self::Jpeg,
            "png" => Self::Png,
            "gif" => Self::Gif,
            "webp" => Self::Webp,
            other => Self::Other(other.to_string()),
        }
    }

    /// File extension used for staged files.
    pub fn extension(&self) -> &str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Other(ext) => ext,
        }
    }

    /// MIME type recorded alongside archived bytes.
    pub fn content_type(&self) -> String {
        match self {
            Self::Jpeg => "image/jpeg".into(),
            Self::Png => "image/png".into(),
            Self::Gif => "image/gif".into(),
            Self::Webp => "image/webp".into(),
            Self::Other(ext) => format!("image/{ext}"),
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// One page image within a chapter. The payload itself is never held here;
/// it lives in the staging file until archived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// 1-based position within the chapter, in DOM discovery order.
    pub index: u32,
    /// Absolute URL after normalization.
    pub source_url: String,
    pub format: ImageFormat,
}

/// An ordered sub-unit of a work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// 1-based, dense from 1 to the work's chapter count.
    pub number: u32,
    pub images: Vec<Image>,
}

impl Chapter {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            images: Vec::new(),
        }
    }

    /// Local staging directory name for this chapter.
    pub fn dir_name(&self) -> String {
        format!("c{}", self.number)
    }
}

/// Zero-padded staging file stem for the image at `index`.
pub fn image_file_stem(index: u32) -> String {
    format!("{index:03}")
}

// ---------------------------------------------------------------------------
// Archive identity
// ---------------------------------------------------------------------------

/// Named logical grouping under which a work's records and assets are archived.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionName(String);

impl CollectionName {
    /// Build the collection name for a work: `<prefix><clean title>_<id>`.
    ///
    /// The title is lower-cased, every run of characters outside `[a-z0-9_]`
    /// becomes a single `_`, and leading/trailing underscores are stripped.
    pub fn derive(prefix: &str, title: &str, work_id: &str) -> Self {
        let lowered = title.trim().to_lowercase();
        let cleaned = NON_NAME_CHARS.replace_all(&lowered, "_");
        let cleaned = cleaned.trim_matches('_');
        Self(format!("{prefix}{cleaned}_{work_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic identity of an archived image. Re-deriving the key for the
/// same (work, chapter, index) always yields the same document id, so
/// archiving is an upsert.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveKey {
    pub collection: CollectionName,
    pub chapter: u32,
    pub index: u32,
}

impl ArchiveKey {
    pub fn new(collection: CollectionName, chapter: u32, index: u32) -> Self {
        Self {
            collection,
            chapter,
            index,
        }
    }

    /// Document id within the collection.
    pub fn document_id(&self) -> String {
        format!("{}-{}", self.chapter, self.index)
    }
}

/// Metadata stored with every archived image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub work_id: String,
    pub work_title: String,
    pub work_url: String,
    pub chapter: u32,
    pub image_index: u32,
    pub source_url: String,
    pub content_type: String,
    pub byte_len: usize,
    /// SHA-256 of the payload, hex encoded.
    pub sha256: String,
    pub downloaded_at: DateTime<Utc>,
}
