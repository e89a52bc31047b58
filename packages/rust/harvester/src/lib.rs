//! Browser automation, content extraction, and asset fetching.
//!
//! This crate provides:
//! - [`automation`]: the [`AutomationSession`] capability and its backends
//! - [`extract`]: [`ContentExtractor`], site scripts, and image URL normalization
//! - [`fetch`]: [`AssetFetcher`] and payload format classification

pub mod automation;
pub mod extract;
pub mod fetch;

pub use automation::{
    AutomationSession, ChromeOptions, ChromeSession, FixtureHistory, FixturePage, FixtureSession,
};
pub use extract::{ContentExtractor, SiteScripts, chapter_url, normalize_image_url};
pub use fetch::{AssetFetcher, FetchedAsset, PNG_SIGNATURE, classify_format};
