//! Shared types, error model, and configuration for mangaroo.
//!
//! This crate is the foundation depended on by all other mangaroo crates.
//! It provides:
//! - [`HarvestError`]: the unified error type
//! - Domain types ([`Work`], [`Chapter`], [`Image`], [`ArchiveKey`], [`CollectionName`])
//! - Configuration ([`AppConfig`], [`HarvestConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ArchiveBackend, ArchiveConfig, BrowserConfig, DEFAULT_USER_AGENT, DefaultsConfig,
    FetchConfig, HarvestConfig, PolitenessConfig, SelectorConfig, SiteConfig, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from,
};
pub use error::{HarvestError, Result};
pub use types::{
    ArchiveKey, AssetMetadata, Chapter, CollectionName, DEFAULT_STATUS, DEFAULT_TITLE, Image,
    ImageFormat, UNKNOWN_WORK_ID, Work, image_file_stem, work_id_from_url,
};
