//! Application configuration for mangaroo.
//!
//! User config lives at `~/.mangaroo/mangaroo.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "mangaroo.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".mangaroo";

/// Identity string sent by both the browser and the asset fetcher.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

// ---------------------------------------------------------------------------
// Config structs (matching mangaroo.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub site: SiteConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub politeness: PolitenessConfig,

    #[serde(default)]
    pub archive: ArchiveConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory for local staging.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> String {
    "output".into()
}

/// `[site]` section: where the target lives and how its pages are read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Origin prepended to root-relative image URLs.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Path marker preceding the work id in a work URL.
    #[serde(default = "default_work_path_marker")]
    pub work_path_marker: String,

    #[serde(default)]
    pub selectors: SelectorConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            work_path_marker: default_work_path_marker(),
            selectors: SelectorConfig::default(),
        }
    }
}

fn default_origin() -> String {
    "https://mangakatana.com".into()
}
fn default_work_path_marker() -> String {
    "/manga/".into()
}

/// `[site.selectors]` section: CSS selectors used by the extraction scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Title selectors in priority order; the first non-empty match wins.
    #[serde(default = "default_title_selectors")]
    pub title: Vec<String>,

    /// Separator splitting the document title when no selector matched.
    #[serde(default = "default_title_separator")]
    pub title_separator: String,

    #[serde(default = "default_status_selector")]
    pub status: String,

    /// Redundant label removed from the extracted status text.
    #[serde(default = "default_status_label")]
    pub status_label: String,

    /// One match per chapter on the work page.
    #[serde(default = "default_chapter_rows")]
    pub chapter_rows: String,

    /// Page images on a chapter page.
    #[serde(default = "default_images")]
    pub images: String,

    /// Image attributes consulted in order for the source URL.
    #[serde(default = "default_image_attributes")]
    pub image_attributes: Vec<String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            title: default_title_selectors(),
            title_separator: default_title_separator(),
            status: default_status_selector(),
            status_label: default_status_label(),
            chapter_rows: default_chapter_rows(),
            images: default_images(),
            image_attributes: default_image_attributes(),
        }
    }
}

fn default_title_selectors() -> Vec<String> {
    vec![
        "h1.heading".into(),
        "h1.title".into(),
        "div.manga-info h1".into(),
    ]
}
fn default_title_separator() -> String {
    "|".into()
}
fn default_status_selector() -> String {
    "li.d-row-small div.status".into()
}
fn default_status_label() -> String {
    "status".into()
}
fn default_chapter_rows() -> String {
    "div.chapters table.uk-table tbody tr".into()
}
fn default_images() -> String {
    "div#imgs img".into()
}
fn default_image_attributes() -> Vec<String> {
    vec!["data-src".into(), "src".into()]
}

/// `[browser]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_true")]
    pub headless: bool,

    /// Per-request timeout for navigation and evaluation.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Settle delay between navigation and evaluation on single-page reads.
    #[serde(default = "default_page_settle_ms")]
    pub page_settle_ms: u64,

    /// Settle delay on chapter-listing reads.
    #[serde(default = "default_listing_settle_ms")]
    pub listing_settle_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            headless: true,
            timeout_secs: default_timeout_secs(),
            page_settle_ms: default_page_settle_ms(),
            listing_settle_ms: default_listing_settle_ms(),
        }
    }
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}
fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_page_settle_ms() -> u64 {
    2000
}
fn default_listing_settle_ms() -> u64 {
    3000
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// `[politeness]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolitenessConfig {
    /// Pause after each image.
    #[serde(default = "default_image_delay")]
    pub image_delay_ms: u64,

    /// Pause after each chapter.
    #[serde(default = "default_chapter_delay")]
    pub chapter_delay_ms: u64,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            image_delay_ms: default_image_delay(),
            chapter_delay_ms: default_chapter_delay(),
        }
    }
}

fn default_image_delay() -> u64 {
    500
}
fn default_chapter_delay() -> u64 {
    3000
}

/// Which archive backend a run writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveBackend {
    Libsql,
    Elasticsearch,
    None,
}

impl std::str::FromStr for ArchiveBackend {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "libsql" => Ok(Self::Libsql),
            "elasticsearch" | "es" => Ok(Self::Elasticsearch),
            "none" => Ok(Self::None),
            other => Err(HarvestError::config(format!(
                "unknown archive backend '{other}': expected libsql, elasticsearch, or none"
            ))),
        }
    }
}

/// `[archive]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_backend")]
    pub backend: ArchiveBackend,

    /// Database file for the libsql backend.
    #[serde(default = "default_archive_path")]
    pub path: String,

    /// Endpoint for the elasticsearch backend.
    #[serde(default = "default_archive_url")]
    pub url: String,

    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_archive_path(),
            url: default_archive_url(),
            collection_prefix: default_collection_prefix(),
        }
    }
}

fn default_backend() -> ArchiveBackend {
    ArchiveBackend::Libsql
}
fn default_archive_path() -> String {
    "~/.mangaroo/archive.db".into()
}
fn default_archive_url() -> String {
    "http://localhost:9200".into()
}
fn default_collection_prefix() -> String {
    "manga_".into()
}

// ---------------------------------------------------------------------------
// Harvest config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime harvest configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Root of the local staging tree.
    pub output_dir: PathBuf,
    pub origin: String,
    pub selectors: SelectorConfig,
    pub user_agent: String,
    pub headless: bool,
    pub browser_timeout: Duration,
    pub page_settle: Duration,
    pub listing_settle: Duration,
    pub fetch_timeout: Duration,
    pub image_delay: Duration,
    pub chapter_delay: Duration,
    pub collection_prefix: String,
}

impl From<&AppConfig> for HarvestConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            output_dir: expand_home(&config.defaults.output_dir),
            origin: config.site.origin.clone(),
            selectors: config.site.selectors.clone(),
            user_agent: config.browser.user_agent.clone(),
            headless: config.browser.headless,
            browser_timeout: Duration::from_secs(config.browser.timeout_secs),
            page_settle: Duration::from_millis(config.browser.page_settle_ms),
            listing_settle: Duration::from_millis(config.browser.listing_settle_ms),
            fetch_timeout: Duration::from_secs(config.fetch.timeout_secs),
            image_delay: Duration::from_millis(config.politeness.image_delay_ms),
            chapter_delay: Duration::from_millis(config.politeness.chapter_delay_ms),
            collection_prefix: config.archive.collection_prefix.clone(),
        }
    }
}

impl HarvestConfig {
    /// Defaults with every delay zeroed, for tests and fixture runs.
    pub fn without_delays(output_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::from(&AppConfig::default());
        config.output_dir = output_dir.into();
        config.page_settle = Duration::ZERO;
        config.listing_settle = Duration::ZERO;
        config.image_delay = Duration::ZERO;
        config.chapter_delay = Duration::ZERO;
        config
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.mangaroo/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.mangaroo/mangaroo.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
