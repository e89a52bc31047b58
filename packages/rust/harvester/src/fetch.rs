//! Binary asset download and format classification.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, REFERER};
use tracing::{debug, instrument};
use url::Url;

use mangaroo_shared::{HarvestConfig, HarvestError, ImageFormat, Result};

/// The eight leading bytes of every PNG file.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

/// Longest URL suffix still trusted as a file extension.
const MAX_EXTENSION_LEN: usize = 4;

/// A downloaded and classified asset.
#[derive(Debug, Clone)]
pub struct FetchedAsset {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    /// Content type as reported by the server, if any.
    pub content_type: Option<String>,
}

/// Plain-HTTP downloader for page images.
#[derive(Debug, Clone)]
pub struct AssetFetcher {
    client: Client,
}

impl AssetFetcher {
    /// Create a fetcher sending `user_agent` and bounded by `timeout`.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    pub fn from_config(config: &HarvestConfig) -> Result<Self> {
        Self::new(&config.user_agent, config.fetch_timeout)
    }

    /// GET `url` with `referer` and classify the payload.
    #[instrument(skip(self))]
    pub async fn fetch(&self, url: &str, referer: &str) -> Result<FetchedAsset> {
        let response = self
            .client
            .get(url)
            .header(REFERER, referer)
            .send()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Fetch {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: body read failed: {e}")))?
            .to_vec();

        let format = classify_format(content_type.as_deref(), url, &bytes);
        debug!(len = bytes.len(), %format, "asset fetched");

        Ok(FetchedAsset {
            bytes,
            format,
            content_type,
        })
    }
}

/// Decide the format of a downloaded payload.
///
/// Declared content type first, then the URL's extension, then `jpg`.
/// A PNG signature at the start of the payload overrides all of them.
pub fn classify_format(content_type: Option<&str>, url: &str, bytes: &[u8]) -> ImageFormat {
    if bytes.starts_with(&PNG_SIGNATURE) {
        return ImageFormat::Png;
    }

    content_type
        .and_then(format_from_content_type)
        .or_else(|| url_extension(url).map(|ext| ImageFormat::from_extension(&ext)))
        .unwrap_or(ImageFormat::Jpeg)
}

fn format_from_content_type(content_type: &str) -> Option<ImageFormat> {
    let ct = content_type.to_ascii_lowercase();
    if ct.contains("jpeg") || ct.contains("jpg") {
        Some(ImageFormat::Jpeg)
    } else if ct.contains("png") {
        Some(ImageFormat::Png)
    } else if ct.contains("webp") {
        Some(ImageFormat::Webp)
    } else if ct.contains("gif") {
        Some(ImageFormat::Gif)
    } else {
        None
    }
}

/// Extension of the URL's last path segment, if short enough to trust.
fn url_extension(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    let segment = path.rsplit('/').next()?;
    let (_, ext) = segment.rsplit_once('.')?;

    let valid = !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}
