//! Site-specific extraction on top of an [`AutomationSession`].
//!
//! Every read is navigate → settle → evaluate. The settle pause gives
//! client-side rendering time to populate the DOM.

use std::time::Duration;

use tracing::{debug, instrument};

use mangaroo_shared::{
    DEFAULT_STATUS, DEFAULT_TITLE, HarvestConfig, HarvestError, Result, SelectorConfig,
};

use crate::automation::AutomationSession;

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

/// Extraction scripts rendered once from the configured selectors.
#[derive(Debug, Clone)]
pub struct SiteScripts {
    title: String,
    status: String,
    chapter_count: String,
    image_urls: String,
    status_label: String,
}

impl SiteScripts {
    pub fn new(selectors: &SelectorConfig) -> Self {
        let title = format!(
            r#"(() => {{
    for (const sel of {selectors}) {{
        const text = document.querySelector(sel)?.textContent?.trim();
        if (text) return text;
    }}
    return (document.title || "").split({separator})[0].trim() || {fallback};
}})()"#,
            selectors = js_literal(&selectors.title),
            separator = js_literal(&selectors.title_separator),
            fallback = js_literal(DEFAULT_TITLE),
        );

        let status = format!(
            r#"(() => {{
    const el = document.querySelector({selector});
    return el ? el.textContent.trim() : "";
}})()"#,
            selector = js_literal(&selectors.status),
        );

        let chapter_count = format!(
            "document.querySelectorAll({selector}).length",
            selector = js_literal(&selectors.chapter_rows),
        );

        let image_urls = format!(
            r#"JSON.stringify(
    Array.from(document.querySelectorAll({selector}))
        .map(img => {attributes}.map(a => img.getAttribute(a)).find(v => v) || null)
        .filter(url => url && !url.startsWith("data:"))
)"#,
            selector = js_literal(&selectors.images),
            attributes = js_literal(&selectors.image_attributes),
        );

        Self {
            title,
            status,
            chapter_count,
            image_urls,
            status_label: selectors.status_label.clone(),
        }
    }
}

/// Encode a value as a JavaScript literal (JSON is a subset).
fn js_literal<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".into())
}

// ---------------------------------------------------------------------------
// ContentExtractor
// ---------------------------------------------------------------------------

/// Answers the harvest's extraction questions against a live session.
pub struct ContentExtractor<S> {
    session: S,
    scripts: SiteScripts,
    page_settle: Duration,
    listing_settle: Duration,
}

impl<S: AutomationSession> ContentExtractor<S> {
    pub fn new(
        session: S,
        selectors: &SelectorConfig,
        page_settle: Duration,
        listing_settle: Duration,
    ) -> Self {
        Self {
            session,
            scripts: SiteScripts::new(selectors),
            page_settle,
            listing_settle,
        }
    }

    pub fn from_config(session: S, config: &HarvestConfig) -> Self {
        Self::new(
            session,
            &config.selectors,
            config.page_settle,
            config.listing_settle,
        )
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// Resolve the work title. Falls back to the document title, then to
    /// `"unknown"`; only navigation or evaluation failures are errors.
    #[instrument(skip(self))]
    pub async fn title(&mut self, work_url: &str) -> Result<String> {
        let script = self.scripts.title.clone();
        let raw = self.read(work_url, self.page_settle, &script).await?;
        let title = raw.trim();
        Ok(if title.is_empty() {
            DEFAULT_TITLE.to_string()
        } else {
            title.to_string()
        })
    }

    /// Resolve the publication status, with the redundant label removed.
    #[instrument(skip(self))]
    pub async fn status(&mut self, work_url: &str) -> Result<String> {
        let script = self.scripts.status.clone();
        let raw = self.read(work_url, self.page_settle, &script).await?;
        Ok(clean_status(&raw, &self.scripts.status_label))
    }

    /// Count the chapter rows on the work page.
    #[instrument(skip(self))]
    pub async fn chapter_count(&mut self, work_url: &str) -> Result<u32> {
        let script = self.scripts.chapter_count.clone();
        let raw = self.read(work_url, self.page_settle, &script).await?;
        parse_chapter_count(&raw)
    }

    /// Collect the page image URLs of a chapter, in DOM order, unnormalized.
    #[instrument(skip(self))]
    pub async fn chapter_image_urls(&mut self, chapter_url: &str) -> Result<Vec<String>> {
        let script = self.scripts.image_urls.clone();
        let raw = self.read(chapter_url, self.listing_settle, &script).await?;
        let urls = parse_image_urls(&raw)?;
        debug!(count = urls.len(), "image urls extracted");
        Ok(urls)
    }

    async fn read(&mut self, url: &str, settle: Duration, script: &str) -> Result<String> {
        self.session.navigate(url).await?;
        self.session.pause(settle).await;
        self.session.evaluate(script).await
    }
}

fn clean_status(raw: &str, label: &str) -> String {
    let mut status = raw.trim().to_string();
    if !label.is_empty() {
        status = status.replace(label, "");
    }
    let status = status.trim();
    if status.is_empty() {
        DEFAULT_STATUS.to_string()
    } else {
        status.to_string()
    }
}

fn parse_chapter_count(raw: &str) -> Result<u32> {
    raw.trim().parse::<u32>().map_err(|e| {
        HarvestError::parse(format!("chapter count {raw:?} is not an integer: {e}"))
    })
}

fn parse_image_urls(raw: &str) -> Result<Vec<String>> {
    let urls: Vec<String> = serde_json::from_str(raw)
        .map_err(|e| HarvestError::parse(format!("image URL list is not a JSON array: {e}")))?;
    Ok(urls
        .into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty() && !u.starts_with("data:"))
        .collect())
}

// ---------------------------------------------------------------------------
// URL normalization
// ---------------------------------------------------------------------------

/// Make a raw image URL absolute.
///
/// Scheme-prefixed URLs pass through, `//host/..` gets `https:`, `/path`
/// gets the site `origin`, anything else gets `https://`.
pub fn normalize_image_url(raw: &str, origin: &str) -> String {
    let raw = raw.trim();
    if has_scheme(raw) {
        raw.to_string()
    } else if raw.starts_with("//") {
        format!("https:{raw}")
    } else if raw.starts_with('/') {
        format!("{}{raw}", origin.trim_end_matches('/'))
    } else {
        format!("https://{raw}")
    }
}

fn has_scheme(url: &str) -> bool {
    let Some((scheme, _)) = url.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// URL of chapter `number` below the work URL (`<work>/c<number>`).
pub fn chapter_url(work_url: &str, number: u32) -> String {
    format!("{}/c{number}", work_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{FixturePage, FixtureSession};

    const WORK: &str = "https://mangakatana.com/manga/one-piece.123";
    const ORIGIN: &str = "https://mangakatana.com";

    fn extractor(page: FixturePage) -> ContentExtractor<FixtureSession> {
        let session = FixtureSession::new()
            .page(WORK, page)
            .page(
                chapter_url(WORK, 1),
                FixturePage::new().respond(
                    "div#imgs img",
                    r#"["https://cdn/1.jpg", "//cdn/2.png", " ", "data:image/png;base64,AA"]"#,
                ),
            )
            .page(
                chapter_url(WORK, 2),
                FixturePage::new().respond("div#imgs img", "not json"),
            );
        ContentExtractor::new(
            session,
            &SelectorConfig::default(),
            Duration::from_secs(2),
            Duration::from_secs(3),
        )
    }

    #[test]
    fn normalizes_every_url_form() {
        assert_eq!(normalize_image_url("//cdn/x.jpg", ORIGIN), "https://cdn/x.jpg");
        assert_eq!(
            normalize_image_url("/img/x.jpg", ORIGIN),
            "https://mangakatana.com/img/x.jpg"
        );
        assert_eq!(normalize_image_url("http://cdn/x.jpg", ORIGIN), "http://cdn/x.jpg");
        assert_eq!(normalize_image_url("cdn/x.jpg", ORIGIN), "https://cdn/x.jpg");
        assert_eq!(
            normalize_image_url("/img/x.jpg", "https://mangakatana.com/"),
            "https://mangakatana.com/img/x.jpg"
        );
    }

    #[test]
    fn chapter_urls_are_numbered() {
        assert_eq!(chapter_url(WORK, 3), format!("{WORK}/c3"));
        assert_eq!(chapter_url(&format!("{WORK}/"), 3), format!("{WORK}/c3"));
    }

    #[test]
    fn scripts_embed_configured_selectors() {
        let scripts = SiteScripts::new(&SelectorConfig::default());
        assert!(scripts.title.contains(r#"["h1.heading","h1.title","div.manga-info h1"]"#));
        assert!(scripts.title.contains(r#"split("|")"#));
        assert!(scripts.status.contains("li.d-row-small div.status"));
        assert!(scripts.chapter_count.contains("tbody tr"));
        assert!(scripts.image_urls.contains(r#"["data-src","src"]"#));
    }

    #[test]
    fn status_label_is_stripped() {
        assert_eq!(clean_status("  status Ongoing ", "status"), "Ongoing");
        assert_eq!(clean_status("", "status"), DEFAULT_STATUS);
        assert_eq!(clean_status("status", "status"), DEFAULT_STATUS);
    }

    #[tokio::test]
    async fn reads_title_and_settles_first() {
        let mut extractor = extractor(FixturePage::new().respond("h1.heading", " One Piece "));
        let history = extractor.session().history();
        extractor.session_mut().initialize().await.unwrap();

        let title = extractor.title(WORK).await.unwrap();
        assert_eq!(title, "One Piece");
        assert_eq!(history.navigations(), vec![WORK.to_string()]);
        assert_eq!(history.pauses(), vec![Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn empty_title_falls_back_to_unknown() {
        let mut extractor = extractor(FixturePage::new().respond("h1.heading", ""));
        extractor.session_mut().initialize().await.unwrap();
        assert_eq!(extractor.title(WORK).await.unwrap(), DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn status_defaults_when_element_missing() {
        let mut extractor = extractor(FixturePage::new().respond("div.status", ""));
        extractor.session_mut().initialize().await.unwrap();
        assert_eq!(extractor.status(WORK).await.unwrap(), "Unknown");
    }

    #[tokio::test]
    async fn chapter_count_parses_integer() {
        let mut extractor = extractor(FixturePage::new().respond("tbody tr", "12"));
        extractor.session_mut().initialize().await.unwrap();
        assert_eq!(extractor.chapter_count(WORK).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn chapter_count_rejects_non_numeric() {
        let mut extractor = extractor(FixturePage::new().respond("tbody tr", "N/A"));
        extractor.session_mut().initialize().await.unwrap();
        let err = extractor.chapter_count(WORK).await.unwrap_err();
        assert!(matches!(err, HarvestError::Parse { .. }));
    }

    #[tokio::test]
    async fn image_urls_drop_inline_and_blank_entries() {
        let mut extractor = extractor(FixturePage::new());
        let history = extractor.session().history();
        extractor.session_mut().initialize().await.unwrap();

        let urls = extractor
            .chapter_image_urls(&chapter_url(WORK, 1))
            .await
            .unwrap();
        assert_eq!(urls, vec!["https://cdn/1.jpg", "//cdn/2.png"]);
        assert_eq!(history.pauses(), vec![Duration::from_secs(3)]);
    }

    #[tokio::test]
    async fn malformed_image_list_is_a_parse_error() {
        let mut extractor = extractor(FixturePage::new());
        extractor.session_mut().initialize().await.unwrap();
        let err = extractor
            .chapter_image_urls(&chapter_url(WORK, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Parse { .. }));
    }

    #[tokio::test]
    async fn uninitialized_session_surfaces_error() {
        let mut extractor = extractor(FixturePage::new().respond("h1.heading", "X"));
        let err = extractor.title(WORK).await.unwrap_err();
        assert!(matches!(err, HarvestError::NotInitialized));
    }
}
