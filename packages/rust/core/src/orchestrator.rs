//! End-to-end harvest: work URL → discovery → per-chapter fetch → archive → cleanup.
//!
//! The run is strictly sequential. Only two failures abort it: the output
//! root cannot be created, or the chapter count cannot be parsed. Everything
//! else is logged, counted in the [`HarvestResult`], and skipped.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use mangaroo_harvester::{
    AssetFetcher, AutomationSession, ContentExtractor, chapter_url, normalize_image_url,
};
use mangaroo_shared::{
    ArchiveKey, AssetMetadata, Chapter, CollectionName, HarvestConfig, HarvestError, Image,
    Result, Work,
};
use mangaroo_storage::ArchivePort;

use crate::progress::ProgressReporter;
use crate::report::{ChapterReport, HarvestResult};
use crate::staging::{self, StagedImage};

/// Drives one automation session through complete harvests.
pub struct HarvestOrchestrator<S> {
    extractor: ContentExtractor<S>,
    fetcher: AssetFetcher,
    archive: Option<Box<dyn ArchivePort>>,
    config: HarvestConfig,
    progress: Arc<dyn ProgressReporter>,
}

impl<S: AutomationSession> HarvestOrchestrator<S> {
    pub fn new(
        extractor: ContentExtractor<S>,
        fetcher: AssetFetcher,
        archive: Option<Box<dyn ArchivePort>>,
        config: HarvestConfig,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            extractor,
            fetcher,
            archive,
            config,
            progress,
        }
    }

    /// Build the extractor and fetcher from `config` around `session`.
    pub fn from_config(
        session: S,
        archive: Option<Box<dyn ArchivePort>>,
        config: HarvestConfig,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<Self> {
        let extractor = ContentExtractor::from_config(session, &config);
        let fetcher = AssetFetcher::from_config(&config)?;
        Ok(Self::new(extractor, fetcher, archive, config, progress))
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Harvest the work at `target_url` under `work_id`.
    ///
    /// Returns `Err` only when the run aborts. Partial failures and
    /// cancellation are reported through the returned [`HarvestResult`].
    /// The automation session is released before returning in every case.
    #[instrument(skip_all, fields(url = %target_url, work = %work_id))]
    pub async fn harvest(
        &mut self,
        target_url: &str,
        work_id: &str,
        cancel: &CancellationToken,
    ) -> Result<HarvestResult> {
        let start = Instant::now();
        if target_url.trim().is_empty() {
            return Err(HarvestError::validation("target URL must not be empty"));
        }
        if work_id.trim().is_empty() {
            return Err(HarvestError::validation("work id must not be empty"));
        }

        info!("starting harvest");

        // --- Setup ---
        self.progress.phase("Preparing output directory");
        let output_dir = &self.config.output_dir;
        std::fs::create_dir_all(output_dir).map_err(|e| {
            error!(path = %output_dir.display(), error = %e, "cannot create output directory");
            HarvestError::io(output_dir, e)
        })?;

        self.progress.phase("Starting browser session");
        self.extractor.session_mut().initialize().await?;

        let outcome = self.run(target_url, work_id, cancel, start).await;
        self.extractor.session_mut().release().await;

        let result = outcome?;
        info!(
            title = %result.title,
            status = %result.status,
            collection = %result.collection,
            chapters = result.chapters.len(),
            succeeded = result.chapters_succeeded(),
            partial = result.chapters_partial(),
            failed = result.chapters_failed(),
            images_archived = result.images_archived(),
            cancelled = result.cancelled,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "harvest finished"
        );
        self.progress.done(&result);
        Ok(result)
    }

    /// Release the automation session. Safe to call any number of times.
    pub async fn close(&mut self) {
        self.extractor.session_mut().release().await;
    }

    async fn run(
        &mut self,
        target_url: &str,
        work_id: &str,
        cancel: &CancellationToken,
        start: Instant,
    ) -> Result<HarvestResult> {
        let mut work = Work::new(work_id);

        // --- Discovering work ---
        self.progress.phase("Discovering work");
        self.lookup_title(&mut work, target_url).await;
        match self.extractor.status(target_url).await {
            Ok(status) => {
                work.resolve_status(&status);
            }
            Err(e) => warn!(error = %e, "status lookup failed, keeping default"),
        }

        let count = self
            .extractor
            .chapter_count(target_url)
            .await
            .inspect_err(|e| error!(error = %e, "cannot determine chapter count, aborting"))?;
        work.chapter_count = count;
        info!(
            title = work.title(),
            status = work.status(),
            chapters = count,
            "work discovered"
        );

        // --- Iterating chapters ---
        self.progress.phase("Harvesting chapters");
        let mut collection: Option<CollectionName> = None;
        let mut chapters = Vec::new();
        let mut cancelled = false;

        for number in 1..=count {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            self.progress.chapter_started(number, count);

            let report = self
                .harvest_chapter(&mut work, target_url, number, &mut collection, cancel)
                .await;
            chapters.push(report);

            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if number < count && !polite_pause(self.config.chapter_delay, cancel).await {
                cancelled = true;
                break;
            }
        }

        if cancelled {
            warn!(attempted = chapters.len(), "harvest cancelled");
        }

        let collection_ready = collection.is_some();
        let collection = collection.unwrap_or_else(|| {
            CollectionName::derive(&self.config.collection_prefix, work.title(), work.id())
        });

        let result = HarvestResult {
            work_id: work.id().to_string(),
            title: work.title().to_string(),
            status: work.status().to_string(),
            collection,
            chapter_count: count,
            chapters,
            cancelled,
            elapsed: start.elapsed(),
        };

        self.save_work_record(target_url, &result, collection_ready)
            .await;
        Ok(result)
    }

    /// Best-effort title resolution; failures keep the current title.
    async fn lookup_title(&mut self, work: &mut Work, work_url: &str) {
        match self.extractor.title(work_url).await {
            Ok(title) => {
                if work.resolve_title(&title) {
                    debug!(title = work.title(), "title resolved");
                }
            }
            Err(e) => warn!(error = %e, "title lookup failed"),
        }
    }

    #[instrument(skip_all, fields(chapter = number))]
    async fn harvest_chapter(
        &mut self,
        work: &mut Work,
        work_url: &str,
        number: u32,
        collection: &mut Option<CollectionName>,
        cancel: &CancellationToken,
    ) -> ChapterReport {
        let url = chapter_url(work_url, number);
        let raw_urls = match self.extractor.chapter_image_urls(&url).await {
            Ok(urls) => urls,
            Err(e) => {
                error!(url = %url, error = %e, "image extraction failed, skipping chapter");
                return ChapterReport::failed(number, 0, e);
            }
        };

        let dir = self.config.output_dir.join(Chapter::new(number).dir_name());
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            let e = HarvestError::io(&dir, e);
            error!(error = %e, "cannot create chapter directory, skipping chapter");
            return ChapterReport::failed(number, raw_urls.len(), e);
        }

        // --- Fetching images ---
        let total = raw_urls.len();
        let mut staged = Vec::with_capacity(total);
        for (position, raw) in raw_urls.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let index = position as u32 + 1;
            let source_url = normalize_image_url(raw, &self.config.origin);

            match self.fetch_and_stage(&dir, index, &source_url, work_url).await {
                Ok(item) => staged.push(item),
                Err(e) if e.is_fetch() => {
                    warn!(image = index, url = %source_url, error = %e, "image download failed")
                }
                Err(e) => warn!(image = index, url = %source_url, error = %e, "image not staged"),
            }
            self.progress.image_done(number, index, total);

            // Paced between attempts, failed ones included; the chapter delay follows the last.
            if position + 1 < total && !polite_pause(self.config.image_delay, cancel).await {
                break;
            }
        }
        debug!(found = total, staged = staged.len(), "chapter fetched");

        // --- Archiving ---
        if self.archive.is_none() {
            debug!(dir = %dir.display(), "no archive configured, keeping staged files");
            return ChapterReport::attempted(number, total, staged.len(), None);
        }

        if collection.is_none() && !work.has_title() {
            self.lookup_title(work, work_url).await;
        }

        let archived = match self.archive.as_deref() {
            Some(archive) => {
                self.archive_chapter(archive, work, work_url, number, &staged, collection)
                    .await
            }
            None => 0,
        };

        // --- Cleaning up ---
        if let Err(e) = staging::remove_chapter_dir(&dir).await {
            warn!(error = %e, "failed to remove chapter directory");
        }

        ChapterReport::attempted(number, total, staged.len(), Some(archived))
    }

    async fn fetch_and_stage(
        &self,
        dir: &Path,
        index: u32,
        source_url: &str,
        referer: &str,
    ) -> Result<StagedImage> {
        let asset = self.fetcher.fetch(source_url, referer).await?;
        let downloaded_at = Utc::now();
        let path = staging::stage_bytes(dir, index, &asset.bytes, &asset.format).await?;
        debug!(image = index, path = %path.display(), format = %asset.format, "image staged");

        Ok(StagedImage {
            image: Image {
                index,
                source_url: source_url.to_string(),
                format: asset.format,
            },
            path,
            downloaded_at,
        })
    }

    /// Archive every staged image of a chapter, returning how many succeeded.
    ///
    /// The collection is fixed on first use; if it cannot be prepared the
    /// chapter archives nothing and the next chapter tries again.
    async fn archive_chapter(
        &self,
        archive: &dyn ArchivePort,
        work: &Work,
        work_url: &str,
        number: u32,
        staged: &[StagedImage],
        collection: &mut Option<CollectionName>,
    ) -> usize {
        let name = match collection {
            Some(name) => name.clone(),
            None => {
                let name = CollectionName::derive(
                    &self.config.collection_prefix,
                    work.title(),
                    work.id(),
                );
                if let Err(e) = archive.ensure_collection(&name).await {
                    error!(collection = %name, error = %e, "cannot prepare collection, chapter not archived");
                    return 0;
                }
                info!(collection = %name, backend = archive.name(), "archiving into collection");
                *collection = Some(name.clone());
                name
            }
        };

        let mut archived = 0;
        for item in staged {
            let key = ArchiveKey::new(name.clone(), number, item.image.index);
            match archive_image(archive, &key, work, work_url, item).await {
                Ok(()) => {
                    archived += 1;
                    if let Err(e) = tokio::fs::remove_file(&item.path).await {
                        warn!(path = %item.path.display(), error = %e, "failed to delete archived file");
                    }
                }
                Err(e) => {
                    warn!(image = item.image.index, error = %e, "archival failed, keeping staged file");
                }
            }
        }
        archived
    }

    /// Upsert the work record. Failures are logged only.
    async fn save_work_record(
        &self,
        target_url: &str,
        result: &HarvestResult,
        collection_ready: bool,
    ) {
        let Some(archive) = self.archive.as_deref() else {
            return;
        };

        if !collection_ready {
            if let Err(e) = archive.ensure_collection(&result.collection).await {
                warn!(collection = %result.collection, error = %e, "work record not saved");
                return;
            }
        }

        let record = json!({
            "id": result.work_id,
            "title": result.title,
            "status": result.status,
            "url": target_url,
            "chapter_count": result.chapter_count,
            "chapters_attempted": result.chapters.len(),
            "chapters_succeeded": result.chapters_succeeded(),
            "chapters_partial": result.chapters_partial(),
            "chapters_failed": result.chapters_failed(),
            "images_archived": result.images_archived(),
            "chapters": result.chapters,
            "cancelled": result.cancelled,
            "updated_at": Utc::now(),
        });

        match archive
            .put_record(&result.collection, &result.work_id, &record)
            .await
        {
            Ok(()) => debug!(collection = %result.collection, "work record saved"),
            Err(e) => warn!(collection = %result.collection, error = %e, "work record not saved"),
        }
    }
}

async fn archive_image(
    archive: &dyn ArchivePort,
    key: &ArchiveKey,
    work: &Work,
    work_url: &str,
    item: &StagedImage,
) -> Result<()> {
    let bytes = tokio::fs::read(&item.path)
        .await
        .map_err(|e| HarvestError::io(&item.path, e))?;

    let metadata = AssetMetadata {
        work_id: work.id().to_string(),
        work_title: work.title().to_string(),
        work_url: work_url.to_string(),
        chapter: key.chapter,
        image_index: key.index,
        source_url: item.image.source_url.clone(),
        content_type: item.image.format.content_type(),
        byte_len: bytes.len(),
        sha256: format!("{:x}", Sha256::digest(&bytes)),
        downloaded_at: item.downloaded_at,
    };

    archive.put_asset(key, &bytes, &metadata).await
}

/// Sleep for `delay` unless cancelled first. Returns `false` on cancellation.
async fn polite_pause(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use mangaroo_harvester::{FixtureHistory, FixturePage, FixtureSession, PNG_SIGNATURE};
    use mangaroo_storage::MemoryArchive;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::progress::SilentProgress;
    use crate::report::{ChapterOutcome, HarvestOutcome};

    const WORK_URL: &str = "https://site.test/manga/123";
    const TITLE_NEEDLE: &str = "h1.heading";
    const STATUS_NEEDLE: &str = "div.status";
    const COUNT_NEEDLE: &str = "uk-table";
    const IMAGES_NEEDLE: &str = "div#imgs";

    fn output_dir() -> PathBuf {
        std::env::temp_dir().join(format!("mangaroo_run_{}", Uuid::now_v7()))
    }

    fn jpeg_bytes() -> Vec<u8> {
        vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F']
    }

    fn png_bytes() -> Vec<u8> {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(b"\0\0\0\rIHDR");
        bytes
    }

    fn work_page(count: &str) -> FixturePage {
        FixturePage::new()
            .respond(TITLE_NEEDLE, "One Piece")
            .respond(STATUS_NEEDLE, "Ongoing")
            .respond(COUNT_NEEDLE, count)
    }

    fn chapter_page(urls: &[String]) -> FixturePage {
        FixturePage::new().respond(IMAGES_NEEDLE, serde_json::to_string(urls).unwrap())
    }

    fn orchestrator(
        session: FixtureSession,
        archive: Option<MemoryArchive>,
        out: &Path,
    ) -> HarvestOrchestrator<FixtureSession> {
        orchestrator_with(
            session,
            archive,
            HarvestConfig::without_delays(out),
            Arc::new(SilentProgress),
        )
    }

    fn orchestrator_with(
        session: FixtureSession,
        archive: Option<MemoryArchive>,
        config: HarvestConfig,
        progress: Arc<dyn ProgressReporter>,
    ) -> HarvestOrchestrator<FixtureSession> {
        HarvestOrchestrator::from_config(
            session,
            archive.map(|a| Box::new(a) as Box<dyn ArchivePort>),
            config,
            progress,
        )
        .unwrap()
    }

    /// Cancels `token` shortly after the first image of chapter 1 is done.
    struct CancelAfterFirstImage {
        token: CancellationToken,
    }

    impl ProgressReporter for CancelAfterFirstImage {
        fn phase(&self, _name: &str) {}
        fn chapter_started(&self, _number: u32, _total: u32) {}
        fn image_done(&self, chapter: u32, index: u32, _total: usize) {
            if (chapter, index) == (1, 1) {
                let token = self.token.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    token.cancel();
                });
            }
        }
        fn done(&self, _result: &HarvestResult) {}
    }

    async fn mount_image(server: &MockServer, route: &str, content_type: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", content_type)
                    .set_body_bytes(body),
            )
            .mount(server)
            .await;
    }

    /// Two chapters: c1 has a valid JPEG and a 404, c2 has a PNG served as JPEG.
    async fn two_chapter_site() -> (MockServer, FixtureSession, FixtureHistory) {
        let server = MockServer::start().await;
        mount_image(&server, "/c1/001.jpg", "image/jpeg", jpeg_bytes()).await;
        Mock::given(method("GET"))
            .and(path("/c1/002.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        mount_image(&server, "/c2/001.jpg", "image/jpeg", png_bytes()).await;

        let base = server.uri();
        let session = FixtureSession::new()
            .page(WORK_URL, work_page("2"))
            .page(
                format!("{WORK_URL}/c1"),
                chapter_page(&[format!("{base}/c1/001.jpg"), format!("{base}/c1/002.jpg")]),
            )
            .page(
                format!("{WORK_URL}/c2"),
                chapter_page(&[format!("{base}/c2/001.jpg")]),
            );
        let history = session.history();
        (server, session, history)
    }

    #[tokio::test]
    async fn end_to_end_partial_and_complete_chapters() {
        let (_server, session, history) = two_chapter_site().await;
        let archive = MemoryArchive::new();
        let out = output_dir();
        let mut orch = orchestrator(session, Some(archive.clone()), &out);

        let result = orch
            .harvest(WORK_URL, "123", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.title, "One Piece");
        assert_eq!(result.status, "Ongoing");
        assert_eq!(result.collection.as_str(), "manga_one_piece_123");
        assert_eq!(result.chapters.len(), 2);

        let c1 = &result.chapters[0];
        assert_eq!(c1.outcome, ChapterOutcome::Partial);
        assert_eq!((c1.images_found, c1.images_archived), (2, 1));

        let c2 = &result.chapters[1];
        assert_eq!(c2.outcome, ChapterOutcome::Succeeded);
        assert_eq!((c2.images_found, c2.images_archived), (1, 1));

        let stored = archive
            .asset(&ArchiveKey::new(result.collection.clone(), 2, 1))
            .expect("chapter 2 image archived");
        assert_eq!(stored.metadata.content_type, "image/png");
        assert_eq!(stored.bytes, png_bytes());
        assert_eq!(stored.metadata.byte_len, png_bytes().len());
        assert_eq!(stored.metadata.sha256.len(), 64);

        assert!(!out.join("c1").exists());
        assert!(!out.join("c2").exists());
        assert_eq!(result.outcome(), HarvestOutcome::Partial);
        assert_eq!(history.releases(), 1);

        let record = archive
            .record(&result.collection, "123")
            .expect("work record saved");
        assert_eq!(record["title"], "One Piece");
        assert_eq!(record["chapters_partial"], 1);
    }

    #[tokio::test]
    async fn rerun_does_not_duplicate_assets() {
        let (_server, session, _history) = two_chapter_site().await;
        let archive = MemoryArchive::new();
        let out = output_dir();
        let mut orch = orchestrator(session, Some(archive.clone()), &out);
        let cancel = CancellationToken::new();

        let first = orch.harvest(WORK_URL, "123", &cancel).await.unwrap();
        let second = orch.harvest(WORK_URL, "123", &cancel).await.unwrap();

        assert_eq!(first.collection, second.collection);
        assert_eq!(archive.asset_count(&first.collection), 2);
        assert_eq!(archive.asset_writes(), 4);
        assert_eq!(
            archive.document_ids(&first.collection),
            vec!["1-1".to_string(), "2-1".to_string()]
        );
    }

    #[tokio::test]
    async fn failed_chapter_extraction_does_not_stop_later_chapters() {
        let server = MockServer::start().await;
        mount_image(&server, "/c2/001.jpg", "image/jpeg", jpeg_bytes()).await;

        let session = FixtureSession::new()
            .page(WORK_URL, work_page("2"))
            .page(
                format!("{WORK_URL}/c1"),
                FixturePage::new().fail(IMAGES_NEEDLE, "TypeError: null"),
            )
            .page(
                format!("{WORK_URL}/c2"),
                chapter_page(&[format!("{}/c2/001.jpg", server.uri())]),
            );
        let history = session.history();
        let archive = MemoryArchive::new();
        let mut orch = orchestrator(session, Some(archive), &output_dir());

        let result = orch
            .harvest(WORK_URL, "123", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.chapters_failed(), 1);
        assert_eq!(result.chapters[0].outcome, ChapterOutcome::Failed);
        assert!(result.chapters[0].error.is_some());
        assert_eq!(result.chapters[1].outcome, ChapterOutcome::Succeeded);
        assert!(history.navigations().contains(&format!("{WORK_URL}/c2")));
    }

    #[tokio::test]
    async fn unparseable_chapter_count_aborts_before_any_chapter() {
        let session = FixtureSession::new().page(WORK_URL, work_page("N/A"));
        let history = session.history();
        let mut orch = orchestrator(session, Some(MemoryArchive::new()), &output_dir());

        let err = orch
            .harvest(WORK_URL, "123", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::Parse { .. }));
        assert!(
            history
                .navigations()
                .iter()
                .all(|url| !url.contains("/c1"))
        );
        assert_eq!(history.releases(), 1);
    }

    #[tokio::test]
    async fn status_failure_keeps_default_and_continues() {
        let session = FixtureSession::new().page(
            WORK_URL,
            FixturePage::new()
                .respond(TITLE_NEEDLE, "One Piece")
                .fail(STATUS_NEEDLE, "ReferenceError")
                .respond(COUNT_NEEDLE, "0"),
        );
        let mut orch = orchestrator(session, None, &output_dir());

        let result = orch
            .harvest(WORK_URL, "123", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, "Unknown");
        assert_eq!(result.title, "One Piece");
        assert!(result.chapters.is_empty());
        assert_eq!(result.outcome(), HarvestOutcome::Complete);
    }

    #[tokio::test]
    async fn staged_files_are_kept_without_archive() {
        let (_server, session, _history) = two_chapter_site().await;
        let out = output_dir();
        let mut orch = orchestrator(session, None, &out);

        let result = orch
            .harvest(WORK_URL, "123", &CancellationToken::new())
            .await
            .unwrap();

        assert!(out.join("c1").join("001.jpg").exists());
        assert!(!out.join("c1").join("002_temp").exists());
        assert!(out.join("c2").join("001.png").exists());
        assert_eq!(result.chapters[0].outcome, ChapterOutcome::Partial);
        assert_eq!(result.chapters[1].outcome, ChapterOutcome::Succeeded);
        assert_eq!(result.images_archived(), 0);
    }

    #[tokio::test]
    async fn archival_failure_still_cleans_chapter_dir() {
        let (_server, session, _history) = two_chapter_site().await;
        let archive = MemoryArchive::new().fail_asset(2, 1);
        let out = output_dir();
        let mut orch = orchestrator(session, Some(archive.clone()), &out);

        let result = orch
            .harvest(WORK_URL, "123", &CancellationToken::new())
            .await
            .unwrap();

        let c2 = &result.chapters[1];
        assert_eq!(c2.images_staged, 1);
        assert_eq!(c2.images_archived, 0);
        assert_eq!(c2.outcome, ChapterOutcome::Failed);
        assert!(!out.join("c2").exists());
        assert_eq!(archive.asset_count(&result.collection), 1);
    }

    #[tokio::test]
    async fn collection_failure_archives_nothing_but_cleans_up() {
        let server = MockServer::start().await;
        mount_image(&server, "/c1/001.jpg", "image/jpeg", jpeg_bytes()).await;
        let session = FixtureSession::new().page(WORK_URL, work_page("1")).page(
            format!("{WORK_URL}/c1"),
            chapter_page(&[format!("{}/c1/001.jpg", server.uri())]),
        );
        let archive = MemoryArchive::new().fail_collections();
        let out = output_dir();
        let mut orch = orchestrator(session, Some(archive.clone()), &out);

        let result = orch
            .harvest(WORK_URL, "123", &CancellationToken::new())
            .await
            .unwrap();

        let c1 = &result.chapters[0];
        assert_eq!((c1.images_found, c1.images_staged), (1, 1));
        assert_eq!(c1.images_archived, 0);
        assert_eq!(c1.outcome, ChapterOutcome::Failed);
        assert!(!out.join("c1").exists());
        assert_eq!(result.collection.as_str(), "manga_one_piece_123");
        assert!(archive.collections().is_empty());
        assert_eq!(archive.asset_count(&result.collection), 0);
        assert!(archive.record(&result.collection, "123").is_none());
    }

    #[tokio::test]
    async fn unknown_title_is_retried_before_archival() {
        let server = MockServer::start().await;
        mount_image(&server, "/c1/001.jpg", "image/jpeg", jpeg_bytes()).await;
        mount_image(&server, "/c2/001.jpg", "image/jpeg", jpeg_bytes()).await;
        let base = server.uri();
        let session = FixtureSession::new()
            .page(
                WORK_URL,
                FixturePage::new()
                    .respond_once(TITLE_NEEDLE, "")
                    .respond(TITLE_NEEDLE, "One Piece")
                    .respond(STATUS_NEEDLE, "Ongoing")
                    .respond(COUNT_NEEDLE, "2"),
            )
            .page(
                format!("{WORK_URL}/c1"),
                chapter_page(&[format!("{base}/c1/001.jpg")]),
            )
            .page(
                format!("{WORK_URL}/c2"),
                chapter_page(&[format!("{base}/c2/001.jpg")]),
            );
        let history = session.history();
        let archive = MemoryArchive::new();
        let mut orch = orchestrator(session, Some(archive.clone()), &output_dir());

        let result = orch
            .harvest(WORK_URL, "123", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.title, "One Piece");
        assert_eq!(result.collection.as_str(), "manga_one_piece_123");
        assert_eq!(archive.collections(), vec![result.collection.clone()]);
        assert_eq!(archive.asset_count(&result.collection), 2);

        // Title, status, count, then one retry before chapter 1 is archived.
        let work_visits = history
            .navigations()
            .iter()
            .filter(|url| url.as_str() == WORK_URL)
            .count();
        assert_eq!(work_visits, 4);
    }

    #[tokio::test]
    async fn cancellation_mid_chapter_archives_what_was_staged() {
        let server = MockServer::start().await;
        mount_image(&server, "/c1/001.jpg", "image/jpeg", jpeg_bytes()).await;
        mount_image(&server, "/c1/002.jpg", "image/jpeg", jpeg_bytes()).await;
        let base = server.uri();
        let session = FixtureSession::new()
            .page(WORK_URL, work_page("2"))
            .page(
                format!("{WORK_URL}/c1"),
                chapter_page(&[format!("{base}/c1/001.jpg"), format!("{base}/c1/002.jpg")]),
            )
            .page(
                format!("{WORK_URL}/c2"),
                chapter_page(&[format!("{base}/c1/001.jpg")]),
            );
        let history = session.history();
        let archive = MemoryArchive::new();
        let out = output_dir();
        let cancel = CancellationToken::new();
        let mut config = HarvestConfig::without_delays(&out);
        config.image_delay = Duration::from_secs(600);
        config.chapter_delay = Duration::from_secs(600);
        let progress = Arc::new(CancelAfterFirstImage {
            token: cancel.clone(),
        });
        let mut orch = orchestrator_with(session, Some(archive.clone()), config, progress);

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            orch.harvest(WORK_URL, "123", &cancel),
        )
        .await
        .expect("image delay wakes on cancellation")
        .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.chapters.len(), 1);
        let c1 = &result.chapters[0];
        assert_eq!(
            (c1.images_found, c1.images_staged, c1.images_archived),
            (2, 1, 1)
        );
        assert!(archive.asset(&ArchiveKey::new(result.collection.clone(), 1, 1)).is_some());
        assert!(!out.join("c1").exists());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert!(
            history
                .navigations()
                .iter()
                .all(|url| !url.ends_with("/c2"))
        );
        assert_eq!(history.releases(), 1);
    }

    #[tokio::test]
    async fn huge_chapter_count_does_not_preallocate() {
        let session = FixtureSession::new().page(WORK_URL, work_page("4294967295"));
        let mut orch = orchestrator(session, None, &output_dir());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orch.harvest(WORK_URL, "123", &cancel).await.unwrap();

        assert_eq!(result.chapter_count, u32::MAX);
        assert!(result.cancelled);
        assert!(result.chapters.is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_releases_session_and_saves_record() {
        let (_server, session, history) = two_chapter_site().await;
        let archive = MemoryArchive::new();
        let mut orch = orchestrator(session, Some(archive.clone()), &output_dir());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orch.harvest(WORK_URL, "123", &cancel).await.unwrap();

        assert!(result.cancelled);
        assert!(result.chapters.is_empty());
        assert_eq!(result.outcome(), HarvestOutcome::Cancelled);
        assert_eq!(history.releases(), 1);
        assert!(
            history
                .navigations()
                .iter()
                .all(|url| !url.contains("/c1"))
        );
        let record = archive.record(&result.collection, "123").unwrap();
        assert_eq!(record["cancelled"], true);
    }

    #[tokio::test]
    async fn unwritable_output_root_aborts_before_browser_starts() {
        let blocker = output_dir();
        std::fs::write(&blocker, b"not a directory").unwrap();
        let session = FixtureSession::new().page(WORK_URL, work_page("1"));
        let history = session.history();
        let mut orch = orchestrator(session, None, &blocker.join("out"));

        let err = orch
            .harvest(WORK_URL, "123", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::Io { .. }));
        assert_eq!(history.initializations(), 0);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let session = FixtureSession::new();
        let history = session.history();
        let mut orch = orchestrator(session, None, &output_dir());
        orch.close().await;
        orch.close().await;
        assert_eq!(history.releases(), 0);
    }

    #[tokio::test]
    async fn empty_work_id_is_rejected() {
        let mut orch = orchestrator(FixtureSession::new(), None, &output_dir());
        let err = orch
            .harvest(WORK_URL, " ", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Validation { .. }));
    }
}
