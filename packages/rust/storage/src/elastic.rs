//! Elasticsearch archive backend.
//!
//! Collections map to indices and assets to documents with the image payload
//! base64-encoded under `image_data`. Document writes use `PUT _doc/{id}`, so
//! a repeated key overwrites the previous document.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, Response, StatusCode};
use serde_json::json;
use tracing::{debug, info, instrument};

use mangaroo_shared::{ArchiveKey, AssetMetadata, CollectionName, HarvestError, Result};

use crate::ArchivePort;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Archive backed by an Elasticsearch cluster reachable over HTTP.
#[derive(Debug, Clone)]
pub struct ElasticArchive {
    client: Client,
    base_url: String,
}

impl ElasticArchive {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| HarvestError::Storage(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn doc_url(&self, collection: &CollectionName, id: &str) -> String {
        format!("{}/{}/_doc/{}?refresh=true", self.base_url, collection, id)
    }

    async fn put_document(
        &self,
        collection: &CollectionName,
        id: &str,
        body: &serde_json::Value,
    ) -> Result<()> {
        let response = self
            .client
            .put(self.doc_url(collection, id))
            .json(body)
            .send()
            .await
            .map_err(|e| HarvestError::Storage(format!("index {collection}/{id}: {e}")))?;
        check(response, &format!("index {collection}/{id}")).await?;
        Ok(())
    }
}

/// Turn a non-success response into a storage error carrying the body.
async fn check(response: Response, action: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(HarvestError::Storage(format!(
        "{action} failed with status {}: {}",
        status.as_u16(),
        body.trim()
    )))
}

#[async_trait]
impl ArchivePort for ElasticArchive {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    #[instrument(skip(self), fields(url = %self.base_url))]
    async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .map_err(|e| HarvestError::Storage(format!("cluster unreachable: {e}")))?;
        check(response, "ping").await?;
        Ok(())
    }

    async fn ensure_collection(&self, name: &CollectionName) -> Result<()> {
        let index_url = format!("{}/{}", self.base_url, name);
        let head = self
            .client
            .head(&index_url)
            .send()
            .await
            .map_err(|e| HarvestError::Storage(format!("index lookup {name}: {e}")))?;

        match head.status() {
            s if s.is_success() => {
                debug!(collection = %name, "index exists");
                return Ok(());
            }
            StatusCode::NOT_FOUND => {}
            s => {
                return Err(HarvestError::Storage(format!(
                    "index lookup {name} failed with status {}",
                    s.as_u16()
                )));
            }
        }

        let response = self
            .client
            .put(&index_url)
            .send()
            .await
            .map_err(|e| HarvestError::Storage(format!("create index {name}: {e}")))?;

        // Another writer may have created it between HEAD and PUT.
        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if body.contains("resource_already_exists_exception") {
                return Ok(());
            }
            return Err(HarvestError::Storage(format!(
                "create index {name} failed with status 400: {}",
                body.trim()
            )));
        }
        check(response, &format!("create index {name}")).await?;
        info!(collection = %name, "created index");
        Ok(())
    }

    async fn put_record(
        &self,
        collection: &CollectionName,
        id: &str,
        record: &serde_json::Value,
    ) -> Result<()> {
        self.put_document(collection, id, record).await
    }

    async fn put_asset(
        &self,
        key: &ArchiveKey,
        bytes: &[u8],
        metadata: &AssetMetadata,
    ) -> Result<()> {
        let body = json!({
            "chapter_id": key.chapter,
            "image_num": key.index,
            "image_data": STANDARD.encode(bytes),
            "content_type": metadata.content_type,
            "downloaded_at": metadata.downloaded_at,
            "metadata": metadata,
        });
        self.put_document(&key.collection, &key.document_id(), &body)
            .await
    }
}
