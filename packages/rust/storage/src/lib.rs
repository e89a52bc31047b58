//! Archive backends for harvested works.
//!
//! Every backend implements [`ArchivePort`]: a keyed, upserting document
//! store grouped into collections. Writing the same key twice leaves one
//! document holding the latest payload.
//!
//! - [`LibsqlArchive`]: embedded libSQL database (default)
//! - [`ElasticArchive`]: Elasticsearch over HTTP
//! - [`MemoryArchive`]: in-process map for tests

mod elastic;
mod local;
mod memory;
mod migrations;

use async_trait::async_trait;
use tracing::info;

use mangaroo_shared::{
    ArchiveBackend, ArchiveConfig, ArchiveKey, AssetMetadata, CollectionName, Result, expand_home,
};

pub use elastic::ElasticArchive;
pub use local::{LibsqlArchive, StoredAsset};
pub use memory::{MemoryArchive, MemoryAsset};

/// A keyed document store grouped into named collections.
///
/// All writes are upserts. Failures surface as `HarvestError::Storage`.
#[async_trait]
pub trait ArchivePort: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Verify the backend is reachable.
    async fn ping(&self) -> Result<()>;

    /// Create `name` if it does not exist yet.
    async fn ensure_collection(&self, name: &CollectionName) -> Result<()>;

    /// Upsert a structured record under `id`.
    async fn put_record(
        &self,
        collection: &CollectionName,
        id: &str,
        record: &serde_json::Value,
    ) -> Result<()>;

    /// Upsert one binary asset with its metadata.
    async fn put_asset(
        &self,
        key: &ArchiveKey,
        bytes: &[u8],
        metadata: &AssetMetadata,
    ) -> Result<()>;
}

/// Open the backend selected by `config`, or `None` when archiving is off.
pub async fn open_archive(config: &ArchiveConfig) -> Result<Option<Box<dyn ArchivePort>>> {
    let archive: Box<dyn ArchivePort> = match config.backend {
        ArchiveBackend::None => return Ok(None),
        ArchiveBackend::Libsql => {
            let path = expand_home(&config.path);
            let archive = LibsqlArchive::open(&path).await?;
            info!(path = %path.display(), "opened libsql archive");
            Box::new(archive)
        }
        ArchiveBackend::Elasticsearch => {
            let archive = ElasticArchive::new(&config.url)?;
            info!(url = %config.url, "using elasticsearch archive");
            Box::new(archive)
        }
    };
    Ok(Some(archive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn disabled_backend_opens_nothing() {
        let config = ArchiveConfig {
            backend: ArchiveBackend::None,
            ..ArchiveConfig::default()
        };
        assert!(open_archive(&config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn libsql_backend_opens_at_configured_path() {
        let path = std::env::temp_dir().join(format!("mangaroo_open_{}.db", Uuid::now_v7()));
        let config = ArchiveConfig {
            backend: ArchiveBackend::Libsql,
            path: path.to_string_lossy().into_owned(),
            ..ArchiveConfig::default()
        };
        let archive = open_archive(&config).await.unwrap().expect("archive");
        assert_eq!(archive.name(), "libsql");
        archive.ping().await.unwrap();
        assert!(path.exists());
    }
}
