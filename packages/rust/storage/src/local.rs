//! Embedded libSQL archive backend.
//!
//! The [`LibsqlArchive`] struct wraps a local libSQL database holding
//! collections, work records, and page image blobs. Every write is an
//! `INSERT … ON CONFLICT DO UPDATE`, so re-archiving the same key replaces
//! the previous row.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};
use tracing::{debug, info};

use mangaroo_shared::{ArchiveKey, AssetMetadata, CollectionName, HarvestError, Result};

use crate::ArchivePort;
use crate::migrations;

/// An asset row read back from the archive.
#[derive(Debug, Clone)]
pub struct StoredAsset {
    pub chapter: u32,
    pub image_index: u32,
    pub content_type: String,
    pub sha256: String,
    pub data: Vec<u8>,
    pub metadata: serde_json::Value,
}

/// Archive handle wrapping a libSQL database.
pub struct LibsqlArchive {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

fn storage_err(e: impl std::fmt::Display) -> HarvestError {
    HarvestError::Storage(e.to_string())
}

impl LibsqlArchive {
    /// Open or create the archive database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let archive = Self { db, conn };
        archive.run_migrations().await?;
        Ok(archive)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        HarvestError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Number of assets archived under `collection`.
    pub async fn count_assets(&self, collection: &CollectionName) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM assets WHERE collection = ?1",
                params![collection.as_str()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)? as u64),
            None => Ok(0),
        }
    }

    /// Fetch one archived asset by key.
    pub async fn get_asset(&self, key: &ArchiveKey) -> Result<Option<StoredAsset>> {
        let mut rows = self
            .conn
            .query(
                "SELECT chapter, image_index, content_type, sha256, data, metadata_json
                 FROM assets WHERE collection = ?1 AND doc_id = ?2",
                params![key.collection.as_str(), key.document_id()],
            )
            .await
            .map_err(storage_err)?;

        let Some(row) = rows.next().await.map_err(storage_err)? else {
            return Ok(None);
        };

        let metadata_json = row.get::<String>(5).map_err(storage_err)?;
        Ok(Some(StoredAsset {
            chapter: row.get::<u32>(0).map_err(storage_err)?,
            image_index: row.get::<u32>(1).map_err(storage_err)?,
            content_type: row.get::<String>(2).map_err(storage_err)?,
            sha256: row.get::<String>(3).map_err(storage_err)?,
            data: row.get::<Vec<u8>>(4).map_err(storage_err)?,
            metadata: serde_json::from_str(&metadata_json).map_err(storage_err)?,
        }))
    }

    /// Fetch a structured record by id.
    pub async fn get_record(
        &self,
        collection: &CollectionName,
        id: &str,
    ) -> Result<Option<serde_json::Value>> {
        let mut rows = self
            .conn
            .query(
                "SELECT body_json FROM records WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => {
                let body = row.get::<String>(0).map_err(storage_err)?;
                Ok(Some(serde_json::from_str(&body).map_err(storage_err)?))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ArchivePort for LibsqlArchive {
    fn name(&self) -> &str {
        "libsql"
    }

    async fn ping(&self) -> Result<()> {
        let mut rows = self
            .conn
            .query("SELECT 1", params![])
            .await
            .map_err(storage_err)?;
        rows.next().await.map_err(storage_err)?;
        Ok(())
    }

    async fn ensure_collection(&self, name: &CollectionName) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let inserted = self
            .conn
            .execute(
                "INSERT INTO collections (name, created_at) VALUES (?1, ?2)
                 ON CONFLICT(name) DO NOTHING",
                params![name.as_str(), now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        if inserted > 0 {
            info!(collection = %name, "created collection");
        }
        Ok(())
    }

    async fn put_record(
        &self,
        collection: &CollectionName,
        id: &str,
        record: &serde_json::Value,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO records (collection, id, body_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(collection, id) DO UPDATE SET
                   body_json = excluded.body_json,
                   updated_at = excluded.updated_at",
                params![collection.as_str(), id, record.to_string(), now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn put_asset(
        &self,
        key: &ArchiveKey,
        bytes: &[u8],
        metadata: &AssetMetadata,
    ) -> Result<()> {
        let metadata_json = serde_json::to_string(metadata).map_err(storage_err)?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO assets (collection, doc_id, chapter, image_index, content_type, sha256, data, metadata_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(collection, doc_id) DO UPDATE SET
                   content_type = excluded.content_type,
                   sha256 = excluded.sha256,
                   data = excluded.data,
                   metadata_json = excluded.metadata_json,
                   updated_at = excluded.updated_at",
                params![
                    key.collection.as_str(),
                    key.document_id(),
                    i64::from(key.chapter),
                    i64::from(key.index),
                    metadata.content_type.as_str(),
                    metadata.sha256.as_str(),
                    bytes.to_vec(),
                    metadata_json,
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        debug!(collection = %key.collection, doc = %key.document_id(), "asset stored");
        Ok(())
    }
}
