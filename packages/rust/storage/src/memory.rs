//! In-process archive used by tests and dry runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use mangaroo_shared::{ArchiveKey, AssetMetadata, CollectionName, HarvestError, Result};

use crate::ArchivePort;

/// An asset as held by [`MemoryArchive`].
#[derive(Debug, Clone)]
pub struct MemoryAsset {
    pub bytes: Vec<u8>,
    pub metadata: AssetMetadata,
}

#[derive(Debug, Default)]
struct State {
    collections: Vec<CollectionName>,
    records: BTreeMap<(String, String), serde_json::Value>,
    assets: BTreeMap<(String, String), MemoryAsset>,
    asset_writes: usize,
    failing_keys: HashSet<(u32, u32)>,
    fail_collections: bool,
}

/// Upserting map-backed archive. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    state: Arc<Mutex<State>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }

    /// Reject every `put_asset` for image `index` of `chapter`.
    pub fn fail_asset(self, chapter: u32, index: u32) -> Self {
        self.with(|s| s.failing_keys.insert((chapter, index)));
        self
    }

    /// Reject `ensure_collection`.
    pub fn fail_collections(self) -> Self {
        self.with(|s| s.fail_collections = true);
        self
    }

    /// Collections created so far, in creation order.
    pub fn collections(&self) -> Vec<CollectionName> {
        self.with(|s| s.collections.clone())
    }

    pub fn asset_count(&self, collection: &CollectionName) -> usize {
        self.with(|s| {
            s.assets
                .keys()
                .filter(|(c, _)| c == collection.as_str())
                .count()
        })
    }

    pub fn asset(&self, key: &ArchiveKey) -> Option<MemoryAsset> {
        self.with(|s| {
            s.assets
                .get(&(key.collection.to_string(), key.document_id()))
                .cloned()
        })
    }

    /// Document ids stored under `collection`, sorted.
    pub fn document_ids(&self, collection: &CollectionName) -> Vec<String> {
        self.with(|s| {
            s.assets
                .keys()
                .filter(|(c, _)| c == collection.as_str())
                .map(|(_, id)| id.clone())
                .collect()
        })
    }

    pub fn record(&self, collection: &CollectionName, id: &str) -> Option<serde_json::Value> {
        self.with(|s| {
            s.records
                .get(&(collection.to_string(), id.to_string()))
                .cloned()
        })
    }

    /// Successful `put_asset` calls, counting overwrites.
    pub fn asset_writes(&self) -> usize {
        self.with(|s| s.asset_writes)
    }
}

#[async_trait]
impl ArchivePort for MemoryArchive {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_collection(&self, name: &CollectionName) -> Result<()> {
        self.with(|s| {
            if s.fail_collections {
                return Err(HarvestError::Storage(format!(
                    "cannot create collection {name}"
                )));
            }
            if !s.collections.contains(name) {
                s.collections.push(name.clone());
            }
            Ok(())
        })
    }

    async fn put_record(
        &self,
        collection: &CollectionName,
        id: &str,
        record: &serde_json::Value,
    ) -> Result<()> {
        self.with(|s| {
            s.records
                .insert((collection.to_string(), id.to_string()), record.clone());
        });
        Ok(())
    }

    async fn put_asset(
        &self,
        key: &ArchiveKey,
        bytes: &[u8],
        metadata: &AssetMetadata,
    ) -> Result<()> {
        self.with(|s| {
            if s.failing_keys.contains(&(key.chapter, key.index)) {
                return Err(HarvestError::Storage(format!(
                    "rejected document {}",
                    key.document_id()
                )));
            }
            s.assets.insert(
                (key.collection.to_string(), key.document_id()),
                MemoryAsset {
                    bytes: bytes.to_vec(),
                    metadata: metadata.clone(),
                },
            );
            s.asset_writes += 1;
            Ok(())
        })
    }
}
