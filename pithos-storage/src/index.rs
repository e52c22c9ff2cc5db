/// Index store: sorted (key, record id) side-structures per (table, field)
///
/// An index is an accelerant, never a source of truth: it is maintained
/// by explicit calls and can always be rebuilt by re-projecting the
/// field over the table. Entries stay sorted by key so point and range
/// lookups short-circuit instead of scanning the tail.
use crate::cache::{CacheConfig, DocumentCache};
use crate::compression::{CompressionConfig, Compressor};
use crate::fabric::StorageFabric;
use crate::table::{sanitize_name, Query, TableStore};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pithos_core::{BlobHandle, Config, PithosError, PithosResult, UploadOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const INDEX_TAG: &str = "indexes";

pub(crate) fn index_blob_name(table: &str, field: &str) -> String {
    format!(
        "index_{}_{}.json.gz",
        sanitize_name(table),
        sanitize_name(field)
    )
}

/// Project a field value to its index key: strings verbatim, scalars via
/// their display form, absent/null as the empty string, compound values
/// as compact JSON. Keys order as strings; that is the contract range
/// queries are written against.
pub fn project_key(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableIndex {
    pub table: String,
    pub field: String,
    pub entries: Vec<IndexEntry>,
    pub updated_at: DateTime<Utc>,
}

impl TableIndex {
    pub fn empty(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            field: field.into(),
            entries: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Half-open range of positions whose key equals `key`.
    fn equal_range(&self, key: &str) -> (usize, usize) {
        let start = self.entries.partition_point(|e| e.key.as_str() < key);
        let len = self.entries[start..]
            .iter()
            .take_while(|e| e.key == key)
            .count();
        (start, start + len)
    }

    /// All record ids under an exact key.
    pub fn lookup(&self, key: &str) -> Vec<String> {
        let (start, end) = self.equal_range(key);
        self.entries[start..end]
            .iter()
            .map(|e| e.value.clone())
            .collect()
    }

    /// All record ids whose key falls in `[min, max]`, boundaries
    /// included.
    pub fn lookup_range(&self, min: &str, max: &str) -> Vec<String> {
        let start = self.entries.partition_point(|e| e.key.as_str() < min);
        self.entries[start..]
            .iter()
            .take_while(|e| e.key.as_str() <= max)
            .map(|e| e.value.clone())
            .collect()
    }

    /// Insert one pair in sorted position. Exact duplicates are not
    /// permitted; inserting one is a no-op returning false.
    pub fn insert_entry(&mut self, key: &str, id: &str) -> bool {
        let (start, end) = self.equal_range(key);
        if self.entries[start..end].iter().any(|e| e.value == id) {
            return false;
        }
        self.entries.insert(
            end,
            IndexEntry {
                key: key.to_string(),
                value: id.to_string(),
            },
        );
        true
    }

    /// Remove one exact pair. Returns whether it existed.
    pub fn remove_entry(&mut self, key: &str, id: &str) -> bool {
        let (start, end) = self.equal_range(key);
        match self.entries[start..end].iter().position(|e| e.value == id) {
            Some(offset) => {
                self.entries.remove(start + offset);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct IndexStore {
    fabric: Arc<StorageFabric>,
    tables: Arc<TableStore>,
    compressor: Compressor,
    cache: DocumentCache<Arc<TableIndex>>,
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl IndexStore {
    pub fn new(fabric: Arc<StorageFabric>, tables: Arc<TableStore>, config: &Config) -> Self {
        Self {
            fabric,
            tables,
            compressor: Compressor::new(CompressionConfig {
                level: config.tuning.compression_level,
            }),
            cache: DocumentCache::new(CacheConfig {
                ttl: config.tuning.cache_ttl(),
                max_bytes: config.tuning.cache_max_bytes,
            }),
            write_locks: DashMap::new(),
        }
    }

    fn cache_key(table: &str, field: &str) -> String {
        format!("{}::{}", table, field)
    }

    fn write_lock(&self, table: &str, field: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(Self::cache_key(table, field))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load(&self, table: &str, field: &str) -> PithosResult<Arc<TableIndex>> {
        let cache_key = Self::cache_key(table, field);
        if let Some(index) = self.cache.get(&cache_key) {
            return Ok(index);
        }

        let handle = BlobHandle::named(index_blob_name(table, field));
        let (index, weight) = match self.fabric.download_file_by_id(&handle).await? {
            None => (Arc::new(TableIndex::empty(table, field)), 0),
            Some(bytes) => {
                let raw = self.compressor.decompress(&bytes)?;
                let index: TableIndex = serde_json::from_slice(&raw).map_err(|e| {
                    PithosError::Decode(format!(
                        "index {}.{} is unreadable: {}",
                        table, field, e
                    ))
                })?;
                (Arc::new(index), raw.len())
            }
        };

        self.cache
            .set_tagged(&cache_key, index.clone(), weight, vec![INDEX_TAG.to_string()]);
        Ok(index)
    }

    async fn persist(&self, index: TableIndex) -> PithosResult<Arc<TableIndex>> {
        let json = serde_json::to_vec(&index)?;
        let compressed = self.compressor.compress(&json)?;
        let opts = UploadOptions {
            mime_type: "application/gzip".to_string(),
            description: Some(format!("index over {}.{}", index.table, index.field)),
            original_quality: false,
        };

        let stored = self
            .fabric
            .upload_file(
                &index_blob_name(&index.table, &index.field),
                Bytes::from(compressed.data),
                &opts,
            )
            .await?;
        debug!(
            table = %index.table,
            field = %index.field,
            entries = index.entries.len(),
            backend = %stored.backend,
            "persisted index"
        );

        let cache_key = Self::cache_key(&index.table, &index.field);
        let index = Arc::new(index);
        self.cache
            .set_tagged(&cache_key, index.clone(), json.len(), vec![INDEX_TAG.to_string()]);
        Ok(index)
    }

    /// Build (or rebuild) the index by projecting the field over the
    /// full table.
    pub async fn create_index(&self, table: &str, field: &str) -> PithosResult<Arc<TableIndex>> {
        let lock = self.write_lock(table, field);
        let _guard = lock.lock().await;

        let records = self.tables.read(table, &Query::default()).await?;
        let mut entries: Vec<IndexEntry> = records
            .iter()
            .map(|record| IndexEntry {
                key: project_key(record.field(field).as_ref()),
                value: record.id.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        self.persist(TableIndex {
            table: table.to_string(),
            field: field.to_string(),
            entries,
            updated_at: Utc::now(),
        })
        .await
    }

    /// Add a single pair, creating the index if it does not exist yet.
    /// Returns false (without writing) when the exact pair is already
    /// present.
    pub async fn add_to_index(
        &self,
        table: &str,
        field: &str,
        key: &str,
        id: &str,
    ) -> PithosResult<bool> {
        let lock = self.write_lock(table, field);
        let _guard = lock.lock().await;

        let current = self.load(table, field).await?;
        let mut index = current.as_ref().clone();
        if !index.insert_entry(key, id) {
            return Ok(false);
        }
        index.updated_at = Utc::now();
        self.persist(index).await?;
        Ok(true)
    }

    /// Remove a single pair. Returns whether it existed.
    pub async fn remove_from_index(
        &self,
        table: &str,
        field: &str,
        key: &str,
        id: &str,
    ) -> PithosResult<bool> {
        let lock = self.write_lock(table, field);
        let _guard = lock.lock().await;

        let current = self.load(table, field).await?;
        let mut index = current.as_ref().clone();
        if !index.remove_entry(key, id) {
            return Ok(false);
        }
        index.updated_at = Utc::now();
        self.persist(index).await?;
        Ok(true)
    }

    pub async fn find_by_index(
        &self,
        table: &str,
        field: &str,
        key: &str,
    ) -> PithosResult<Vec<String>> {
        Ok(self.load(table, field).await?.lookup(key))
    }

    pub async fn find_by_index_range(
        &self,
        table: &str,
        field: &str,
        min: &str,
        max: &str,
    ) -> PithosResult<Vec<String>> {
        Ok(self.load(table, field).await?.lookup_range(min, max))
    }

    /// Recovery path for stale or lost indexes.
    pub async fn rebuild_indexes(&self, table: &str, fields: &[&str]) -> PithosResult<()> {
        for field in fields {
            self.create_index(table, field).await?;
        }
        Ok(())
    }

    pub fn invalidate_cache(&self) {
        self.cache.invalidate_tag(INDEX_TAG);
    }
}
