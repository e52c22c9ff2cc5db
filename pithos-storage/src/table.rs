/// Table store: CRUD-with-query semantics over whole-collection blobs
///
/// A table is one gzip-compressed JSON array persisted under a
/// deterministic blob name. Every read materializes the full collection
/// (cache or fabric); every mutation rewrites it. Filtering and sorting
/// happen in memory; storage only knows bytes, so nothing can be pushed
/// down.
use crate::cache::{CacheConfig, DocumentCache};
use crate::compression::{CompressionConfig, Compressor};
use crate::fabric::StorageFabric;
use bytes::Bytes;
use dashmap::DashMap;
use indexmap::IndexMap;
use pithos_core::{
    BlobHandle, Config, PithosError, PithosResult, Record, UploadOptions,
};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Cache tag shared by all table entries, for bulk invalidation.
const TABLE_TAG: &str = "tables";

/// Keep blob names safe to embed in backend URL paths.
pub(crate) fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

pub(crate) fn table_blob_name(table: &str) -> String {
    format!("table_{}.json.gz", sanitize_name(table))
}

/// One field predicate; a query's filter is a conjunction of these.
#[derive(Debug, Clone)]
pub enum Predicate {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
}

impl Predicate {
    pub fn matches(&self, actual: &Value) -> bool {
        match self {
            Predicate::Eq(expected) => values_equal(actual, expected),
            Predicate::Ne(expected) => !values_equal(actual, expected),
            Predicate::Gt(expected) => compare_values(actual, expected) == Ordering::Greater,
            Predicate::Gte(expected) => compare_values(actual, expected) != Ordering::Less,
            Predicate::Lt(expected) => compare_values(actual, expected) == Ordering::Less,
            Predicate::Lte(expected) => compare_values(actual, expected) != Ordering::Greater,
            Predicate::In(set) => set.iter().any(|expected| values_equal(actual, expected)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// In-memory query over one table: conjunctive filter, single-field
/// stable sort, then offset/limit.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filter: Vec<(String, Predicate)>,
    pub order_by: Option<String>,
    pub direction: SortDirection,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, predicate: Predicate) -> Self {
        self.filter.push((field.into(), predicate));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some(field.into());
        self.direction = direction;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    fn matches(&self, record: &Record) -> bool {
        self.filter.iter().all(|(field, predicate)| {
            let actual = record.field(field).unwrap_or(Value::Null);
            predicate.matches(&actual)
        })
    }

    pub fn apply(&self, records: &[Record]) -> Vec<Record> {
        let mut out: Vec<Record> = records.iter().filter(|r| self.matches(r)).cloned().collect();

        if let Some(field) = &self.order_by {
            out.sort_by(|a, b| {
                let left = a.field(field).unwrap_or(Value::Null);
                let right = b.field(field).unwrap_or(Value::Null);
                let ord = compare_values(&left, &right);
                match self.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }

        let offset = self.offset.unwrap_or(0);
        let mut out: Vec<Record> = out.into_iter().skip(offset).collect();
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total ordering over JSON values: same-type values compare naturally
/// (numbers numerically across integer/float representations), mixed
/// types by a fixed type rank so sorts stay deterministic.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        _ => {
            let (ra, rb) = (type_rank(a), type_rank(b));
            if ra != rb {
                ra.cmp(&rb)
            } else {
                a.to_string().cmp(&b.to_string())
            }
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Ordering::Equal,
        _ => a == b,
    }
}

/// One mutation inside a batch call.
#[derive(Debug, Clone)]
pub enum BatchOperation {
    Create {
        table: String,
        fields: Map<String, Value>,
    },
    Update {
        table: String,
        id: String,
        patch: Map<String, Value>,
    },
    Delete {
        table: String,
        id: String,
    },
}

impl BatchOperation {
    fn table(&self) -> &str {
        match self {
            BatchOperation::Create { table, .. } => table,
            BatchOperation::Update { table, .. } => table,
            BatchOperation::Delete { table, .. } => table,
        }
    }
}

#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Created(Record),
    Updated(Option<Record>),
    Deleted(bool),
}

/// The document store surface consumed by every collaborating feature.
pub struct TableStore {
    fabric: Arc<StorageFabric>,
    compressor: Compressor,
    cache: DocumentCache<Arc<Vec<Record>>>,
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TableStore {
    pub fn new(fabric: Arc<StorageFabric>, config: &Config) -> Self {
        Self {
            fabric,
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

    /// Mutations to one table are serialized in-process; the whole-blob
    /// read-modify-write cycle has no backend-side locking to lean on.
    fn write_lock(&self, table: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(table.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load(&self, table: &str) -> PithosResult<Arc<Vec<Record>>> {
        if let Some(records) = self.cache.get(table) {
            return Ok(records);
        }

        let handle = BlobHandle::named(table_blob_name(table));
        let (records, weight) = match self.fabric.download_file_by_id(&handle).await? {
            // A table that was never written reads as empty; an existing
            // but unreadable one raises below instead.
            None => (Arc::new(Vec::new()), 0),
            Some(bytes) => {
                let raw = self.compressor.decompress(&bytes)?;
                let records: Vec<Record> = serde_json::from_slice(&raw).map_err(|e| {
                    PithosError::Decode(format!("table {} is unreadable: {}", table, e))
                })?;
                (Arc::new(records), raw.len())
            }
        };

        self.cache
            .set_tagged(table, records.clone(), weight, vec![TABLE_TAG.to_string()]);
        Ok(records)
    }

    async fn persist(&self, table: &str, records: Vec<Record>) -> PithosResult<Arc<Vec<Record>>> {
        let json = serde_json::to_vec(&records)?;
        let compressed = self.compressor.compress(&json)?;
        let opts = UploadOptions {
            mime_type: "application/gzip".to_string(),
            description: Some(format!("records for table {}", table)),
            original_quality: false,
        };

        let stored = self
            .fabric
            .upload_file(&table_blob_name(table), Bytes::from(compressed.data), &opts)
            .await?;
        debug!(
            table,
            records = records.len(),
            bytes = stored.size,
            backend = %stored.backend,
            "persisted table"
        );

        // Refresh (not just invalidate) so readers see their own writes.
        let records = Arc::new(records);
        self.cache
            .set_tagged(table, records.clone(), json.len(), vec![TABLE_TAG.to_string()]);
        Ok(records)
    }

    pub async fn create(&self, table: &str, fields: Map<String, Value>) -> PithosResult<Record> {
        let lock = self.write_lock(table);
        let _guard = lock.lock().await;

        let current = self.load(table).await?;
        let record = Record::new(fields);
        let mut next = current.as_ref().clone();
        next.push(record.clone());
        self.persist(table, next).await?;
        Ok(record)
    }

    pub async fn read(&self, table: &str, query: &Query) -> PithosResult<Vec<Record>> {
        Ok(query.apply(&self.load(table).await?))
    }

    pub async fn find_by_id(&self, table: &str, id: &str) -> PithosResult<Option<Record>> {
        Ok(self.load(table).await?.iter().find(|r| r.id == id).cloned())
    }

    /// Merge a partial field map over an existing record. A missing id is
    /// a `None`, not an error.
    pub async fn update(
        &self,
        table: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> PithosResult<Option<Record>> {
        let lock = self.write_lock(table);
        let _guard = lock.lock().await;

        let current = self.load(table).await?;
        let mut next = current.as_ref().clone();
        let updated = match next.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.merge(patch);
                record.clone()
            }
            None => return Ok(None),
        };
        self.persist(table, next).await?;
        Ok(Some(updated))
    }

    pub async fn delete(&self, table: &str, id: &str) -> PithosResult<bool> {
        let lock = self.write_lock(table);
        let _guard = lock.lock().await;

        let current = self.load(table).await?;
        let mut next = current.as_ref().clone();
        let before = next.len();
        next.retain(|r| r.id != id);
        if next.len() == before {
            return Ok(false);
        }
        self.persist(table, next).await?;
        Ok(true)
    }

    /// Apply many mutations with one load and one persist per table,
    /// the only way to get several changes into a single blob write.
    /// Outcomes come back in the order the operations were given.
    pub async fn batch(
        &self,
        operations: Vec<BatchOperation>,
    ) -> PithosResult<Vec<BatchOutcome>> {
        let total = operations.len();
        let mut grouped: IndexMap<String, Vec<(usize, BatchOperation)>> = IndexMap::new();
        for (position, op) in operations.into_iter().enumerate() {
            grouped
                .entry(op.table().to_string())
                .or_default()
                .push((position, op));
        }

        let mut outcomes: Vec<Option<BatchOutcome>> = Vec::new();
        outcomes.resize_with(total, || None);

        for (table, ops) in grouped {
            let lock = self.write_lock(&table);
            let _guard = lock.lock().await;

            let current = self.load(&table).await?;
            let mut next = current.as_ref().clone();
            let mut dirty = false;

            for (position, op) in ops {
                let outcome = match op {
                    BatchOperation::Create { fields, .. } => {
                        let record = Record::new(fields);
                        next.push(record.clone());
                        dirty = true;
                        BatchOutcome::Created(record)
                    }
                    BatchOperation::Update { id, patch, .. } => {
                        match next.iter_mut().find(|r| r.id == id) {
                            Some(record) => {
                                record.merge(patch);
                                dirty = true;
                                BatchOutcome::Updated(Some(record.clone()))
                            }
                            None => BatchOutcome::Updated(None),
                        }
                    }
                    BatchOperation::Delete { id, .. } => {
                        let before = next.len();
                        next.retain(|r| r.id != id);
                        let removed = next.len() != before;
                        dirty |= removed;
                        BatchOutcome::Deleted(removed)
                    }
                };
                outcomes[position] = Some(outcome);
            }

            if dirty {
                self.persist(&table, next).await?;
            }
        }

        Ok(outcomes.into_iter().flatten().collect())
    }

    /// Drop every memoized table, forcing the next reads through the
    /// fabric.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate_tag(TABLE_TAG);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(id: &str, pairs: &[(&str, Value)]) -> Record {
        let mut record = Record::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        );
        record.id = id.to_string();
        record
    }

    fn videos() -> Vec<Record> {
        vec![
            record("v1", &[("views", json!(10))]),
            record("v2", &[("views", json!(50))]),
            record("v3", &[("views", json!(5))]),
            record("v4", &[("views", json!(90))]),
            record("v5", &[("views", json!(30))]),
        ]
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_predicate_operators() {
        assert!(Predicate::Eq(json!(10)).matches(&json!(10)));
        assert!(Predicate::Eq(json!(10)).matches(&json!(10.0)));
        assert!(!Predicate::Eq(json!(10)).matches(&json!(11)));
        assert!(Predicate::Ne(json!("a")).matches(&json!("b")));
        assert!(Predicate::Gt(json!(5)).matches(&json!(6)));
        assert!(!Predicate::Gt(json!(5)).matches(&json!(5)));
        assert!(Predicate::Gte(json!(5)).matches(&json!(5)));
        assert!(Predicate::Lt(json!("m")).matches(&json!("a")));
        assert!(Predicate::Lte(json!(3)).matches(&json!(3)));
        assert!(Predicate::In(vec![json!(1), json!(2)]).matches(&json!(2)));
        assert!(!Predicate::In(vec![json!(1), json!(2)]).matches(&json!(3)));
    }

    #[test]
    fn test_missing_field_behaves_as_null() {
        let records = vec![record("r1", &[("views", json!(1))]), record("r2", &[])];

        let eq_null = Query::new().filter("views", Predicate::Eq(Value::Null));
        assert_eq!(ids(&eq_null.apply(&records)), vec!["r2"]);

        let ne_one = Query::new().filter("views", Predicate::Ne(json!(1)));
        assert_eq!(ids(&ne_one.apply(&records)), vec!["r2"]);
    }

    #[test]
    fn test_order_by_desc_with_limit() {
        let query = Query::new()
            .order_by("views", SortDirection::Desc)
            .limit(2);
        let result = query.apply(&videos());
        assert_eq!(ids(&result), vec!["v4", "v2"]);
    }

    #[test]
    fn test_sort_is_stable_on_ties() {
        let records = vec![
            record("a", &[("rank", json!(1))]),
            record("b", &[("rank", json!(1))]),
            record("c", &[("rank", json!(0))]),
        ];
        let query = Query::new().order_by("rank", SortDirection::Asc);
        assert_eq!(ids(&query.apply(&records)), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_offset_then_limit() {
        let query = Query::new()
            .order_by("views", SortDirection::Asc)
            .offset(1)
            .limit(2);
        // Ascending views: v3(5), v1(10), v5(30), v2(50), v4(90).
        assert_eq!(ids(&query.apply(&videos())), vec!["v1", "v5"]);
    }

    #[test]
    fn test_offset_beyond_length_is_empty() {
        let query = Query::new().offset(100);
        assert!(query.apply(&videos()).is_empty());
    }

    #[test]
    fn test_conjunction_of_predicates() {
        let query = Query::new()
            .filter("views", Predicate::Gte(json!(10)))
            .filter("views", Predicate::Lt(json!(50)));
        assert_eq!(ids(&query.apply(&videos())), vec!["v1", "v5"]);
    }

    #[test]
    fn test_mixed_types_sort_by_rank() {
        let records = vec![
            record("s", &[("k", json!("text"))]),
            record("n", &[("k", json!(3))]),
            record("z", &[]),
        ];
        let query = Query::new().order_by("k", SortDirection::Asc);
        // null < number < string
        assert_eq!(ids(&query.apply(&records)), vec!["z", "n", "s"]);
    }

    #[test]
    fn test_blob_name_sanitization() {
        assert_eq!(table_blob_name("videos"), "table_videos.json.gz");
        assert_eq!(
            table_blob_name("user events/2024"),
            "table_user-events-2024.json.gz"
        );
    }
}
