//! Core value types shared across all Pithos crates

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Field names the store manages itself; mutations may never touch these.
pub const MANAGED_FIELDS: [&str; 3] = ["id", "createdAt", "updatedAt"];

/// One document in a table: a managed identity plus an arbitrary JSON
/// field map. Serialized with camelCase wire names to match the on-blob
/// record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Build a fresh record with a new unique id and current timestamps.
    /// Managed field names in the input map are discarded.
    pub fn new(mut fields: Map<String, Value>) -> Self {
        for name in MANAGED_FIELDS {
            fields.remove(name);
        }
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            fields,
        }
    }

    /// Project a field by wire name. The managed identity fields are
    /// addressable alongside the free-form map, so queries and indexes can
    /// sort on `createdAt` the same way they sort on any data field.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.clone())),
            "createdAt" => serde_json::to_value(self.created_at).ok(),
            "updatedAt" => serde_json::to_value(self.updated_at).ok(),
            _ => self.fields.get(name).cloned(),
        }
    }

    /// Merge a partial field map over this record. `id` and `createdAt`
    /// are immutable; `updatedAt` is refreshed.
    pub fn merge(&mut self, patch: Map<String, Value>) {
        for (name, value) in patch {
            if MANAGED_FIELDS.contains(&name.as_str()) {
                continue;
            }
            self.fields.insert(name, value);
        }
        self.touch();
    }

    /// Refresh `updatedAt`, keeping it strictly monotonic even when the
    /// wall clock has not advanced between two mutations.
    pub fn touch(&mut self) {
        let now = Utc::now();
        let floor = self.updated_at + Duration::microseconds(1);
        self.updated_at = now.max(floor);
    }
}

/// The fixed set of physical backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    BotChannel,
    VideoHost,
    PhotoHost,
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::BotChannel => "bot-channel",
            BackendKind::VideoHost => "video-host",
            BackendKind::PhotoHost => "photo-host",
            BackendKind::Memory => "memory",
        };
        write!(f, "{}", name)
    }
}

/// Opaque reference to a previously uploaded blob. The id is the logical
/// blob name, so deterministic names (tables, indexes) resolve across
/// process restarts; the owning tag lets the fabric skip probing when it
/// is known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobHandle {
    pub id: String,
    pub backend: Option<BackendKind>,
}

impl BlobHandle {
    /// Handle for a blob whose owning backend is unknown (e.g. after a
    /// restart); the fabric will probe every backend in order.
    pub fn named(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            backend: None,
        }
    }

    pub fn owned(id: impl Into<String>, backend: BackendKind) -> Self {
        Self {
            id: id.into(),
            backend: Some(backend),
        }
    }
}

/// Caller-declared metadata for an upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub mime_type: String,
    pub description: Option<String>,
    /// Ask the backend to keep the exact bytes (no re-encode/transcode).
    /// Required for steganographic carriers, which re-compression would
    /// corrupt.
    pub original_quality: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            mime_type: "application/octet-stream".to_string(),
            description: None,
            original_quality: false,
        }
    }
}

impl UploadOptions {
    pub fn mime(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            ..Default::default()
        }
    }
}

/// Unified metadata returned after a successful fabric upload.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub handle: BlobHandle,
    pub backend: BackendKind,
    pub size: usize,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::{assert_eq, assert_ne};
    use serde_json::json;

    fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_new_record_strips_managed_fields() {
        let record = Record::new(fields(&[
            ("id", json!("forged")),
            ("createdAt", json!("2001-01-01T00:00:00Z")),
            ("title", json!("clip")),
        ]));

        assert_ne!(record.id, "forged");
        assert_eq!(record.fields.get("title"), Some(&json!("clip")));
        assert!(!record.fields.contains_key("id"));
        assert!(!record.fields.contains_key("createdAt"));
    }

    #[test]
    fn test_merge_keeps_identity_and_touches() {
        let mut record = Record::new(fields(&[("views", json!(10))]));
        let id = record.id.clone();
        let created = record.created_at;
        let updated = record.updated_at;

        record.merge(fields(&[("views", json!(11)), ("id", json!("other"))]));

        assert_eq!(record.id, id);
        assert_eq!(record.created_at, created);
        assert!(record.updated_at > updated);
        assert_eq!(record.fields.get("views"), Some(&json!(11)));
    }

    #[test]
    fn test_touch_is_monotonic() {
        let mut record = Record::new(Map::new());
        let mut last = record.updated_at;
        for _ in 0..5 {
            record.touch();
            assert!(record.updated_at > last);
            last = record.updated_at;
        }
    }

    #[test]
    fn test_field_projection() {
        let record = Record::new(fields(&[("views", json!(42))]));

        assert_eq!(record.field("views"), Some(json!(42)));
        assert_eq!(record.field("id"), Some(Value::String(record.id.clone())));
        assert!(record.field("createdAt").is_some());
        assert_eq!(record.field("missing"), None);
    }

    #[test]
    fn test_record_wire_format_is_flat_camel_case() {
        let record = Record::new(fields(&[("views", json!(7))]));
        let value = serde_json::to_value(&record).unwrap();

        let object = value.as_object().unwrap();
        assert!(object.contains_key("id"));
        assert!(object.contains_key("createdAt"));
        assert!(object.contains_key("updatedAt"));
        assert_eq!(object.get("views"), Some(&json!(7)));

        let back: Record = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_backend_kind_display_and_serde() {
        assert_eq!(BackendKind::BotChannel.to_string(), "bot-channel");
        assert_eq!(
            serde_json::to_string(&BackendKind::VideoHost).unwrap(),
            "\"video_host\""
        );
    }
}
