/// In-process backend backed by a concurrent map
///
/// Used by the test suites and for local development without service
/// credentials. Supports impersonating any backend kind and restricting
/// accepted MIME prefixes so media-only behavior can be exercised
/// without a network.
use super::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use pithos_core::{BackendKind, BlobHandle, PithosError, PithosResult, UploadOptions};

#[derive(Debug, Clone)]
struct MemoryBlob {
    data: Bytes,
    mime_type: String,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    kind: Option<BackendKind>,
    accepted: Option<Vec<String>>,
    blobs: DashMap<String, MemoryBlob>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Impersonate another backend kind (the fabric keys its location map
    /// by kind, so stand-ins should be distinguishable).
    pub fn with_kind(kind: BackendKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Restrict accepted MIME types to the given prefixes.
    pub fn accepting(mut self, prefixes: &[&str]) -> Self {
        self.accepted = Some(prefixes.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Raw stored bytes, bypassing any wrapper decoding.
    pub fn raw(&self, name: &str) -> Option<Bytes> {
        self.blobs.get(name).map(|blob| blob.data.clone())
    }

    /// Seed or overwrite raw bytes, e.g. to simulate a corrupt blob.
    pub fn insert_raw(&self, name: &str, data: Bytes, mime_type: &str) {
        self.blobs.insert(
            name.to_string(),
            MemoryBlob {
                data,
                mime_type: mime_type.to_string(),
            },
        );
    }

    /// Declared MIME type of a stored blob.
    pub fn mime_of(&self, name: &str) -> Option<String> {
        self.blobs.get(name).map(|blob| blob.mime_type.clone())
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        self.kind.unwrap_or(BackendKind::Memory)
    }

    fn accepts(&self, mime_type: &str) -> bool {
        match &self.accepted {
            Some(prefixes) => prefixes.iter().any(|p| mime_type.starts_with(p.as_str())),
            None => true,
        }
    }

    async fn upload(
        &self,
        name: &str,
        data: Bytes,
        opts: &UploadOptions,
    ) -> PithosResult<BlobHandle> {
        if !self.accepts(&opts.mime_type) {
            return Err(PithosError::PayloadRejected {
                backend: self.kind().to_string(),
                reason: format!("unsupported MIME type {}", opts.mime_type),
            });
        }

        self.insert_raw(name, data, &opts.mime_type);
        Ok(BlobHandle::owned(name, self.kind()))
    }

    async fn download(&self, handle: &BlobHandle) -> PithosResult<Option<Bytes>> {
        Ok(self.raw(&handle.id))
    }

    async fn delete(&self, handle: &BlobHandle) -> PithosResult<bool> {
        Ok(self.blobs.remove(&handle.id).is_some())
    }
}
