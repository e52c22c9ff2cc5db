/// Storage fabric: one upload/download surface over N backends
///
/// Uploads rotate round-robin across the configured backends and fall
/// over, in fixed order, past backends that are unavailable or reject the
/// payload; only when every backend has been tried does the failure
/// surface. Downloads try the recorded owner first and probe the rest,
/// returning `None` only after a full miss. The handle→backend map and
/// the rotation cursor are process-local: losing them costs probe work
/// and distribution balance, never correctness.
use crate::backend::{
    BotChannelBackend, PhotoApiBackend, StegoBackend, StorageBackend, VideoHostBackend,
};
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use pithos_core::{
    BackendKind, BlobHandle, Config, PithosError, PithosResult, StoredBlob, UploadOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct StorageFabric {
    backends: Vec<Arc<dyn StorageBackend>>,
    rotation: AtomicUsize,
    locations: DashMap<String, BackendKind>,
    timeout: Duration,
}

impl StorageFabric {
    pub fn new(
        backends: Vec<Arc<dyn StorageBackend>>,
        timeout: Duration,
    ) -> PithosResult<Self> {
        if backends.is_empty() {
            return Err(PithosError::Configuration(
                "at least one storage backend is required".to_string(),
            ));
        }
        Ok(Self {
            backends,
            rotation: AtomicUsize::new(0),
            locations: DashMap::new(),
            timeout,
        })
    }

    /// Build the production fabric from configuration: bot channel and
    /// video host as-is, the photo API wrapped with the steganographic
    /// codec so it can carry arbitrary payloads.
    pub fn from_config(config: &Config) -> PithosResult<Self> {
        let timeout = config.tuning.request_timeout();
        let mut backends: Vec<Arc<dyn StorageBackend>> = Vec::new();

        if let Some(bot) = &config.bot_channel {
            backends.push(Arc::new(BotChannelBackend::new(bot.clone(), timeout)?));
        }
        if let Some(video) = &config.video_host {
            backends.push(Arc::new(VideoHostBackend::new(video.clone(), timeout)?));
        }
        if let Some(photo) = &config.photo_host {
            let inner = Arc::new(PhotoApiBackend::new(photo.clone(), timeout)?);
            backends.push(Arc::new(StegoBackend::wrap(inner)));
        }

        Self::new(backends, timeout)
    }

    pub fn backend_kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    /// Store a named blob on the next backend in rotation, falling over
    /// to the remaining backends in fixed order. At most one attempt per
    /// backend; exhaustion surfaces `AllBackendsFailed` carrying the last
    /// underlying error.
    pub async fn upload_file(
        &self,
        name: &str,
        data: Bytes,
        opts: &UploadOptions,
    ) -> PithosResult<StoredBlob> {
        let count = self.backends.len();
        let start = self.rotation.fetch_add(1, Ordering::Relaxed) % count;
        let mut last_err = None;

        for attempt in 0..count {
            let backend = &self.backends[(start + attempt) % count];
            let kind = backend.kind();

            if !backend.accepts(&opts.mime_type) {
                debug!(%kind, mime = %opts.mime_type, "backend does not take this payload type");
                last_err = Some(PithosError::PayloadRejected {
                    backend: kind.to_string(),
                    reason: format!("does not accept {}", opts.mime_type),
                });
                continue;
            }

            match tokio::time::timeout(self.timeout, backend.upload(name, data.clone(), opts))
                .await
            {
                Err(_) => {
                    warn!(%kind, name, "upload timed out, rotating to next backend");
                    last_err = Some(PithosError::BackendUnavailable {
                        backend: kind.to_string(),
                        reason: format!("no response within {:?}", self.timeout),
                    });
                }
                Ok(Err(err)) if err.is_transient() => {
                    warn!(%kind, name, %err, "upload failed, rotating to next backend");
                    last_err = Some(err);
                }
                Ok(Err(err)) => return Err(err),
                Ok(Ok(handle)) => {
                    let previous = self.locations.insert(handle.id.clone(), kind);
                    if let Some(old) = previous.filter(|old| *old != kind) {
                        self.scrub_stale_copy(&handle, old).await;
                    }
                    debug!(%kind, name, size = data.len(), "stored blob");
                    return Ok(StoredBlob {
                        handle,
                        backend: kind,
                        size: data.len(),
                        mime_type: opts.mime_type.clone(),
                        uploaded_at: Utc::now(),
                    });
                }
            }
        }

        let last = last_err.unwrap_or_else(|| PithosError::BackendUnavailable {
            backend: "fabric".to_string(),
            reason: "no backend accepted the upload".to_string(),
        });
        Err(PithosError::AllBackendsFailed {
            attempts: count,
            last: Box::new(last),
        })
    }

    /// Fetch a blob, trying the recorded (or handle-tagged) owner first
    /// and every other backend in fixed order after it. `Ok(None)` means
    /// every backend was tried and none knows the handle, which is
    /// legitimate absence, distinct from a hard failure.
    pub async fn download_file_by_id(&self, handle: &BlobHandle) -> PithosResult<Option<Bytes>> {
        for index in self.probe_order(handle) {
            let backend = &self.backends[index];
            let kind = backend.kind();

            match tokio::time::timeout(self.timeout, backend.download(handle)).await {
                Err(_) => {
                    warn!(%kind, id = %handle.id, "download timed out, probing next backend");
                }
                Ok(Err(err)) if err.is_transient() => {
                    warn!(%kind, id = %handle.id, %err, "download failed, probing next backend");
                }
                // Corruption is surfaced, never papered over by probing on.
                Ok(Err(err)) => return Err(err),
                Ok(Ok(None)) => {}
                Ok(Ok(Some(bytes))) => {
                    self.locations.insert(handle.id.clone(), kind);
                    return Ok(Some(bytes));
                }
            }
        }

        Ok(None)
    }

    /// Delete a blob wherever it lives. Returns whether any backend
    /// actually removed something.
    pub async fn delete_file(&self, handle: &BlobHandle) -> PithosResult<bool> {
        for index in self.probe_order(handle) {
            let backend = &self.backends[index];
            let kind = backend.kind();

            match tokio::time::timeout(self.timeout, backend.delete(handle)).await {
                Err(_) => {
                    warn!(%kind, id = %handle.id, "delete timed out, probing next backend");
                }
                Ok(Err(err)) if err.is_transient() => {
                    warn!(%kind, id = %handle.id, %err, "delete failed, probing next backend");
                }
                Ok(Err(err)) => return Err(err),
                Ok(Ok(false)) => {}
                Ok(Ok(true)) => {
                    self.locations.remove(&handle.id);
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    /// Best-effort direct URL from the owning backend. `None` whenever
    /// the owner is unknown or has no public links.
    pub fn get_file_url(&self, handle: &BlobHandle) -> Option<String> {
        let owner = self.owner_of(handle)?;
        self.backends
            .iter()
            .find(|b| b.kind() == owner)
            .and_then(|b| b.public_url(handle))
    }

    /// A rewritten name just moved to a different backend; delete the
    /// old copy so later probes cannot resurrect a stale version.
    /// Best-effort only.
    async fn scrub_stale_copy(&self, handle: &BlobHandle, old: BackendKind) {
        let stale = match self.backends.iter().find(|b| b.kind() == old) {
            Some(backend) => backend,
            None => return,
        };
        match tokio::time::timeout(self.timeout, stale.delete(handle)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                debug!(backend = %old, id = %handle.id, %err, "could not scrub stale copy")
            }
            Err(_) => {
                debug!(backend = %old, id = %handle.id, "stale copy scrub timed out")
            }
        }
    }

    fn owner_of(&self, handle: &BlobHandle) -> Option<BackendKind> {
        self.locations
            .get(&handle.id)
            .map(|entry| *entry.value())
            .or(handle.backend)
    }

    /// Owner first (when known), then the rest in configuration order.
    fn probe_order(&self, handle: &BlobHandle) -> Vec<usize> {
        let owner_index = self
            .owner_of(handle)
            .and_then(|owner| self.backends.iter().position(|b| b.kind() == owner));

        let mut order = Vec::with_capacity(self.backends.len());
        if let Some(index) = owner_index {
            order.push(index);
        }
        order.extend((0..self.backends.len()).filter(|i| Some(*i) != owner_index));
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use async_trait::async_trait;

    /// Backend that always fails uploads and downloads with a transient error.
    struct UnavailableBackend {
        kind: BackendKind,
    }

    #[async_trait]
    impl StorageBackend for UnavailableBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn accepts(&self, _mime_type: &str) -> bool {
            true
        }

        async fn upload(
            &self,
            _name: &str,
            _data: Bytes,
            _opts: &UploadOptions,
        ) -> PithosResult<BlobHandle> {
            Err(PithosError::BackendUnavailable {
                backend: self.kind.to_string(),
                reason: "always down".to_string(),
            })
        }

        async fn download(&self, _handle: &BlobHandle) -> PithosResult<Option<Bytes>> {
            Err(PithosError::BackendUnavailable {
                backend: self.kind.to_string(),
                reason: "always down".to_string(),
            })
        }
    }

    /// Backend that never answers within any timeout.
    struct HangingBackend;

    #[async_trait]
    impl StorageBackend for HangingBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::VideoHost
        }

        fn accepts(&self, _mime_type: &str) -> bool {
            true
        }

        async fn upload(
            &self,
            _name: &str,
            _data: Bytes,
            _opts: &UploadOptions,
        ) -> PithosResult<BlobHandle> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }

        async fn download(&self, _handle: &BlobHandle) -> PithosResult<Option<Bytes>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }
    }

    fn memory_trio() -> (Arc<MemoryBackend>, Arc<MemoryBackend>, Arc<MemoryBackend>) {
        (
            Arc::new(MemoryBackend::with_kind(BackendKind::BotChannel)),
            Arc::new(MemoryBackend::with_kind(BackendKind::VideoHost)),
            Arc::new(MemoryBackend::with_kind(BackendKind::PhotoHost)),
        )
    }

    #[tokio::test]
    async fn test_round_robin_distribution() {
        let (a, b, c) = memory_trio();
        let fabric = StorageFabric::new(
            vec![a.clone(), b.clone(), c.clone()],
            Duration::from_secs(1),
        )
        .unwrap();

        for i in 0..6 {
            fabric
                .upload_file(
                    &format!("blob-{}", i),
                    Bytes::from_static(b"data"),
                    &UploadOptions::default(),
                )
                .await
                .unwrap();
        }

        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
        assert_eq!(c.len(), 2);
    }

    #[tokio::test]
    async fn test_fallback_past_failing_backend() {
        let healthy = Arc::new(MemoryBackend::with_kind(BackendKind::PhotoHost));
        let fabric = StorageFabric::new(
            vec![
                Arc::new(UnavailableBackend {
                    kind: BackendKind::BotChannel,
                }),
                healthy.clone(),
            ],
            Duration::from_secs(1),
        )
        .unwrap();

        // Both rotation slots end up on the healthy backend.
        for i in 0..2 {
            let stored = fabric
                .upload_file(
                    &format!("blob-{}", i),
                    Bytes::from_static(b"data"),
                    &UploadOptions::default(),
                )
                .await
                .unwrap();
            assert_eq!(stored.backend, BackendKind::PhotoHost);
        }
        assert_eq!(healthy.len(), 2);
    }

    #[tokio::test]
    async fn test_mime_rejection_rotates_on() {
        let video_only =
            Arc::new(MemoryBackend::with_kind(BackendKind::VideoHost).accepting(&["video/"]));
        let open = Arc::new(MemoryBackend::with_kind(BackendKind::BotChannel));
        let fabric = StorageFabric::new(vec![video_only, open.clone()], Duration::from_secs(1))
            .unwrap();

        for i in 0..4 {
            fabric
                .upload_file(
                    &format!("t-{}", i),
                    Bytes::from_static(b"json"),
                    &UploadOptions::mime("application/gzip"),
                )
                .await
                .unwrap();
        }

        // The video-only backend never takes a gzip payload.
        assert_eq!(open.len(), 4);
    }

    #[tokio::test]
    async fn test_all_backends_failed() {
        let fabric = StorageFabric::new(
            vec![
                Arc::new(UnavailableBackend {
                    kind: BackendKind::BotChannel,
                }),
                Arc::new(UnavailableBackend {
                    kind: BackendKind::VideoHost,
                }),
            ],
            Duration::from_secs(1),
        )
        .unwrap();

        let err = fabric
            .upload_file("blob", Bytes::from_static(b"x"), &UploadOptions::default())
            .await
            .unwrap_err();

        match err {
            PithosError::AllBackendsFailed { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(last.is_transient());
            }
            other => panic!("expected AllBackendsFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_download_probes_past_unavailable_owner() {
        let (a, b, c) = memory_trio();
        let fabric = StorageFabric::new(
            vec![a.clone(), b.clone(), c.clone()],
            Duration::from_secs(1),
        )
        .unwrap();

        let stored = fabric
            .upload_file("blob", Bytes::from_static(b"payload"), &UploadOptions::default())
            .await
            .unwrap();

        // A fresh fabric (restart) with a failing first backend still
        // resolves the untagged handle by probing.
        let fabric2 = StorageFabric::new(
            vec![
                Arc::new(UnavailableBackend {
                    kind: BackendKind::Memory,
                }),
                a,
                b,
                c,
            ],
            Duration::from_secs(1),
        )
        .unwrap();

        let bytes = fabric2
            .download_file_by_id(&BlobHandle::named(stored.handle.id.clone()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bytes, Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn test_download_full_miss_is_none() {
        let (a, b, c) = memory_trio();
        let fabric =
            StorageFabric::new(vec![a, b, c], Duration::from_secs(1)).unwrap();

        let missing = fabric
            .download_file_by_id(&BlobHandle::named("never-uploaded"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_timeout_counts_as_unavailable() {
        let healthy = Arc::new(MemoryBackend::with_kind(BackendKind::BotChannel));
        let fabric = StorageFabric::new(
            vec![Arc::new(HangingBackend), healthy.clone()],
            Duration::from_millis(50),
        )
        .unwrap();

        let stored = fabric
            .upload_file("blob", Bytes::from_static(b"x"), &UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(stored.backend, BackendKind::BotChannel);
    }

    #[tokio::test]
    async fn test_rewrite_scrubs_the_stale_copy() {
        let (a, b, _) = memory_trio();
        let fabric = StorageFabric::new(vec![a.clone(), b.clone()], Duration::from_secs(1))
            .unwrap();
        let opts = UploadOptions::default();

        // Rotation carries the rewritten name from a to b; the copy on a
        // must not survive to answer a later probe with stale bytes.
        fabric
            .upload_file("table_x", Bytes::from_static(b"v1"), &opts)
            .await
            .unwrap();
        fabric
            .upload_file("table_x", Bytes::from_static(b"v2"), &opts)
            .await
            .unwrap();

        assert!(a.raw("table_x").is_none());
        assert_eq!(b.raw("table_x").unwrap(), Bytes::from_static(b"v2"));
    }

    #[tokio::test]
    async fn test_delete_and_url() {
        let (a, b, c) = memory_trio();
        let fabric = StorageFabric::new(vec![a, b, c], Duration::from_secs(1)).unwrap();

        let stored = fabric
            .upload_file("blob", Bytes::from_static(b"x"), &UploadOptions::default())
            .await
            .unwrap();

        // Memory backends expose no public URLs.
        assert!(fabric.get_file_url(&stored.handle).is_none());

        assert!(fabric.delete_file(&stored.handle).await.unwrap());
        assert!(!fabric.delete_file(&stored.handle).await.unwrap());
        assert!(fabric
            .download_file_by_id(&stored.handle)
            .await
            .unwrap()
            .is_none());
    }
}
