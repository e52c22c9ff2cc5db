//! Storage backend implementations
//!
//! Each physical service implements one capability trait: store a named
//! blob, fetch bytes back by handle, optionally delete. Absence ("this
//! handle is unknown here") is a normal outcome, not an error: the fabric
//! probes backends and relies on `Ok(None)` to keep looking.

mod bot_channel;
mod memory;
mod photo_host;
mod stego_backend;
mod video_host;

pub use bot_channel::BotChannelBackend;
pub use memory::MemoryBackend;
pub use photo_host::PhotoApiBackend;
pub use stego_backend::{StegoBackend, ENCODED_SUFFIX};
pub use video_host::VideoHostBackend;

use async_trait::async_trait;
use bytes::Bytes;
use pithos_core::{BackendKind, BlobHandle, PithosError, PithosResult, UploadOptions};
use reqwest::StatusCode;

/// Capability interface over one physical blob service.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether this backend natively accepts the given MIME type. The
    /// fabric treats a refusal like a rejected payload and rotates on.
    fn accepts(&self, mime_type: &str) -> bool;

    async fn upload(
        &self,
        name: &str,
        data: Bytes,
        opts: &UploadOptions,
    ) -> PithosResult<BlobHandle>;

    /// `Ok(None)` means the handle is unknown to this backend.
    async fn download(&self, handle: &BlobHandle) -> PithosResult<Option<Bytes>>;

    async fn delete(&self, handle: &BlobHandle) -> PithosResult<bool> {
        let _ = handle;
        Ok(false)
    }

    /// Best-effort direct URL; backends without public links return None.
    fn public_url(&self, handle: &BlobHandle) -> Option<String> {
        let _ = handle;
        None
    }
}

/// Map a reqwest transport failure onto the error taxonomy. Anything the
/// network layer throws (timeouts, DNS, TLS, connection resets) means the
/// backend is unavailable right now.
pub(crate) fn transport_error(kind: BackendKind, err: reqwest::Error) -> PithosError {
    let reason = if err.is_timeout() {
        "request timed out".to_string()
    } else {
        err.to_string()
    };
    PithosError::BackendUnavailable {
        backend: kind.to_string(),
        reason,
    }
}

/// Map a non-success HTTP status onto the error taxonomy. Payload-shaped
/// refusals (too large, unsupported type, quota) must not be retried on
/// the same backend; everything else counts as unavailable.
pub(crate) fn status_error(kind: BackendKind, status: StatusCode, body: &str) -> PithosError {
    let reason = format!("HTTP {}: {}", status.as_u16(), body.trim());
    match status {
        StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNSUPPORTED_MEDIA_TYPE
        | StatusCode::UNPROCESSABLE_ENTITY
        | StatusCode::TOO_MANY_REQUESTS => PithosError::PayloadRejected {
            backend: kind.to_string(),
            reason,
        },
        _ => PithosError::BackendUnavailable {
            backend: kind.to_string(),
            reason,
        },
    }
}

/// Shared reqwest client construction; the transport-level timeout backs
/// up the fabric's own per-call timeout.
pub(crate) fn build_client(timeout: std::time::Duration) -> PithosResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PithosError::Configuration(format!("failed to build HTTP client: {}", e)))
}
