/// Steganographic wrapper backend
///
/// Wraps a media-only backend and makes it accept anything: payloads the
/// inner backend takes natively pass straight through, everything else is
/// encoded into a BMP carrier first and transparently decoded on the way
/// back. Whether a blob was encoded is discoverable from the blob itself
/// (carrier magic) with a name-suffix convention kept as a lookup hint,
/// not from out-of-band bookkeeping, since no other persistent store exists at
/// this layer.
use super::StorageBackend;
use crate::stego::StegoCodec;
use async_trait::async_trait;
use bytes::Bytes;
use pithos_core::{BackendKind, BlobHandle, PithosResult, UploadOptions};
use std::sync::Arc;
use tracing::debug;

/// Suffix appended to the stored name of encoded blobs.
pub const ENCODED_SUFFIX: &str = ".pst.bmp";

pub struct StegoBackend {
    inner: Arc<dyn StorageBackend>,
    codec: StegoCodec,
}

impl StegoBackend {
    pub fn wrap(inner: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner,
            codec: StegoCodec::new(),
        }
    }

    fn carrier_handle(&self, handle: &BlobHandle) -> BlobHandle {
        BlobHandle {
            id: format!("{}{}", handle.id, ENCODED_SUFFIX),
            backend: handle.backend,
        }
    }
}

#[async_trait]
impl StorageBackend for StegoBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn accepts(&self, _mime_type: &str) -> bool {
        true
    }

    async fn upload(
        &self,
        name: &str,
        data: Bytes,
        opts: &UploadOptions,
    ) -> PithosResult<BlobHandle> {
        if self.inner.accepts(&opts.mime_type) {
            return self.inner.upload(name, data, opts).await;
        }

        let carrier = self.codec.encode(&data)?;
        debug!(
            name,
            payload = data.len(),
            carrier = carrier.len(),
            "encoding payload into carrier image"
        );

        let carrier_opts = UploadOptions {
            mime_type: "image/bmp".to_string(),
            description: opts.description.clone(),
            // Re-compression by the host would corrupt the payload.
            original_quality: true,
        };
        let stored_name = format!("{}{}", name, ENCODED_SUFFIX);
        let handle = self
            .inner
            .upload(&stored_name, Bytes::from(carrier), &carrier_opts)
            .await?;

        // Callers keep addressing the blob by its logical name.
        Ok(BlobHandle {
            id: name.to_string(),
            backend: handle.backend,
        })
    }

    async fn download(&self, handle: &BlobHandle) -> PithosResult<Option<Bytes>> {
        if let Some(bytes) = self.inner.download(handle).await? {
            if self.codec.is_carrier(&bytes) {
                return Ok(Some(Bytes::from(self.codec.decode(&bytes)?)));
            }
            return Ok(Some(bytes));
        }

        // Encoded blobs live under the suffixed name.
        if let Some(bytes) = self.inner.download(&self.carrier_handle(handle)).await? {
            return Ok(Some(Bytes::from(self.codec.decode(&bytes)?)));
        }

        Ok(None)
    }

    async fn delete(&self, handle: &BlobHandle) -> PithosResult<bool> {
        if self.inner.delete(handle).await? {
            return Ok(true);
        }
        self.inner.delete(&self.carrier_handle(handle)).await
    }

    fn public_url(&self, handle: &BlobHandle) -> Option<String> {
        self.inner.public_url(handle)
    }
}
