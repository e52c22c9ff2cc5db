/// Photo-hosting API backend
///
/// Accepts image and video media only; anything else must be wrapped by
/// the steganographic layer before it gets here. Uploads request the
/// original-quality storage class so carriers survive byte-exact.
use super::{build_client, status_error, transport_error, StorageBackend};
use async_trait::async_trait;
use bytes::Bytes;
use pithos_core::{
    BackendKind, BlobHandle, PhotoHostConfig, PithosError, PithosResult, UploadOptions,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct UploadedPhoto {
    id: String,
}

pub struct PhotoApiBackend {
    client: Client,
    config: PhotoHostConfig,
}

impl PhotoApiBackend {
    pub fn new(config: PhotoHostConfig, timeout: Duration) -> PithosResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            config,
        })
    }

    fn endpoint(&self, rest: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), rest)
    }
}

#[async_trait]
impl StorageBackend for PhotoApiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::PhotoHost
    }

    fn accepts(&self, mime_type: &str) -> bool {
        mime_type.starts_with("image/") || mime_type.starts_with("video/")
    }

    async fn upload(
        &self,
        name: &str,
        data: Bytes,
        opts: &UploadOptions,
    ) -> PithosResult<BlobHandle> {
        let kind = self.kind();
        if !self.accepts(&opts.mime_type) {
            return Err(PithosError::PayloadRejected {
                backend: kind.to_string(),
                reason: format!("only media payloads are accepted, got {}", opts.mime_type),
            });
        }

        let part = Part::bytes(data.to_vec())
            .file_name(name.to_string())
            .mime_str(&opts.mime_type)
            .map_err(|e| PithosError::PayloadRejected {
                backend: kind.to_string(),
                reason: format!("invalid MIME type {}: {}", opts.mime_type, e),
            })?;

        let mut form = Form::new()
            .text("title", name.to_string())
            .text("original", opts.original_quality.to_string())
            .part("file", part);
        if let Some(album) = &self.config.album_id {
            form = form.text("album_id", album.clone());
        }
        if let Some(description) = &opts.description {
            form = form.text("description", description.clone());
        }

        let response = self
            .client
            .post(self.endpoint("photos"))
            .header("X-Api-Key", &self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(kind, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(kind, status, &body));
        }

        let uploaded: UploadedPhoto = response
            .json()
            .await
            .map_err(|e| transport_error(kind, e))?;
        debug!(name, remote_id = %uploaded.id, "uploaded photo");

        Ok(BlobHandle::owned(name, kind))
    }

    async fn download(&self, handle: &BlobHandle) -> PithosResult<Option<Bytes>> {
        let kind = self.kind();
        let response = self
            .client
            .get(self.endpoint(&format!("photos/{}/original", handle.id)))
            .header("X-Api-Key", &self.config.api_key)
            .send()
            .await
            .map_err(|e| transport_error(kind, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response.bytes().await.map_err(|e| transport_error(kind, e))?;
                Ok(Some(bytes))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(status_error(kind, status, &body))
            }
        }
    }

    async fn delete(&self, handle: &BlobHandle) -> PithosResult<bool> {
        let kind = self.kind();
        let response = self
            .client
            .delete(self.endpoint(&format!("photos/{}", handle.id)))
            .header("X-Api-Key", &self.config.api_key)
            .send()
            .await
            .map_err(|e| transport_error(kind, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(status_error(kind, status, &body))
            }
        }
    }

    fn public_url(&self, handle: &BlobHandle) -> Option<String> {
        Some(self.endpoint(&format!("photos/{}", handle.id)))
    }
}
