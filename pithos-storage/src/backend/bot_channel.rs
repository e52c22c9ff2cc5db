/// Chat-bot file channel backend
///
/// Stores blobs as file attachments posted by a bot into a dedicated
/// channel. The channel accepts any payload type and addresses files by
/// the logical name they were posted under; re-posting a name appends a
/// new revision and downloads resolve to the latest one.
use super::{build_client, status_error, transport_error, StorageBackend};
use async_trait::async_trait;
use bytes::Bytes;
use pithos_core::{
    BackendKind, BlobHandle, BotChannelConfig, PithosError, PithosResult, UploadOptions,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct PostedFile {
    id: String,
}

pub struct BotChannelBackend {
    client: Client,
    config: BotChannelConfig,
}

impl BotChannelBackend {
    pub fn new(config: BotChannelConfig, timeout: Duration) -> PithosResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            config,
        })
    }

    fn endpoint(&self, rest: &str) -> String {
        format!(
            "{}/channels/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.channel_id,
            rest
        )
    }
}

#[async_trait]
impl StorageBackend for BotChannelBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::BotChannel
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
        let kind = self.kind();
        let part = Part::bytes(data.to_vec())
            .file_name(name.to_string())
            .mime_str(&opts.mime_type)
            .map_err(|e| PithosError::PayloadRejected {
                backend: kind.to_string(),
                reason: format!("invalid MIME type {}: {}", opts.mime_type, e),
            })?;

        let mut form = Form::new().text("name", name.to_string()).part("file", part);
        if let Some(description) = &opts.description {
            form = form.text("description", description.clone());
        }

        let response = self
            .client
            .post(self.endpoint("files"))
            .bearer_auth(&self.config.bot_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(kind, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(kind, status, &body));
        }

        let posted: PostedFile = response
            .json()
            .await
            .map_err(|e| transport_error(kind, e))?;
        debug!(name, remote_id = %posted.id, "posted file to bot channel");

        Ok(BlobHandle::owned(name, kind))
    }

    async fn download(&self, handle: &BlobHandle) -> PithosResult<Option<Bytes>> {
        let kind = self.kind();
        let response = self
            .client
            .get(self.endpoint(&format!("files/{}/content", handle.id)))
            .bearer_auth(&self.config.bot_token)
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
            .delete(self.endpoint(&format!("files/{}", handle.id)))
            .bearer_auth(&self.config.bot_token)
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

    // Channel attachments sit behind bot auth; there is no public URL.
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_backend() -> BotChannelBackend {
        BotChannelBackend::new(
            BotChannelConfig {
                api_base: "https://bots.example.test/api/".to_string(),
                bot_token: "token".to_string(),
                channel_id: "store-1".to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let backend = test_backend();
        assert_eq!(
            backend.endpoint("files"),
            "https://bots.example.test/api/channels/store-1/files"
        );
    }

    #[test]
    fn test_accepts_everything() {
        let backend = test_backend();
        assert!(backend.accepts("application/gzip"));
        assert!(backend.accepts("video/mp4"));
        assert!(backend.public_url(&BlobHandle::named("x")).is_none());
    }
}
