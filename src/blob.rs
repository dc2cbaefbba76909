use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ChatError;

/// Upload/download of file-bearing message content.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the file under `object_id` and returns its public URL.
    async fn upload(&self, object_id: &str, local_path: &Path) -> Result<String, ChatError>;

    /// Fetches `url` into `dest` unless `dest` already exists.
    async fn download_if_absent(&self, url: &str, dest: &Path) -> Result<(), ChatError>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

/// Blob store speaking plain HTTP: `PUT {base}/files/{objectId}` answers `{"url": ...}`.
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn upload_url(&self, object_id: &str) -> String {
        format!("{}/files/{}", self.base_url, object_id)
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(&self, object_id: &str, local_path: &Path) -> Result<String, ChatError> {
        let bytes = tokio::fs::read(local_path).await?;
        let response = self
            .client
            .put(self.upload_url(object_id))
            .body(bytes)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| ChatError::Transport(format!("upload {object_id}: {err}")))?;
        let body: UploadResponse = response
            .json()
            .await
            .map_err(|err| ChatError::Decode(format!("upload response: {err}")))?;
        log::debug!("Uploaded {} as {}", local_path.display(), body.url);
        Ok(body.url)
    }

    async fn download_if_absent(&self, url: &str, dest: &Path) -> Result<(), ChatError> {
        if tokio::fs::try_exists(dest).await? {
            return Ok(());
        }
        let bytes = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| ChatError::SideContentFetch(format!("{url}: {err}")))?
            .bytes()
            .await
            .map_err(|err| ChatError::SideContentFetch(format!("{url}: {err}")))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = dest.with_extension("part");
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, dest).await?;
        log::debug!("Downloaded {url} to {}", dest.display());
        Ok(())
    }
}
