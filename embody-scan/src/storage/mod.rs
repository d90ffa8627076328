//! Photo storage gateway client
//!
//! Photos are opaque to this service: bytes go to the storage gateway and a
//! reference comes back for the analysis stages to use. Content is never
//! decoded, inspected or logged here; log lines carry lengths only.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{CapturedPhoto, PhotoView};

const USER_AGENT: &str = concat!("embody-scan/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Storage gateway errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// Gateway returned a non-success status
    #[error("Storage API error {0}: {1}")]
    Api(u16, String),

    /// 2xx response without a usable reference id
    #[error("Storage response missing reference id")]
    MissingReference,

    /// Failed to decode the response body
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Handle to a stored photo
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoReference {
    /// Gateway-assigned identifier
    pub reference_id: String,
    pub view: PhotoView,
}

/// Where photo bytes go. The pipeline only ever sees references.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Store one photo, returning its reference
    async fn upload(
        &self,
        user_id: Uuid,
        photo: &CapturedPhoto,
    ) -> Result<PhotoReference, StorageError>;

    /// Remove a stored photo. Callers treat failures as best-effort.
    async fn delete(&self, reference: &PhotoReference) -> Result<(), StorageError>;
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    user_id: Uuid,
    view: PhotoView,
    /// Base64-encoded photo bytes
    data: &'a str,
}

#[derive(Default, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    reference_id: Option<String>,
}

/// Storage gateway client
pub struct HttpPhotoStore {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpPhotoStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, StorageError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| StorageError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PhotoStore for HttpPhotoStore {
    async fn upload(
        &self,
        user_id: Uuid,
        photo: &CapturedPhoto,
    ) -> Result<PhotoReference, StorageError> {
        let url = format!("{}/v1/photos", self.base_url);
        let encoded = general_purpose::STANDARD.encode(&photo.data);
        debug!(
            view = photo.view.as_str(),
            bytes = photo.data.len(),
            "uploading photo"
        );

        let response = self
            .http_client
            .post(&url)
            .json(&UploadRequest {
                user_id,
                view: photo.view,
                data: &encoded,
            })
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(StorageError::Api(status.as_u16(), error_text));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Parse(e.to_string()))?;

        match body.reference_id {
            Some(reference_id) if !reference_id.is_empty() => Ok(PhotoReference {
                reference_id,
                view: photo.view,
            }),
            _ => Err(StorageError::MissingReference),
        }
    }

    async fn delete(&self, reference: &PhotoReference) -> Result<(), StorageError> {
        let url = format!("{}/v1/photos/{}", self.base_url, reference.reference_id);

        let response = self
            .http_client
            .delete(&url)
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        let status = response.status();
        // Already gone is fine for cleanup purposes
        if !status.is_success() && status.as_u16() != 404 {
            warn!(
                reference_id = %reference.reference_id,
                status = status.as_u16(),
                "photo delete failed"
            );
            let error_text = response.text().await.unwrap_or_default();
            return Err(StorageError::Api(status.as_u16(), error_text));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
