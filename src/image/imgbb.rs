//! ImgBB upload client.

use async_trait::async_trait;
use reqwest::{multipart, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{ImageHost, UploadError};
use crate::config::Config;

/// ImgBB API response for an upload.
#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    success: bool,
    data: Option<UploadData>,
    error: Option<UploadErrorBody>,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    url: String,
}

#[derive(Debug, Deserialize)]
struct UploadErrorBody {
    message: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

/// ImgBB error code for an unknown or revoked API key, sent with HTTP 400.
const INVALID_KEY_CODE: i64 = 100;

/// Uploads images to ImgBB.
#[derive(Clone)]
pub struct ImgbbHost {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl ImgbbHost {
    #[must_use]
    pub fn new(http: reqwest::Client, api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_url: api_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `IMGBB_API_KEY` is not set.
    pub fn from_config(http: reqwest::Client, config: &Config) -> Result<Self, UploadError> {
        let api_key = config
            .imgbb_api_key
            .clone()
            .ok_or_else(|| UploadError::Misconfigured("IMGBB_API_KEY is not set".to_string()))?;
        Ok(Self::new(http, config.imgbb_api_url.clone(), api_key))
    }
}

#[async_trait]
impl ImageHost for ImgbbHost {
    fn name(&self) -> &'static str {
        "imgbb"
    }

    async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        mime_type: &str,
    ) -> Result<String, UploadError> {
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .map_err(|e| UploadError::Misconfigured(format!("invalid MIME type {mime_type}: {e}")))?;
        let form = multipart::Form::new().part("image", part);

        debug!(url = %self.api_url, file_name = %file_name, "Uploading image to ImgBB");

        let response = self
            .http
            .post(&self.api_url)
            .query(&[("key", self.api_key.as_str())])
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Transport {
                file_name: file_name.to_string(),
                source: Box::new(e),
            })?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(UploadError::Misconfigured(format!(
                "ImgBB refused the API key ({status})"
            )));
        }

        let body = response.text().await.map_err(|e| UploadError::Transport {
            file_name: file_name.to_string(),
            source: Box::new(e),
        })?;

        // ImgBB reports most failures as JSON with success=false, whatever the status
        let parsed: Option<UploadResponse> = serde_json::from_str(&body).ok();
        match parsed {
            Some(UploadResponse {
                success: true,
                data: Some(data),
                ..
            }) if status.is_success() => Ok(data.url),
            Some(UploadResponse {
                error: Some(UploadErrorBody {
                    code: Some(INVALID_KEY_CODE),
                    message,
                }),
                ..
            }) => Err(UploadError::Misconfigured(format!(
                "ImgBB refused the API key: {}",
                message.as_deref().unwrap_or("invalid key")
            ))),
            Some(parsed) => Err(UploadError::Rejected {
                file_name: file_name.to_string(),
                message: parsed
                    .error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| format!("status {status}")),
            }),
            None => Err(UploadError::Rejected {
                file_name: file_name.to_string(),
                message: format!("status {status}, unreadable response body"),
            }),
        }
    }
}

impl std::fmt::Debug for ImgbbHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImgbbHost")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}
