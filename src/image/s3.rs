//! S3-compatible image host (AWS S3, R2, MinIO).

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::region::Region;
use s3::Bucket;
use tracing::debug;
use url::Url;

use super::{ImageHost, UploadError};
use crate::config::Config;

/// Stores images as public objects in a bucket.
#[derive(Clone)]
pub struct S3Host {
    bucket: Box<Bucket>,
    prefix: String,
    public_base_url: Option<String>,
}

impl S3Host {
    /// Create a host from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket or credentials are missing or invalid.
    pub fn from_config(config: &Config) -> Result<Self, UploadError> {
        let bucket_name = config
            .s3_bucket
            .as_deref()
            .ok_or_else(|| UploadError::Misconfigured("S3_BUCKET is not set".to_string()))?;
        let access_key = config.aws_access_key_id.as_deref().ok_or_else(|| {
            UploadError::Misconfigured("AWS_ACCESS_KEY_ID is not set".to_string())
        })?;
        let secret_key = config.aws_secret_access_key.as_deref().ok_or_else(|| {
            UploadError::Misconfigured("AWS_SECRET_ACCESS_KEY is not set".to_string())
        })?;

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| UploadError::Misconfigured(format!("invalid S3 credentials: {e}")))?;

        let region = if let Some(ref endpoint) = config.s3_endpoint {
            Region::Custom {
                region: config.s3_region.clone(),
                endpoint: endpoint.clone(),
            }
        } else {
            config.s3_region.parse().unwrap_or(Region::UsEast1)
        };

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| UploadError::Misconfigured(format!("invalid S3 bucket: {e}")))?;

        // Use path-style for custom endpoints (MinIO, R2, etc.)
        let bucket = if config.s3_endpoint.is_some() {
            bucket.with_path_style()
        } else {
            bucket
        };

        Ok(Self {
            bucket,
            prefix: config.s3_prefix.clone(),
            public_base_url: config.s3_public_base_url.clone(),
        })
    }

    /// Object key for an uploaded file name.
    #[must_use]
    pub fn object_key(&self, file_name: &str) -> String {
        format!("{}{file_name}", self.prefix)
    }

    /// Public URL of an object.
    #[must_use]
    pub fn public_url(&self, key: &str) -> String {
        let base = self
            .public_base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}.s3.amazonaws.com", self.bucket.name()));
        public_url(&base, key)
    }
}

/// Join `key` onto `base`, percent-encoding each path segment.
fn public_url(base: &str, key: &str) -> String {
    match Url::parse(base) {
        Ok(mut url) if !url.cannot_be_a_base() => {
            if let Ok(mut path) = url.path_segments_mut() {
                path.pop_if_empty().extend(key.split('/'));
            }
            url.to_string()
        }
        _ => format!("{}/{key}", base.trim_end_matches('/')),
    }
}

#[async_trait]
impl ImageHost for S3Host {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        mime_type: &str,
    ) -> Result<String, UploadError> {
        let key = self.object_key(file_name);
        debug!(key = %key, content_type = %mime_type, "Uploading image to S3");

        let response = self
            .bucket
            .put_object_with_content_type(&key, &bytes, mime_type)
            .await
            .map_err(|e| UploadError::Transport {
                file_name: file_name.to_string(),
                source: Box::new(e),
            })?;

        let status = response.status_code();
        if matches!(status, 401 | 403) {
            return Err(UploadError::Misconfigured(format!(
                "S3 refused the credentials ({status})"
            )));
        }
        if !(200..300).contains(&status) {
            return Err(UploadError::Rejected {
                file_name: file_name.to_string(),
                message: format!("S3 returned status {status}"),
            });
        }

        Ok(self.public_url(&key))
    }
}

impl std::fmt::Debug for S3Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Host")
            .field("bucket", &self.bucket.name())
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
