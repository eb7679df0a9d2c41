//! Permanent hosting for post images.
//!
//! An [`ImageHost`] takes image bytes and returns a durable public URL.
//! Ordinary failures (rejections, network errors) are per-image and leave the
//! post text-only. [`UploadError::Misconfigured`] means every upload would
//! fail the same way and aborts the run.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use tracing::info;

use crate::config::{Config, ImageHostKind};
use crate::constants::FILE_NAME_SNIPPET_CHARS;
use crate::post::PhotoRef;

pub mod imgbb;
pub mod s3;

pub use imgbb::ImgbbHost;
pub use s3::S3Host;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload of {file_name} rejected: {message}")]
    Rejected { file_name: String, message: String },
    #[error("upload of {file_name} failed: {source}")]
    Transport {
        file_name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("image host misconfigured: {0}")]
    Misconfigured(String),
}

impl UploadError {
    /// Whether the failure would repeat for every image.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Misconfigured(_))
    }
}

/// A service that stores image bytes under a permanent URL.
#[async_trait]
pub trait ImageHost: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Upload `bytes` and return the public URL.
    ///
    /// `file_name` is a hint for the host and carries no meaning here.
    async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        mime_type: &str,
    ) -> Result<String, UploadError>;
}

/// Build the configured image host, if any.
///
/// # Errors
///
/// Returns [`UploadError::Misconfigured`] if required host settings are missing.
pub fn host_from_config(
    config: &Config,
    http: reqwest::Client,
) -> Result<Option<Box<dyn ImageHost>>, UploadError> {
    let host: Box<dyn ImageHost> = match config.image_host {
        ImageHostKind::None => {
            info!("Image hosting disabled, archive will be text-only");
            return Ok(None);
        }
        ImageHostKind::Imgbb => Box::new(ImgbbHost::from_config(http, config)?),
        ImageHostKind::S3 => Box::new(S3Host::from_config(config)?),
    };
    info!(host = host.name(), "Image hosting enabled");
    Ok(Some(host))
}

/// File name sent to the host: `<date>_<id>[_<snippet>].<ext>`.
///
/// The snippet is the trimmed text with characters that are unsafe in file
/// names removed, whitespace turned into `_`, and capped at
/// [`FILE_NAME_SNIPPET_CHARS`] characters.
#[must_use]
pub fn image_file_name(date: NaiveDate, id: Option<i64>, text: &str, extension: &str) -> String {
    let snippet: String = text
        .trim()
        .chars()
        .filter_map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => None,
            c if c.is_whitespace() => Some('_'),
            c if c.is_control() => None,
            c => Some(c),
        })
        .take(FILE_NAME_SNIPPET_CHARS)
        .collect();

    let id = id.map_or_else(|| "noid".to_string(), |id| id.to_string());
    if snippet.is_empty() {
        format!("{date}_{id}.{extension}")
    } else {
        format!("{date}_{id}_{snippet}.{extension}")
    }
}

/// MIME type and file extension for a photo, guessed from its URL.
///
/// Falls back to JPEG, which is what the channel preview serves.
#[must_use]
pub fn photo_media_type(photo: &PhotoRef) -> (String, String) {
    let path = url::Url::parse(&photo.url)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| photo.url.clone());

    let guessed = mime_guess::from_path(&path)
        .first()
        .filter(|mime| mime.type_() == mime_guess::mime::IMAGE);
    let extension = std::path::Path::new(&path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match (guessed, extension) {
        (Some(mime), Some(extension)) => (mime.essence_str().to_string(), extension),
        _ => ("image/jpeg".to_string(), "jpg".to_string()),
    }
}
