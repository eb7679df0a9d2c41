//! Readers for the channel being archived.
//!
//! A [`PostSource`] yields the raw messages of a date window, can look a single
//! message up again by its native id, and downloads photo bytes. The HTTP
//! client it uses is created and owned by the caller.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::constants::ARCHIVAL_USER_AGENT;
use crate::post::{PhotoRef, RawPost};
use crate::window::DateWindow;

pub mod telegram_web;

pub use telegram_web::TelegramWebSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("unexpected response from {url}: {message}")]
    Parse { url: String, message: String },
    #[error("stopped after {pages} pages before reaching {start}; raise MAX_PAGES to read further back")]
    PageLimit {
        pages: usize,
        start: chrono::NaiveDate,
    },
}

/// Producer of raw channel messages.
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Stream every message published inside `window`.
    ///
    /// The stream is finite. An `Err` item means the window could not be read
    /// completely; it is never used to signal an empty window.
    fn list_recent(&self, window: DateWindow) -> BoxStream<'_, Result<RawPost, SourceError>>;

    /// Look a message up again by native id.
    ///
    /// Returns `Ok(None)` when the message no longer exists upstream.
    async fn fetch_by_id(&self, id: i64) -> Result<Option<RawPost>, SourceError>;

    /// Download the bytes of a photo reported by this source.
    async fn download_photo(&self, photo: &PhotoRef) -> Result<Vec<u8>, SourceError>;
}

/// Build the HTTP client shared by the source reader and the image hosts.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(ARCHIVAL_USER_AGENT)
        .gzip(true)
        .build()
}
