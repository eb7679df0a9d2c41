//! Reader for the public web preview of a channel (`<base>/s/<channel>`).
//!
//! The preview lists about twenty messages per page, oldest first. Older
//! pages are reached with `?before=<id>`. Single messages are available from
//! the embed widget at `<base>/<channel>/<id>?embed=1`.

use std::sync::LazyLock;

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{BoxStream, StreamExt};
use regex::Regex;
use reqwest::StatusCode;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, warn};
use url::Url;

use super::{PostSource, SourceError};
use crate::config::Config;
use crate::post::{PhotoRef, RawPost};
use crate::window::DateWindow;

static BACKGROUND_URL: LazyLock<Regex> =
    LazyLock::new(|| {
        Regex::new(r#"url\(\s*['"]?([^'")]+)['"]?\s*\)"#).expect("Invalid background url regex")
    });

/// Messages parsed from one preview page.
#[derive(Debug, Default)]
pub struct ParsedPage {
    pub posts: Vec<RawPost>,
    /// Smallest native id on the page, including messages that were skipped.
    pub oldest_id: Option<i64>,
    /// Messages dropped because their publish time could not be read.
    pub skipped: usize,
}

/// Parse every message widget in a preview or embed page.
#[must_use]
pub fn parse_messages(html: &str) -> ParsedPage {
    let document = Html::parse_document(html);
    let message_selector =
        Selector::parse(".tgme_widget_message[data-post]").expect("Invalid selector");
    let time_selector =
        Selector::parse(".tgme_widget_message_date time[datetime]").expect("Invalid selector");
    let text_selector = Selector::parse(".tgme_widget_message_text").expect("Invalid selector");
    let photo_selector =
        Selector::parse(".tgme_widget_message_photo_wrap[style]").expect("Invalid selector");

    let mut page = ParsedPage::default();

    for message in document.select(&message_selector) {
        let native_id = message.value().attr("data-post").and_then(parse_post_id);
        if let Some(id) = native_id {
            page.oldest_id = Some(page.oldest_id.map_or(id, |oldest| oldest.min(id)));
        }

        let instant = message
            .select(&time_selector)
            .find_map(|time| time.value().attr("datetime"))
            .and_then(parse_instant);
        let Some(instant) = instant else {
            warn!(id = ?native_id, "Message has no readable publish time, skipping");
            page.skipped += 1;
            continue;
        };

        let text = message
            .select(&text_selector)
            .find(|element| !is_in_reply(element))
            .map(|element| element_text(&element))
            .unwrap_or_default();

        let photo = message
            .select(&photo_selector)
            .find(|element| !is_in_reply(element))
            .and_then(|element| element.value().attr("style"))
            .and_then(background_url)
            .map(PhotoRef::new);

        page.posts.push(RawPost {
            native_id,
            instant,
            text,
            photo,
        });
    }

    page
}

/// `"channel/123"` → `123`.
fn parse_post_id(data_post: &str) -> Option<i64> {
    data_post.rsplit('/').next()?.trim().parse().ok()
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|instant| instant.with_timezone(&Utc))
}

fn background_url(style: &str) -> Option<String> {
    BACKGROUND_URL
        .captures(style)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|url| !url.is_empty())
}

/// Check if an element belongs to the quoted message of a reply.
fn is_in_reply(element: &ElementRef) -> bool {
    let mut current = element.parent();

    while let Some(parent_node) = current {
        if let Some(parent_element) = parent_node.value().as_element() {
            if parent_element
                .classes()
                .any(|class| class == "tgme_widget_message_reply")
            {
                return true;
            }
        }
        current = parent_node.parent();
    }

    false
}

/// Visible text of a message body with `<br>` turned into newlines.
fn element_text(element: &ElementRef) -> String {
    let mut text = String::new();
    for node in element.descendants() {
        match node.value() {
            Node::Text(chunk) => text.push_str(chunk),
            Node::Element(inner) if inner.name() == "br" => text.push('\n'),
            _ => {}
        }
    }
    text.trim().to_string()
}

/// Reader for a channel's public web preview.
#[derive(Debug, Clone)]
pub struct TelegramWebSource {
    http: reqwest::Client,
    base_url: Url,
    channel: String,
    max_pages: usize,
}

impl TelegramWebSource {
    /// Create a reader for `channel` under `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an absolute http(s) URL.
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        channel: impl Into<String>,
        max_pages: usize,
    ) -> Result<Self, url::ParseError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase);
        }
        Ok(Self {
            http,
            base_url,
            channel: channel.into(),
            max_pages: max_pages.max(1),
        })
    }

    /// Create a reader from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `SOURCE_BASE_URL` is not a usable URL.
    pub fn from_config(http: reqwest::Client, config: &Config) -> Result<Self, url::ParseError> {
        Self::new(http, &config.source_base_url, &config.channel, config.max_pages)
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// URL of a preview page, optionally starting below `before`.
    #[must_use]
    pub fn channel_page_url(&self, before: Option<i64>) -> Url {
        let mut url = self.endpoint(&["s", self.channel.as_str()]);
        if let Some(before) = before {
            url.query_pairs_mut()
                .append_pair("before", &before.to_string());
        }
        url
    }

    /// URL of the embed widget for a single message.
    #[must_use]
    pub fn message_url(&self, id: i64) -> Url {
        let mut url = self.endpoint(&[self.channel.as_str(), id.to_string().as_str()]);
        url.query_pairs_mut()
            .append_pair("embed", "1")
            .append_pair("mode", "tme");
        url
    }

    /// Fetch a page body. `Ok(None)` on 404.
    async fn get_page(&self, url: &Url) -> Result<Option<String>, SourceError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| SourceError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| SourceError::Request {
                url: url.to_string(),
                source,
            })?;
        Ok(Some(body))
    }
}

#[async_trait]
impl PostSource for TelegramWebSource {
    fn list_recent(&self, window: DateWindow) -> BoxStream<'_, Result<RawPost, SourceError>> {
        try_stream! {
            let mut before: Option<i64> = None;
            let mut pages = 0usize;

            loop {
                if pages == self.max_pages {
                    Err::<(), SourceError>(SourceError::PageLimit {
                        pages,
                        start: window.start(),
                    })?;
                }
                pages += 1;

                let url = self.channel_page_url(before);
                debug!(url = %url, page = pages, "Fetching channel page");

                let html = self.get_page(&url).await?.ok_or_else(|| SourceError::Status {
                    url: url.to_string(),
                    status: StatusCode::NOT_FOUND.as_u16(),
                })?;
                let page = parse_messages(&html);

                let mut reached_start = page.posts.is_empty() && page.oldest_id.is_none();
                for post in page.posts {
                    let date = post.date();
                    if date < window.start() {
                        reached_start = true;
                    } else if window.contains(date) {
                        yield post;
                    }
                }

                if reached_start {
                    break;
                }

                match page.oldest_id {
                    Some(oldest) if oldest > 1 && before.map_or(true, |b| oldest < b) => {
                        before = Some(oldest);
                    }
                    _ => break,
                }
            }
        }
        .boxed()
    }

    async fn fetch_by_id(&self, id: i64) -> Result<Option<RawPost>, SourceError> {
        let url = self.message_url(id);
        debug!(url = %url, id, "Fetching single message");

        let Some(html) = self.get_page(&url).await? else {
            return Ok(None);
        };

        Ok(parse_messages(&html)
            .posts
            .into_iter()
            .find(|post| post.native_id == Some(id)))
    }

    async fn download_photo(&self, photo: &PhotoRef) -> Result<Vec<u8>, SourceError> {
        let url = self
            .base_url
            .join(&photo.url)
            .map_err(|e| SourceError::Parse {
                url: photo.url.clone(),
                message: format!("invalid photo URL: {e}"),
            })?;

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| SourceError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| SourceError::Request {
                url: url.to_string(),
                source,
            })?;
        if bytes.is_empty() {
            return Err(SourceError::Parse {
                url: url.to_string(),
                message: "empty photo body".to_string(),
            });
        }

        Ok(bytes.to_vec())
    }
}
