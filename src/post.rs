use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::constants::{ARCHIVE_UTC_OFFSET_SECS, IMAGE_STATUS_FIELD, MISSING_SEQUENCE};

/// The fixed civil timezone archive dates are expressed in.
#[must_use]
pub fn archive_offset() -> FixedOffset {
    FixedOffset::east_opt(ARCHIVE_UTC_OFFSET_SECS).expect("Invalid archive offset")
}

/// Calendar date of an instant in the archive timezone.
#[must_use]
pub fn civil_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&archive_offset()).date_naive()
}

/// A stored post, as it appears in the archive file.
///
/// Fields the archiver does not know about are kept in `extra` so a file
/// written by another tool survives a load/save cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub date: NaiveDate,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub text: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Post {
    #[must_use]
    pub fn new(id: Option<i64>, date: NaiveDate, text: impl Into<String>) -> Self {
        Self {
            id,
            date,
            text: text.into(),
            image: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Secondary sort key: native id, or the fixed minimum when absent.
    #[must_use]
    pub fn sequence(&self) -> i64 {
        self.id.unwrap_or(MISSING_SEQUENCE)
    }

    /// Whether the post carries a usable hosted image URL.
    ///
    /// An empty string counts as missing.
    #[must_use]
    pub fn has_image(&self) -> bool {
        self.image.as_deref().is_some_and(|url| !url.trim().is_empty())
    }

    #[must_use]
    pub fn image_status(&self) -> Option<ImageStatus> {
        self.extra
            .get(IMAGE_STATUS_FIELD)
            .and_then(Value::as_str)
            .and_then(ImageStatus::parse)
    }

    pub fn set_image_status(&mut self, status: Option<ImageStatus>) {
        match status {
            Some(status) => {
                self.extra.insert(
                    IMAGE_STATUS_FIELD.to_string(),
                    Value::from(status.as_str()),
                );
            }
            None => {
                self.extra.remove(IMAGE_STATUS_FIELD);
            }
        }
    }

    /// Whether the repair pass should look this post up again.
    ///
    /// Posts the source already confirmed as photo-less or gone are skipped.
    #[must_use]
    pub fn needs_repair(&self) -> bool {
        self.id.is_some()
            && !self.has_image()
            && !matches!(
                self.image_status(),
                Some(ImageStatus::NoPhoto | ImageStatus::Retracted)
            )
    }
}

/// Why a post is stored without a hosted image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    /// The source reports no photo.
    NoPhoto,
    /// The message is no longer available upstream.
    Retracted,
    /// A photo exists but has not been hosted yet.
    Pending,
}

impl ImageStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoPhoto => "no_photo",
            Self::Retracted => "retracted",
            Self::Pending => "pending",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "no_photo" => Some(Self::NoPhoto),
            "retracted" => Some(Self::Retracted),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Source-native reference to a post's photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRef {
    pub url: String,
}

impl PhotoRef {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// A message as reported by the source, before enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPost {
    pub native_id: Option<i64>,
    pub instant: DateTime<Utc>,
    pub text: String,
    pub photo: Option<PhotoRef>,
}

impl RawPost {
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        civil_date(self.instant)
    }

    /// Build the storable post, attaching an image URL if one was obtained.
    #[must_use]
    pub fn to_post(&self, image: Option<String>) -> Post {
        Post {
            id: self.native_id,
            date: self.date(),
            text: self.text.clone(),
            image,
            extra: Map::new(),
        }
    }
}

/// One element of the archive file.
///
/// Entries that do not parse as a [`Post`] (most commonly a missing or
/// malformed `date`) are kept verbatim so they are never lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArchiveEntry {
    Post(Post),
    Unmatched(Value),
}

/// The ordered collection of archive entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Archive {
    pub entries: Vec<ArchiveEntry>,
}

impl Archive {
    #[must_use]
    pub fn from_posts(posts: impl IntoIterator<Item = Post>) -> Self {
        Self {
            entries: posts.into_iter().map(ArchiveEntry::Post).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn posts(&self) -> impl Iterator<Item = &Post> {
        self.entries.iter().filter_map(|entry| match entry {
            ArchiveEntry::Post(post) => Some(post),
            ArchiveEntry::Unmatched(_) => None,
        })
    }

    pub fn unmatched(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().filter_map(|entry| match entry {
            ArchiveEntry::Unmatched(value) => Some(value),
            ArchiveEntry::Post(_) => None,
        })
    }
}
