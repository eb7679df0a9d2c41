//! Post identity and archive ordering.
//!
//! Two posts are the same real-world message when they share a publish date
//! and the first [`TEXT_KEY_CHARS`] characters of their trimmed text. This is
//! an approximate match, not a hash: posts that only diverge after a long
//! shared prefix collapse into one. Posts with no text fall back to the
//! source-native id, since an empty text key would join every empty post of
//! the same day.

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;

use crate::constants::TEXT_KEY_CHARS;
use crate::post::Post;

/// Key used to recognise the same post across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identity {
    /// Publish date plus text prefix.
    Content { date: NaiveDate, key: String },
    /// Source-native message number, used only for posts without text.
    Native(i64),
}

impl Identity {
    #[must_use]
    pub fn of(post: &Post) -> Self {
        Self::from_parts(post.id, post.date, &post.text)
    }

    #[must_use]
    pub fn from_parts(id: Option<i64>, date: NaiveDate, text: &str) -> Self {
        let key = text_key(text);
        match id {
            Some(id) if key.is_empty() => Self::Native(id),
            _ => Self::Content { date, key },
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Content { date, key } => write!(f, "{date}/{key:?}"),
            Self::Native(id) => write!(f, "#{id}"),
        }
    }
}

/// Text part of the content identity.
///
/// Taken after trimming the ends but before anything touches internal
/// newlines, and counted in characters rather than bytes.
#[must_use]
pub fn text_key(text: &str) -> String {
    text.trim().chars().take(TEXT_KEY_CHARS).collect()
}

/// Archive order: newest date first, then highest native id first.
///
/// Equal keys compare equal so a stable sort keeps their existing order.
#[must_use]
pub fn archive_order(a: &Post, b: &Post) -> Ordering {
    b.date
        .cmp(&a.date)
        .then_with(|| b.sequence().cmp(&a.sequence()))
}
