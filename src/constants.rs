//! Shared constants used across the application.

/// User agent string used for requests to the channel web preview and photo CDN.
///
/// The web preview serves a stripped-down page to unknown agents, so this is a
/// realistic browser string.
pub const ARCHIVAL_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Offset of the civil timezone every archive date is expressed in (UTC+8).
pub const ARCHIVE_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// Number of characters of trimmed post text used in the content identity.
pub const TEXT_KEY_CHARS: usize = 50;

/// Maximum number of text characters carried into a generated image file name.
pub const FILE_NAME_SNIPPET_CHARS: usize = 30;

/// Sequence number used for ordering when a post has no native id.
pub const MISSING_SEQUENCE: i64 = 0;

/// Archive field recording why a post has no hosted image.
pub const IMAGE_STATUS_FIELD: &str = "image_status";
