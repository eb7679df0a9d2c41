use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

use crate::window::DateWindow;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
    #[error("failed to parse {name} as a YYYY-MM-DD date: {value}")]
    ParseDate { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Channel
    pub channel: String,
    pub source_base_url: String,
    pub max_pages: usize,
    pub http_timeout: Duration,
    pub post_delay: Duration,

    // Archive
    pub archive_path: PathBuf,
    pub merge_mode: MergeMode,
    pub lookback_days: u32,
    pub since_date: Option<NaiveDate>,

    // Repair
    pub repair_enabled: bool,
    pub repair_limit: usize,

    // Image hosting
    pub image_host: ImageHostKind,
    pub imgbb_api_key: Option<String>,
    pub imgbb_api_url: String,
    pub s3_bucket: Option<String>,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
    pub s3_prefix: String,
    pub s3_public_base_url: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Keep every prior post; new posts are added or overwrite by identity
    Append,
    /// Prior posts inside the fetch window are replaced by what the source reports now
    Window,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageHostKind {
    Imgbb,
    S3,
    /// Text-only archive
    None,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Channel
            channel: normalize_channel(&required_env("CHANNEL_USERNAME")?),
            source_base_url: env_or_default("SOURCE_BASE_URL", "https://t.me"),
            max_pages: parse_env_usize("MAX_PAGES", 50)?,
            http_timeout: Duration::from_secs(parse_env_u64("HTTP_TIMEOUT_SECS", 30)?),
            post_delay: Duration::from_millis(parse_env_u64("POST_DELAY_MS", 100)?),

            // Archive
            archive_path: PathBuf::from(env_or_default("ARCHIVE_PATH", "./posts.json")),
            merge_mode: parse_merge_mode(&env_or_default("MERGE_POLICY", "append"))?,
            lookback_days: parse_env_u32("LOOKBACK_DAYS", 1)?,
            since_date: parse_env_date("SINCE_DATE")?,

            // Repair
            repair_enabled: parse_env_bool("REPAIR_ENABLED", true)?,
            repair_limit: parse_env_usize("REPAIR_LIMIT", 200)?,

            // Image hosting
            image_host: parse_image_host(&env_or_default("IMAGE_HOST", "imgbb"))?,
            imgbb_api_key: optional_env("IMGBB_API_KEY"),
            imgbb_api_url: env_or_default("IMGBB_API_URL", "https://api.imgbb.com/1/upload"),
            s3_bucket: optional_env("S3_BUCKET"),
            s3_region: env_or_default("S3_REGION", "us-east-1"),
            s3_endpoint: optional_env("S3_ENDPOINT"),
            s3_prefix: env_or_default("S3_PREFIX", "posts/"),
            s3_public_base_url: optional_env("S3_PUBLIC_BASE_URL"),
            aws_access_key_id: optional_env("AWS_ACCESS_KEY_ID"),
            aws_secret_access_key: optional_env("AWS_SECRET_ACCESS_KEY"),
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "CHANNEL_USERNAME".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if url::Url::parse(&self.source_base_url).is_err() {
            return Err(ConfigError::InvalidValue {
                name: "SOURCE_BASE_URL".to_string(),
                message: format!("not a valid URL: '{}'", self.source_base_url),
            });
        }
        if self.max_pages == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_PAGES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.lookback_days == 0 {
            return Err(ConfigError::InvalidValue {
                name: "LOOKBACK_DAYS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        match self.image_host {
            ImageHostKind::Imgbb if self.imgbb_api_key.is_none() => {
                return Err(ConfigError::MissingEnvVar("IMGBB_API_KEY".to_string()));
            }
            ImageHostKind::S3 if self.s3_bucket.is_none() => {
                return Err(ConfigError::MissingEnvVar("S3_BUCKET".to_string()));
            }
            _ => {}
        }
        Ok(())
    }

    /// Dates to read from the source on `today`.
    ///
    /// `SINCE_DATE` fixes the start; otherwise the window covers the last
    /// `LOOKBACK_DAYS` days including today.
    #[must_use]
    pub fn fetch_window(&self, today: NaiveDate) -> DateWindow {
        match self.since_date {
            Some(since) => DateWindow::new(since.min(today), today),
            None => DateWindow::ending_on(today, self.lookback_days),
        }
    }

    /// Configuration for tests: text-only, no delays, local paths.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            channel: "testchannel".to_string(),
            source_base_url: "http://127.0.0.1:9".to_string(),
            max_pages: 5,
            http_timeout: Duration::from_secs(10),
            post_delay: Duration::ZERO,
            archive_path: PathBuf::from("./posts.json"),
            merge_mode: MergeMode::Append,
            lookback_days: 1,
            since_date: None,
            repair_enabled: true,
            repair_limit: 200,
            image_host: ImageHostKind::None,
            imgbb_api_key: Some("test-key".to_string()),
            imgbb_api_url: "http://127.0.0.1:9/1/upload".to_string(),
            s3_bucket: None,
            s3_region: "us-east-1".to_string(),
            s3_endpoint: None,
            s3_prefix: "posts/".to_string(),
            s3_public_base_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
        }
    }
}

/// Accept `name`, `@name`, `t.me/name`, `https://t.me/s/name`.
fn normalize_channel(value: &str) -> String {
    let value = value.trim();
    let path = url::Url::parse(value)
        .ok()
        .filter(|url| url.has_host())
        .map(|url| url.path().to_string());
    let path = path.as_deref().unwrap_or(value);

    let path = path.strip_prefix("t.me/").unwrap_or(path);
    path.trim_matches('/')
        .trim_start_matches("s/")
        .trim_start_matches('@')
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

fn parse_env_date(name: &str) -> Result<Option<NaiveDate>, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.trim().is_empty() => NaiveDate::parse_from_str(val.trim(), "%Y-%m-%d")
            .map(Some)
            .map_err(|_| ConfigError::ParseDate {
                name: name.to_string(),
                value: val,
            }),
        _ => Ok(None),
    }
}

fn parse_merge_mode(value: &str) -> Result<MergeMode, ConfigError> {
    match value.to_lowercase().as_str() {
        "append" => Ok(MergeMode::Append),
        "window" => Ok(MergeMode::Window),
        _ => Err(ConfigError::InvalidValue {
            name: "MERGE_POLICY".to_string(),
            message: format!("must be 'append' or 'window', got '{value}'"),
        }),
    }
}

fn parse_image_host(value: &str) -> Result<ImageHostKind, ConfigError> {
    match value.to_lowercase().as_str() {
        "imgbb" => Ok(ImageHostKind::Imgbb),
        "s3" => Ok(ImageHostKind::S3),
        "none" | "off" => Ok(ImageHostKind::None),
        _ => Err(ConfigError::InvalidValue {
            name: "IMAGE_HOST".to_string(),
            message: format!("must be 'imgbb', 's3' or 'none', got '{value}'"),
        }),
    }
}
