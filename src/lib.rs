//! Channel post archiver library.
//!
//! Reads the recent posts of a public channel, hosts their images
//! permanently, and merges them into a de-duplicated JSON archive that is
//! kept newest first.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod archive;
pub mod config;
pub mod constants;
pub mod enrich;
pub mod identity;
pub mod image;
pub mod ingest;
pub mod merge;
pub mod post;
pub mod repair;
pub mod source;
pub mod window;
