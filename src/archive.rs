//! The archive file: a JSON array of posts, newest first.
//!
//! Loading never fails on bad content. A missing or empty file is an empty
//! archive; a file that is not a JSON array is moved aside to
//! `<name>.corrupt-<timestamp>` and also treated as empty. Saving replaces the
//! file atomically through a temporary file in the same directory.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::post::Archive;

#[derive(Debug, Clone)]
pub struct ArchiveStore {
    path: PathBuf,
}

impl ArchiveStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, or if a corrupt
    /// file cannot be moved aside.
    pub async fn load(&self) -> Result<Archive> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No archive yet, starting empty");
                return Ok(Archive::default());
            }
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("Failed to read archive {}", self.path.display()));
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Archive::default());
        }

        let archive = match parse_archive(&bytes) {
            Ok(archive) => archive,
            Err(e) => {
                let quarantine = self.quarantine().await?;
                warn!(
                    path = %self.path.display(),
                    moved_to = %quarantine.display(),
                    "Archive is corrupt, starting empty: {e}"
                );
                return Ok(Archive::default());
            }
        };

        for value in archive.unmatched() {
            warn!(entry = %value, "Archive entry has no usable date, keeping it unmerged");
        }
        debug!(path = %self.path.display(), entries = archive.len(), "Archive loaded");

        Ok(archive)
    }

    /// Replace the archive file with `archive`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written. The previous file is
    /// left intact in that case.
    pub async fn save(&self, archive: &Archive) -> Result<()> {
        let bytes = render_archive(archive).context("Failed to serialize archive")?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .context("Archive writer task panicked")??;

        debug!(path = %self.path.display(), entries = archive.len(), "Archive saved");
        Ok(())
    }

    async fn quarantine(&self) -> Result<PathBuf> {
        let mut name: OsString = self.path.as_os_str().to_owned();
        name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%d%H%M%S")));
        let target = PathBuf::from(name);

        tokio::fs::rename(&self.path, &target)
            .await
            .with_context(|| {
                format!(
                    "Failed to move corrupt archive {} aside",
                    self.path.display()
                )
            })?;
        Ok(target)
    }
}

/// Parse archive file content.
///
/// # Errors
///
/// Returns an error if the content is not a JSON array.
pub fn parse_archive(bytes: &[u8]) -> serde_json::Result<Archive> {
    serde_json::from_slice(bytes)
}

/// Render an archive as 2-space indented JSON with non-ASCII text unescaped.
///
/// # Errors
///
/// Returns an error if an entry cannot be serialized.
pub fn render_archive(archive: &Archive) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"  ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    archive.serialize(&mut serializer)?;
    out.push(b'\n');
    Ok(out)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    file.write_all(bytes)
        .context("Failed to write temporary archive file")?;
    file.as_file()
        .sync_all()
        .context("Failed to flush temporary archive file")?;

    // Keep the mode of the file being replaced; temp files start as 0600
    match std::fs::metadata(path) {
        Ok(metadata) => {
            file.as_file()
                .set_permissions(metadata.permissions())
                .context("Failed to copy archive permissions")?;
        }
        Err(_) => set_default_permissions(file.as_file())?,
    }

    file.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to replace archive {}", path.display()))?;
    Ok(())
}

#[cfg(unix)]
fn set_default_permissions(file: &std::fs::File) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o644))
        .context("Failed to set archive permissions")
}

#[cfg(not(unix))]
fn set_default_permissions(_file: &std::fs::File) -> Result<()> {
    Ok(())
}
