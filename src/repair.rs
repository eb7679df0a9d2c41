//! Retry image hosting for archived posts that never got an image.
//!
//! Candidates are posts with a native id and no hosted image that were not
//! already found to be retracted or photo-less. Each one is looked up again at
//! the source by id; if the message still carries a photo it is uploaded and
//! the URL is written into the in-memory archive, which then feeds the merge
//! as prior state. Every other outcome is recorded on the post so the next
//! pass moves on to older candidates.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::enrich::ImageEnricher;
use crate::identity::{archive_order, Identity};
use crate::image::UploadError;
use crate::post::{Archive, ArchiveEntry, ImageStatus};

#[derive(Debug, Clone)]
pub struct RepairOptions {
    /// Pause after each candidate.
    pub delay: Duration,
    /// Most candidates examined in one pass, newest first.
    pub limit: usize,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(100),
            limit: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub candidates: usize,
    pub repaired: usize,
    /// No longer available upstream.
    pub retracted: usize,
    /// Still available, but without a photo.
    pub no_photo: usize,
    pub failed: usize,
}

/// Run the repair pass over `archive` in place.
///
/// # Errors
///
/// Returns an error only when the image host is misconfigured.
pub async fn repair_images(
    archive: &mut Archive,
    enricher: &ImageEnricher<'_>,
    options: &RepairOptions,
) -> Result<RepairReport, UploadError> {
    let mut report = RepairReport::default();
    if !enricher.can_upload() {
        debug!("No image host configured, skipping repair pass");
        return Ok(report);
    }

    let mut candidates: Vec<usize> = archive
        .entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| match entry {
            ArchiveEntry::Post(post) if post.needs_repair() => Some(index),
            _ => None,
        })
        .collect();
    candidates.sort_by(|&a, &b| match (&archive.entries[a], &archive.entries[b]) {
        (ArchiveEntry::Post(a), ArchiveEntry::Post(b)) => archive_order(a, b),
        _ => std::cmp::Ordering::Equal,
    });
    candidates.truncate(options.limit);
    report.candidates = candidates.len();

    if candidates.is_empty() {
        return Ok(report);
    }
    info!(count = candidates.len(), "Repairing posts without images");

    for index in candidates {
        let ArchiveEntry::Post(post) = &archive.entries[index] else {
            continue;
        };
        let Some(id) = post.id else {
            continue;
        };
        let identity = Identity::of(post);

        let (image, status) = match enricher.source().fetch_by_id(id).await {
            Ok(None) => {
                debug!(identity = %identity, id, "Post no longer available upstream");
                report.retracted += 1;
                (None, Some(ImageStatus::Retracted))
            }
            Ok(Some(raw)) => match raw.photo {
                None => {
                    report.no_photo += 1;
                    (None, Some(ImageStatus::NoPhoto))
                }
                Some(photo) => match enricher.upload_photo(post, &photo).await? {
                    Some(url) => {
                        info!(identity = %identity, url = %url, "Image repaired");
                        report.repaired += 1;
                        (Some(url), None)
                    }
                    None => {
                        report.failed += 1;
                        (None, Some(ImageStatus::Pending))
                    }
                },
            },
            Err(e) => {
                warn!(identity = %identity, id, "Repair lookup failed: {e}");
                report.failed += 1;
                (None, Some(ImageStatus::Pending))
            }
        };

        if let ArchiveEntry::Post(post) = &mut archive.entries[index] {
            if image.is_some() {
                post.image = image;
            }
            post.set_image_status(status);
        }

        if !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }
    }

    Ok(report)
}
