//! One archiving run.
//!
//! Load the archive, repair missing images, read the fetch window from the
//! source one post at a time, merge, and write the result. Nothing is written
//! if the source cannot be read completely or the image host is
//! misconfigured, so a failed run leaves the previous file as it was.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures_util::StreamExt;
use tracing::{debug, info};

use crate::archive::ArchiveStore;
use crate::config::{Config, MergeMode};
use crate::enrich::{Enrichment, ImageEnricher, ImageIndex};
use crate::image::ImageHost;
use crate::merge::{merge, MergePolicy};
use crate::repair::{repair_images, RepairOptions};
use crate::source::PostSource;
use crate::window::DateWindow;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub window: DateWindow,
    pub policy: MergePolicy,
    /// Pause after each post read from the source.
    pub post_delay: Duration,
    /// `None` disables the repair pass.
    pub repair: Option<RepairOptions>,
}

impl IngestOptions {
    /// Options for a run on `today` (a civil date in the archive timezone).
    #[must_use]
    pub fn from_config(config: &Config, today: NaiveDate) -> Self {
        let window = config.fetch_window(today);
        let policy = match config.merge_mode {
            MergeMode::Append => MergePolicy::PureAppend,
            MergeMode::Window => MergePolicy::window(window.dates()),
        };
        let repair = config.repair_enabled.then(|| RepairOptions {
            delay: config.post_delay,
            limit: config.repair_limit,
        });

        Self {
            window,
            policy,
            post_delay: config.post_delay,
            repair,
        }
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub collapsed: usize,
    pub repaired: usize,
    pub images_uploaded: usize,
    pub images_reused: usize,
    pub images_failed: usize,
    /// Entries in the archive after the run.
    pub total: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new, {} updated, {} removed, {} total ({} fetched, {} unchanged, {} collapsed; images: {} uploaded, {} reused, {} failed, {} repaired)",
            self.added,
            self.updated,
            self.removed,
            self.total,
            self.fetched,
            self.unchanged,
            self.collapsed,
            self.images_uploaded,
            self.images_reused,
            self.images_failed,
            self.repaired,
        )
    }
}

/// Run one full archiving pass.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or written, the source
/// window cannot be read completely, or the image host is misconfigured.
pub async fn run_once(
    store: &ArchiveStore,
    source: &dyn PostSource,
    host: Option<&dyn ImageHost>,
    options: &IngestOptions,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    let enricher = ImageEnricher::new(source, host);

    let mut prior = store.load().await?;
    info!(
        path = %store.path().display(),
        entries = prior.len(),
        window = %options.window,
        "Starting run"
    );

    if let Some(repair) = &options.repair {
        let report = repair_images(&mut prior, &enricher, repair)
            .await
            .context("Repair pass aborted")?;
        summary.repaired = report.repaired;
        if report.candidates > 0 {
            info!(
                candidates = report.candidates,
                repaired = report.repaired,
                retracted = report.retracted,
                no_photo = report.no_photo,
                failed = report.failed,
                "Repair pass finished"
            );
        }
        if report.repaired > 0 {
            store
                .save(&prior)
                .await
                .context("Failed to save repaired archive")?;
        }
    }

    let mut index = ImageIndex::from_archive(&prior);
    let mut batch = Vec::new();
    let mut posts = source.list_recent(options.window);

    while let Some(raw) = posts.next().await {
        let raw = raw.context("Failed to read source window")?;
        let (post, enrichment) = enricher
            .enrich(&raw, &index)
            .await
            .context("Image host rejected the configuration")?;

        match enrichment {
            Enrichment::Uploaded => {
                summary.images_uploaded += 1;
                index.record(&post);
            }
            Enrichment::Reused => summary.images_reused += 1,
            Enrichment::Failed => summary.images_failed += 1,
            Enrichment::NoPhoto | Enrichment::Disabled => {}
        }
        debug!(id = ?post.id, date = %post.date, ?enrichment, "Post observed");
        batch.push(post);

        if !options.post_delay.is_zero() {
            tokio::time::sleep(options.post_delay).await;
        }
    }
    summary.fetched = batch.len();

    let outcome = merge(prior, batch, &options.policy);
    summary.added = outcome.stats.added;
    summary.updated = outcome.stats.updated;
    summary.unchanged = outcome.stats.unchanged;
    summary.removed = outcome.stats.removed;
    summary.collapsed = outcome.stats.collapsed;
    summary.total = outcome.archive.len();

    store
        .save(&outcome.archive)
        .await
        .context("Failed to save archive")?;

    Ok(summary)
}
