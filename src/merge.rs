//! Reconciliation of newly observed posts against the prior archive.
//!
//! The engine is pure: it takes the prior archive and a batch of already
//! enriched posts and returns the next archive plus counts of what changed.
//!
//! Rules:
//! - Identity is [`Identity::of`]; no two posts in the output share one.
//! - A new post replaces the prior post with the same identity, except that a
//!   hosted image URL is never replaced by an empty one.
//! - A new post whose text changed upstream (different identity, same date and
//!   native id as a prior post) supersedes that prior post.
//! - Under [`MergePolicy::WindowOverwrite`] prior posts dated inside the
//!   in-flight set only survive if the batch supplies them again. Posts
//!   outside the set are never touched.
//! - Prior entries that are not valid posts are kept verbatim after all dated
//!   posts.
//! - Output is sorted by [`archive_order`] with a stable sort.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, warn};

use crate::identity::{archive_order, Identity};
use crate::post::{Archive, ArchiveEntry, Post};

/// Which prior posts take part in the merge as permanent history.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Every prior post keeps its slot; new posts are added or overwrite by identity.
    #[default]
    PureAppend,
    /// Prior posts dated in `in_flight` are dropped unless the batch re-supplies them.
    WindowOverwrite { in_flight: BTreeSet<NaiveDate> },
}

impl MergePolicy {
    #[must_use]
    pub fn window(in_flight: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self::WindowOverwrite {
            in_flight: in_flight.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn is_in_flight(&self, date: NaiveDate) -> bool {
        match self {
            Self::PureAppend => false,
            Self::WindowOverwrite { in_flight } => in_flight.contains(&date),
        }
    }
}

/// Counts describing one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Batch posts with no prior counterpart.
    pub added: usize,
    /// Batch posts that changed a prior post.
    pub updated: usize,
    /// Batch posts identical to their prior counterpart.
    pub unchanged: usize,
    /// In-flight prior posts the batch did not supply again.
    pub removed: usize,
    /// Duplicates folded into an existing identity, from either side.
    pub collapsed: usize,
}

#[derive(Debug)]
pub struct MergeOutcome {
    pub archive: Archive,
    pub stats: MergeStats,
}

/// Merge `batch` into `prior` under `policy`.
#[must_use]
pub fn merge(prior: Archive, batch: Vec<Post>, policy: &MergePolicy) -> MergeOutcome {
    let mut table = MergeTable::default();
    let mut displaced: HashMap<Identity, Post> = HashMap::new();
    let mut unmatched: Vec<Value> = Vec::new();

    for entry in prior.entries {
        match entry {
            ArchiveEntry::Unmatched(value) => unmatched.push(value),
            ArchiveEntry::Post(post) if policy.is_in_flight(post.date) => {
                match displaced.entry(Identity::of(&post)) {
                    Entry::Occupied(mut slot) => {
                        warn!(identity = %slot.key(), "Duplicate prior post folded into one");
                        table.stats.collapsed += 1;
                        let merged = supersede(slot.get(), post);
                        slot.insert(merged);
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(post);
                    }
                }
            }
            ArchiveEntry::Post(post) => table.insert_prior(post),
        }
    }

    let mut fresh: HashSet<usize> = HashSet::new();

    for post in batch {
        let identity = Identity::of(&post);

        if let Some(&slot) = table.by_identity.get(&identity) {
            if fresh.contains(&slot) {
                debug!(identity = %identity, "Batch repeats an identity, folding");
                table.stats.collapsed += 1;
                table.replace(slot, post);
            } else {
                table.update(slot, post);
            }
            continue;
        }

        if let Some(previous) = displaced.remove(&identity) {
            let merged = supersede(&previous, post);
            if merged == previous {
                table.stats.unchanged += 1;
            } else {
                table.stats.updated += 1;
            }
            fresh.insert(table.push(identity, merged));
            continue;
        }

        if let Some(previous) = table.take_edited(&post, &identity, &mut displaced) {
            debug!(
                id = ?post.id,
                from = %Identity::of(&previous),
                to = %identity,
                "Post text changed upstream, superseding"
            );
            table.stats.updated += 1;
            let merged = supersede(&previous, post);
            fresh.insert(table.push(identity, merged));
            continue;
        }

        table.stats.added += 1;
        fresh.insert(table.push(identity, post));
    }

    for identity in displaced.keys() {
        debug!(identity = %identity, "In-flight post no longer reported, dropping");
    }
    table.stats.removed += displaced.len();

    let mut posts: Vec<Post> = table.slots.into_iter().flatten().collect();
    posts.sort_by(archive_order);

    let mut entries: Vec<ArchiveEntry> = posts.into_iter().map(ArchiveEntry::Post).collect();
    entries.extend(unmatched.into_iter().map(ArchiveEntry::Unmatched));

    MergeOutcome {
        archive: Archive { entries },
        stats: table.stats,
    }
}

/// Combine a newer observation of a post with the version already held.
///
/// The newer post wins except for fields it cannot know better: a hosted
/// image, a native id it lacks, and unknown fields carried from the file.
#[must_use]
pub fn supersede(previous: &Post, newer: Post) -> Post {
    let mut merged = newer;
    if !merged.has_image() && previous.has_image() {
        merged.image.clone_from(&previous.image);
    }
    if merged.id.is_none() {
        merged.id = previous.id;
    }
    for (key, value) in &previous.extra {
        if !merged.extra.contains_key(key) {
            merged.extra.insert(key.clone(), value.clone());
        }
    }
    if merged.has_image() {
        merged.set_image_status(None);
    }
    merged
}

/// Insertion-ordered identity map. Removed slots are left as `None` so
/// indexes stay valid.
#[derive(Default)]
struct MergeTable {
    slots: Vec<Option<Post>>,
    by_identity: HashMap<Identity, usize>,
    by_native: HashMap<i64, usize>,
    stats: MergeStats,
}

impl MergeTable {
    fn push(&mut self, identity: Identity, post: Post) -> usize {
        let slot = self.slots.len();
        if let Some(id) = post.id {
            self.by_native.entry(id).or_insert(slot);
        }
        self.slots.push(Some(post));
        self.by_identity.insert(identity, slot);
        slot
    }

    fn insert_prior(&mut self, post: Post) {
        let identity = Identity::of(&post);
        if let Some(&slot) = self.by_identity.get(&identity) {
            warn!(identity = %identity, "Duplicate prior post folded into one");
            self.stats.collapsed += 1;
            self.replace(slot, post);
        } else {
            self.push(identity, post);
        }
    }

    fn replace(&mut self, slot: usize, post: Post) {
        if let Some(previous) = self.slots[slot].take() {
            let merged = supersede(&previous, post);
            if let Some(id) = merged.id {
                self.by_native.entry(id).or_insert(slot);
            }
            self.slots[slot] = Some(merged);
        }
    }

    fn update(&mut self, slot: usize, post: Post) {
        let changed = self.slots[slot]
            .as_ref()
            .is_some_and(|previous| supersede(previous, post.clone()) != *previous);
        if changed {
            self.stats.updated += 1;
        } else {
            self.stats.unchanged += 1;
        }
        self.replace(slot, post);
    }

    /// Remove and return the prior version of an edited post.
    ///
    /// Matches on native id and date only, so a post outside the batch's
    /// dates is never reached.
    fn take_edited(
        &mut self,
        post: &Post,
        identity: &Identity,
        displaced: &mut HashMap<Identity, Post>,
    ) -> Option<Post> {
        let id = post.id?;

        if let Some(&slot) = self.by_native.get(&id) {
            let matches = self.slots[slot]
                .as_ref()
                .is_some_and(|previous| previous.date == post.date && previous.id == Some(id));
            if matches {
                let previous = self.slots[slot].take()?;
                self.by_native.remove(&id);
                let old_identity = Identity::of(&previous);
                if old_identity != *identity {
                    self.by_identity.remove(&old_identity);
                }
                return Some(previous);
            }
        }

        let key = displaced
            .iter()
            .find(|(_, previous)| previous.id == Some(id) && previous.date == post.date)
            .map(|(key, _)| key.clone())?;
        displaced.remove(&key)
    }
}
