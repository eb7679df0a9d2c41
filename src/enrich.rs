//! Image enrichment: attach a hosted image URL to a post.
//!
//! A URL already held in the prior archive is always reused, so repeated
//! runs over the same window do no image work. Otherwise the photo is
//! downloaded from the source and handed to the configured [`ImageHost`].

use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::identity::Identity;
use crate::image::{image_file_name, photo_media_type, ImageHost, UploadError};
use crate::post::{Archive, ImageStatus, PhotoRef, Post, RawPost};
use crate::source::PostSource;

/// Hosted image URLs already known, by identity and by native id.
#[derive(Debug, Default)]
pub struct ImageIndex {
    by_identity: HashMap<Identity, String>,
    by_native: HashMap<(NaiveDate, i64), String>,
}

impl ImageIndex {
    #[must_use]
    pub fn from_archive(archive: &Archive) -> Self {
        let mut index = Self::default();
        for post in archive.posts() {
            index.record(post);
        }
        index
    }

    /// Remember the image of `post`, if it has one.
    pub fn record(&mut self, post: &Post) {
        let Some(url) = post.image.as_deref().filter(|_| post.has_image()) else {
            return;
        };
        self.by_identity
            .entry(Identity::of(post))
            .or_insert_with(|| url.to_string());
        if let Some(id) = post.id {
            self.by_native
                .entry((post.date, id))
                .or_insert_with(|| url.to_string());
        }
    }

    /// Hosted URL for `post`, matched by identity first, then by date and native id.
    #[must_use]
    pub fn lookup(&self, post: &Post) -> Option<&str> {
        self.by_identity
            .get(&Identity::of(post))
            .or_else(|| post.id.and_then(|id| self.by_native.get(&(post.date, id))))
            .map(String::as_str)
    }
}

/// What happened to a post's image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enrichment {
    /// URL taken from the prior archive.
    Reused,
    /// Photo downloaded and uploaded in this run.
    Uploaded,
    /// The source reports a photo but it could not be hosted.
    Failed,
    /// The source reports no photo.
    NoPhoto,
    /// The source reports a photo but no image host is configured.
    Disabled,
}

pub struct ImageEnricher<'a> {
    source: &'a dyn PostSource,
    host: Option<&'a dyn ImageHost>,
}

impl<'a> ImageEnricher<'a> {
    #[must_use]
    pub fn new(source: &'a dyn PostSource, host: Option<&'a dyn ImageHost>) -> Self {
        Self { source, host }
    }

    #[must_use]
    pub fn source(&self) -> &'a dyn PostSource {
        self.source
    }

    #[must_use]
    pub fn can_upload(&self) -> bool {
        self.host.is_some()
    }

    /// Turn a raw post into a storable post with the best image URL available.
    ///
    /// # Errors
    ///
    /// Returns an error only when the image host is misconfigured. Every other
    /// failure leaves the post text-only.
    pub async fn enrich(
        &self,
        raw: &RawPost,
        index: &ImageIndex,
    ) -> Result<(Post, Enrichment), UploadError> {
        let mut post = raw.to_post(None);

        if let Some(url) = index.lookup(&post) {
            debug!(identity = %Identity::of(&post), "Reusing hosted image");
            let url = url.to_string();
            return Ok((post.with_image(url), Enrichment::Reused));
        }

        let Some(photo) = &raw.photo else {
            post.set_image_status(Some(ImageStatus::NoPhoto));
            return Ok((post, Enrichment::NoPhoto));
        };
        if self.host.is_none() {
            post.set_image_status(Some(ImageStatus::Pending));
            return Ok((post, Enrichment::Disabled));
        }

        match self.upload_photo(&post, photo).await? {
            Some(url) => Ok((post.with_image(url), Enrichment::Uploaded)),
            None => {
                post.set_image_status(Some(ImageStatus::Pending));
                Ok((post, Enrichment::Failed))
            }
        }
    }

    /// Download `photo` and upload it for `post`.
    ///
    /// Returns `Ok(None)` when hosting is disabled or this one image failed.
    ///
    /// # Errors
    ///
    /// Returns an error only when the image host is misconfigured.
    pub async fn upload_photo(
        &self,
        post: &Post,
        photo: &PhotoRef,
    ) -> Result<Option<String>, UploadError> {
        let Some(host) = self.host else {
            return Ok(None);
        };
        let identity = Identity::of(post);

        let bytes = match self.source.download_photo(photo).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(identity = %identity, url = %photo.url, "Photo download failed: {e}");
                return Ok(None);
            }
        };

        let (mime_type, extension) = photo_media_type(photo);
        let file_name = image_file_name(post.date, post.id, &post.text, &extension);

        match host.upload(bytes, &file_name, &mime_type).await {
            Ok(url) => {
                debug!(identity = %identity, file_name = %file_name, url = %url, "Image uploaded");
                Ok(Some(url))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(identity = %identity, host = host.name(), "Image upload failed: {e}");
                Ok(None)
            }
        }
    }
}
