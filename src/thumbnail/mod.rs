/// Thumbnail pipeline
///
/// The thumbnailer derives the scaled blob; the service layers record
/// caching on top so each (media, width, height, method, animated) tuple
/// is generated at most once.

pub mod thumbnailer;

pub use thumbnailer::{GeneratedThumbnail, Thumbnailer, METHOD_CROP, METHOD_SCALE};

use crate::{
    error::{MediaError, MediaResult},
    store::{
        media_store::MediaStore,
        models::{Media, Thumbnail},
    },
};
use chrono::Utc;
use tracing::debug;

/// Generates thumbnails and tracks them in the database
pub struct ThumbnailService {
    store: MediaStore,
    thumbnailer: Thumbnailer,
}

impl ThumbnailService {
    pub fn new(store: MediaStore, thumbnailer: Thumbnailer) -> Self {
        Self { store, thumbnailer }
    }

    /// Return the recorded thumbnail for the parameter tuple, generating
    /// and recording it when none exists yet. Concurrent generators race on
    /// the insert; the loser adopts the winner's record.
    pub async fn get_or_generate(
        &self,
        media: &Media,
        width: u32,
        height: u32,
        method: &str,
        animated: bool,
        force: bool,
    ) -> MediaResult<Thumbnail> {
        // Normalize before the lookup so the record tuple matches what the
        // generator will actually produce.
        let animated = self.thumbnailer.normalize_animated(media, animated);

        if let Some(existing) = self
            .store
            .get_thumbnail(
                &media.origin,
                &media.media_id,
                width as i64,
                height as i64,
                method,
                animated,
            )
            .await?
        {
            debug!(
                "Reusing thumbnail for {}/{} at {}x{}",
                media.origin, media.media_id, width, height
            );
            return Ok(existing);
        }

        let generated = self
            .thumbnailer
            .generate(media, width, height, method, animated, force)
            .await?;

        let record = Thumbnail {
            origin: media.origin.clone(),
            media_id: media.media_id.clone(),
            width: width as i64,
            height: height as i64,
            method: method.to_string(),
            animated,
            content_type: generated.content_type,
            location: generated.location,
            size_bytes: generated.size_bytes,
            created_at: Utc::now(),
        };

        match self.store.insert_thumbnail(&record).await {
            Ok(()) => Ok(record),
            Err(MediaError::Conflict(_)) => {
                debug!(
                    "Thumbnail for {}/{} was generated concurrently, reusing it",
                    media.origin, media.media_id
                );
                self.store
                    .get_thumbnail(
                        &media.origin,
                        &media.media_id,
                        width as i64,
                        height as i64,
                        method,
                        animated,
                    )
                    .await?
                    .ok_or_else(|| {
                        MediaError::Internal(format!(
                            "Thumbnail for {}/{} vanished after conflict",
                            media.origin, media.media_id
                        ))
                    })
            }
            Err(e) => Err(e),
        }
    }
}
