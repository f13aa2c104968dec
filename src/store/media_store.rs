/// Media and thumbnail record access
use crate::{
    error::{MediaError, MediaResult},
    store::{
        is_unique_violation,
        models::{Media, Thumbnail},
    },
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

/// Database accessor for media and thumbnail records
#[derive(Clone)]
pub struct MediaStore {
    db: SqlitePool,
}

impl MediaStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Record a media blob. Media records are create-only; inserting an
    /// existing (origin, media_id) pair reports a conflict.
    pub async fn insert_media(&self, media: &Media) -> MediaResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO media (origin, media_id, upload_name, content_type, user_id,
                               sha256_hash, size_bytes, location, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&media.origin)
        .bind(&media.media_id)
        .bind(&media.upload_name)
        .bind(&media.content_type)
        .bind(&media.user_id)
        .bind(&media.sha256_hash)
        .bind(media.size_bytes)
        .bind(&media.location)
        .bind(media.created_at)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(MediaError::Conflict(format!(
                "Media {}/{} already recorded",
                media.origin, media.media_id
            ))),
            Err(e) => Err(MediaError::Database(e)),
        }
    }

    /// Look up a media record by its content-addressed identifier
    pub async fn get_media(&self, origin: &str, media_id: &str) -> MediaResult<Option<Media>> {
        let row = sqlx::query(
            r#"
            SELECT origin, media_id, upload_name, content_type, user_id,
                   sha256_hash, size_bytes, location, created_at
            FROM media
            WHERE origin = ?1 AND media_id = ?2
            "#,
        )
        .bind(origin)
        .bind(media_id)
        .fetch_optional(&self.db)
        .await
        .map_err(MediaError::Database)?;

        row.map(media_from_row).transpose()
    }

    /// Find any media record carrying the given content hash. Backs blob
    /// deduplication: a new upload with a known hash reuses the stored file.
    pub async fn get_media_by_hash(&self, sha256_hash: &str) -> MediaResult<Option<Media>> {
        let row = sqlx::query(
            r#"
            SELECT origin, media_id, upload_name, content_type, user_id,
                   sha256_hash, size_bytes, location, created_at
            FROM media
            WHERE sha256_hash = ?1
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(sha256_hash)
        .fetch_optional(&self.db)
        .await
        .map_err(MediaError::Database)?;

        row.map(media_from_row).transpose()
    }

    /// Record a generated thumbnail. The storage layer enforces at most one
    /// record per (media, width, height, method, animated) tuple; losing the
    /// insert race reports a conflict for the caller to re-read.
    pub async fn insert_thumbnail(&self, thumbnail: &Thumbnail) -> MediaResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO thumbnails (origin, media_id, width, height, method, animated,
                                    content_type, location, size_bytes, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&thumbnail.origin)
        .bind(&thumbnail.media_id)
        .bind(thumbnail.width)
        .bind(thumbnail.height)
        .bind(&thumbnail.method)
        .bind(thumbnail.animated)
        .bind(&thumbnail.content_type)
        .bind(&thumbnail.location)
        .bind(thumbnail.size_bytes)
        .bind(thumbnail.created_at)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(MediaError::Conflict(format!(
                "Thumbnail for {}/{} at {}x{} already recorded",
                thumbnail.origin, thumbnail.media_id, thumbnail.width, thumbnail.height
            ))),
            Err(e) => Err(MediaError::Database(e)),
        }
    }

    /// Look up the thumbnail for an exact parameter tuple
    pub async fn get_thumbnail(
        &self,
        origin: &str,
        media_id: &str,
        width: i64,
        height: i64,
        method: &str,
        animated: bool,
    ) -> MediaResult<Option<Thumbnail>> {
        let row = sqlx::query(
            r#"
            SELECT origin, media_id, width, height, method, animated,
                   content_type, location, size_bytes, created_at
            FROM thumbnails
            WHERE origin = ?1 AND media_id = ?2 AND width = ?3 AND height = ?4
              AND method = ?5 AND animated = ?6
            "#,
        )
        .bind(origin)
        .bind(media_id)
        .bind(width)
        .bind(height)
        .bind(method)
        .bind(animated)
        .fetch_optional(&self.db)
        .await
        .map_err(MediaError::Database)?;

        row.map(thumbnail_from_row).transpose()
    }
}

fn media_from_row(row: SqliteRow) -> MediaResult<Media> {
    Ok(Media {
        origin: row.try_get("origin")?,
        media_id: row.try_get("media_id")?,
        upload_name: row.try_get("upload_name")?,
        content_type: row.try_get("content_type")?,
        user_id: row.try_get("user_id")?,
        sha256_hash: row.try_get("sha256_hash")?,
        size_bytes: row.try_get("size_bytes")?,
        location: row.try_get("location")?,
        created_at: row.try_get("created_at")?,
    })
}

fn thumbnail_from_row(row: SqliteRow) -> MediaResult<Thumbnail> {
    Ok(Thumbnail {
        origin: row.try_get("origin")?,
        media_id: row.try_get("media_id")?,
        width: row.try_get("width")?,
        height: row.try_get("height")?,
        method: row.try_get("method")?,
        animated: row.try_get("animated")?,
        content_type: row.try_get("content_type")?,
        location: row.try_get("location")?,
        size_bytes: row.try_get("size_bytes")?,
        created_at: row.try_get("created_at")?,
    })
}
