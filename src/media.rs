/// Media upload and remote fetch orchestration
///
/// Local uploads and remote fetches both end in the same place: bytes in
/// the default datastore and an immutable media record. Blobs are
/// deduplicated by content hash, so re-uploads and re-fetches of known
/// bytes reuse the stored file.
use crate::{
    error::{MediaError, MediaResult},
    federation::{FederationClient, ServerResolver},
    store::{generate_secure_id, media_store::MediaStore, models::Media, persister::FilePersister, GENERATED_ID_LENGTH},
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Media repository front door for uploads and federated reads
pub struct MediaService {
    store: MediaStore,
    persister: Arc<FilePersister>,
    resolver: Arc<ServerResolver>,
    client: Arc<FederationClient>,
    /// Origin recorded on locally uploaded media
    origin: String,
}

impl MediaService {
    pub fn new(
        store: MediaStore,
        persister: Arc<FilePersister>,
        resolver: Arc<ServerResolver>,
        client: Arc<FederationClient>,
        origin: String,
    ) -> Self {
        Self {
            store,
            persister,
            resolver,
            client,
            origin,
        }
    }

    /// Store an upload from a local user and return its record
    pub async fn upload(
        &self,
        data: &[u8],
        content_type: &str,
        upload_name: Option<&str>,
        user_id: Option<&str>,
    ) -> MediaResult<Media> {
        let sha256_hash = hash_bytes(data);
        let location = self.locate_or_persist(&sha256_hash, data).await?;

        let media = Media {
            origin: self.origin.clone(),
            media_id: generate_secure_id(GENERATED_ID_LENGTH),
            upload_name: upload_name.map(str::to_string),
            content_type: content_type.to_string(),
            user_id: user_id.map(str::to_string),
            sha256_hash,
            size_bytes: data.len() as i64,
            location,
            created_at: Utc::now(),
        };

        self.store.insert_media(&media).await?;
        info!(
            "Stored upload {}/{} ({} bytes, {})",
            media.origin, media.media_id, media.size_bytes, media.content_type
        );

        Ok(media)
    }

    /// Return the media record for `origin`/`media_id`, fetching it from
    /// the owning homeserver on first access
    pub async fn fetch_remote(&self, origin: &str, media_id: &str) -> MediaResult<Media> {
        if let Some(existing) = self.store.get_media(origin, media_id).await? {
            debug!("Media {}/{} already downloaded", origin, media_id);
            return Ok(existing);
        }

        let resolved = self.resolver.resolve(origin).await?;
        let url = format!(
            "{}/_matrix/media/v1/download/{}/{}",
            resolved.base_url, origin, media_id
        );
        let response = self.client.federated_get(&url, &resolved.host_header).await?;

        if response.status == hyper::StatusCode::NOT_FOUND {
            return Err(MediaError::NotFound(format!(
                "Remote media {}/{} does not exist",
                origin, media_id
            )));
        }
        if !response.status.is_success() {
            return Err(MediaError::Network(format!(
                "Remote server returned HTTP {} for {}/{}",
                response.status, origin, media_id
            )));
        }

        let content_type = response
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let sha256_hash = hash_bytes(&response.body);
        let location = self.locate_or_persist(&sha256_hash, &response.body).await?;

        let media = Media {
            origin: origin.to_string(),
            media_id: media_id.to_string(),
            upload_name: None,
            content_type,
            user_id: None,
            sha256_hash,
            size_bytes: response.body.len() as i64,
            location,
            created_at: Utc::now(),
        };

        match self.store.insert_media(&media).await {
            Ok(()) => {
                info!(
                    "Downloaded {}/{} ({} bytes) from {}",
                    origin, media_id, media.size_bytes, resolved.base_url
                );
                Ok(media)
            }
            Err(MediaError::Conflict(_)) => {
                debug!("Media {}/{} was downloaded concurrently", origin, media_id);
                self.store.get_media(origin, media_id).await?.ok_or_else(|| {
                    MediaError::Internal(format!(
                        "Media {}/{} vanished after conflict",
                        origin, media_id
                    ))
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Reuse the stored file for known content, persisting only new bytes
    async fn locate_or_persist(&self, sha256_hash: &str, data: &[u8]) -> MediaResult<String> {
        if let Some(existing) = self.store.get_media_by_hash(sha256_hash).await? {
            debug!("Content {} already stored at {}", sha256_hash, existing.location);
            return Ok(existing.location);
        }
        self.persister.persist_bytes(data).await
    }
}

fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::{
        resolver::{SrvRecord, SrvResolver, WellKnownClient, WellKnownServer},
        ResolverCache,
    };
    use crate::store::registry::DatastoreRegistry;
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    struct NoWellKnown;

    #[async_trait]
    impl WellKnownClient for NoWellKnown {
        async fn fetch(&self, _host: &str) -> Option<WellKnownServer> {
            None
        }
    }

    struct NoSrv;

    #[async_trait]
    impl SrvResolver for NoSrv {
        async fn lookup(&self, _name: &str) -> Vec<SrvRecord> {
            Vec::new()
        }
    }

    async fn create_test_service(base: &Path) -> (MediaService, MediaStore) {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let store = MediaStore::new(pool.clone());
        let persister = Arc::new(FilePersister::new(
            DatastoreRegistry::new(pool),
            base.to_path_buf(),
        ));
        let resolver = Arc::new(ServerResolver::new(
            Arc::new(ResolverCache::new()),
            Arc::new(NoWellKnown),
            Arc::new(NoSrv),
        ));
        let client = Arc::new(FederationClient::new(Duration::from_secs(1)));

        let service = MediaService::new(
            store.clone(),
            persister,
            resolver,
            client,
            "localhost".to_string(),
        );
        (service, store)
    }

    #[tokio::test]
    async fn test_upload_records_media() {
        let dir = tempdir().unwrap();
        let (service, store) = create_test_service(dir.path()).await;

        let media = service
            .upload(b"picture bytes", "image/png", Some("pic.png"), Some("@alice:localhost"))
            .await
            .unwrap();

        assert_eq!(media.origin, "localhost");
        assert_eq!(media.media_id.len(), 32);
        assert_eq!(media.size_bytes, 13);

        let stored = store
            .get_media("localhost", &media.media_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.location, media.location);

        let on_disk = tokio::fs::read(&media.location).await.unwrap();
        assert_eq!(on_disk, b"picture bytes");
    }

    #[tokio::test]
    async fn test_duplicate_uploads_share_one_file() {
        let dir = tempdir().unwrap();
        let (service, _) = create_test_service(dir.path()).await;

        let first = service.upload(b"same bytes", "image/png", None, None).await.unwrap();
        let second = service.upload(b"same bytes", "image/png", None, None).await.unwrap();

        assert_ne!(first.media_id, second.media_id);
        assert_eq!(first.location, second.location);
        assert_eq!(first.sha256_hash, second.sha256_hash);
    }

    #[tokio::test]
    async fn test_fetch_remote_returns_known_media_without_network() {
        let dir = tempdir().unwrap();
        let (service, store) = create_test_service(dir.path()).await;

        let media = Media {
            origin: "remote.test".to_string(),
            media_id: "already-here".to_string(),
            upload_name: None,
            content_type: "image/png".to_string(),
            user_id: None,
            sha256_hash: "abc".to_string(),
            size_bytes: 3,
            location: "/nowhere".to_string(),
            created_at: Utc::now(),
        };
        store.insert_media(&media).await.unwrap();

        let fetched = service.fetch_remote("remote.test", "already-here").await.unwrap();
        assert_eq!(fetched.location, "/nowhere");
    }
}
