/// File persistence for media blobs
///
/// Streams byte sources into the default datastore under pseudo-random
/// sharded paths. Writes go to a temporary file first and are renamed into
/// place, so a failed call leaves nothing observable behind.
use crate::{
    error::{MediaError, MediaResult},
    store::{generate_secure_id, models::Datastore, registry::DatastoreRegistry, GENERATED_ID_LENGTH},
};
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncRead};
use tracing::debug;

/// Kind recorded for filesystem datastores
pub const DATASTORE_KIND_FILE: &str = "file";

/// Persists blobs into the default file datastore
#[derive(Clone)]
pub struct FilePersister {
    registry: DatastoreRegistry,
    default_path: PathBuf,
}

impl FilePersister {
    pub fn new(registry: DatastoreRegistry, default_path: PathBuf) -> Self {
        Self {
            registry,
            default_path,
        }
    }

    /// The datastore new blobs are written to, created on first use
    pub async fn default_datastore(&self) -> MediaResult<Datastore> {
        self.registry
            .get_or_create_by_uri(DATASTORE_KIND_FILE, &self.default_path.to_string_lossy())
            .await
    }

    /// Stream a byte source to a fresh location in the default datastore,
    /// returning the persistent path
    pub async fn persist_stream<R>(&self, reader: R) -> MediaResult<String>
    where
        R: AsyncRead + Unpin + Send,
    {
        let datastore = self.default_datastore().await?;
        let base = PathBuf::from(&datastore.uri);

        // A 62^32 namespace makes collisions astronomically unlikely, but
        // re-rolling on a hit costs nothing.
        let target = loop {
            let name = generate_secure_id(GENERATED_ID_LENGTH);
            let candidate = sharded_path(&base, &name);
            if !candidate.exists() {
                break candidate;
            }
            debug!("Path {} already taken, generating another", candidate.display());
        };

        let parent = target
            .parent()
            .ok_or_else(|| MediaError::Persist(format!("No parent for {}", target.display())))?;
        fs::create_dir_all(parent)
            .await
            .map_err(|e| MediaError::Persist(format!("Failed to create {}: {}", parent.display(), e)))?;

        let tmp = target.with_extension("tmp");
        let result = write_atomic(&tmp, &target, reader).await;
        if result.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        result?;

        Ok(target.to_string_lossy().into_owned())
    }

    /// Persist an in-memory buffer
    pub async fn persist_bytes(&self, data: &[u8]) -> MediaResult<String> {
        self.persist_stream(data).await
    }
}

/// Two-level sharding keeps directories from growing unbounded:
/// {base}/{id[0..2]}/{id[2..4]}/{id}
fn sharded_path(base: &Path, name: &str) -> PathBuf {
    base.join(&name[0..2]).join(&name[2..4]).join(name)
}

async fn write_atomic<R>(tmp: &Path, target: &Path, mut reader: R) -> MediaResult<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut file = fs::File::create(tmp)
        .await
        .map_err(|e| MediaError::Persist(format!("Failed to create {}: {}", tmp.display(), e)))?;

    tokio::io::copy(&mut reader, &mut file)
        .await
        .map_err(|e| MediaError::Persist(format!("Failed to write {}: {}", tmp.display(), e)))?;

    file.sync_all()
        .await
        .map_err(|e| MediaError::Persist(format!("Failed to sync {}: {}", tmp.display(), e)))?;
    drop(file);

    fs::rename(tmp, target).await.map_err(|e| {
        MediaError::Persist(format!(
            "Failed to move {} into place: {}",
            target.display(),
            e
        ))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn create_test_persister(base: &Path) -> FilePersister {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        FilePersister::new(DatastoreRegistry::new(pool), base.to_path_buf())
    }

    #[tokio::test]
    async fn test_persist_and_read_back() {
        let dir = tempdir().unwrap();
        let persister = create_test_persister(dir.path()).await;

        let location = persister.persist_bytes(b"media bytes").await.unwrap();
        let read_back = fs::read(&location).await.unwrap();
        assert_eq!(read_back, b"media bytes");
        assert!(location.starts_with(&dir.path().to_string_lossy().to_string()));
    }

    #[tokio::test]
    async fn test_paths_are_sharded() {
        let dir = tempdir().unwrap();
        let persister = create_test_persister(dir.path()).await;

        let location = persister.persist_bytes(b"sharded").await.unwrap();
        let relative = Path::new(&location).strip_prefix(dir.path()).unwrap();
        let components: Vec<_> = relative.components().collect();
        assert_eq!(components.len(), 3, "expected shard/shard/name layout");
    }

    #[tokio::test]
    async fn test_each_persist_gets_a_unique_path() {
        let dir = tempdir().unwrap();
        let persister = create_test_persister(dir.path()).await;

        let a = persister.persist_bytes(b"same contents").await.unwrap();
        let b = persister.persist_bytes(b"same contents").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_default_datastore_is_registered_once() {
        let dir = tempdir().unwrap();
        let persister = create_test_persister(dir.path()).await;

        persister.persist_bytes(b"one").await.unwrap();
        persister.persist_bytes(b"two").await.unwrap();

        let datastore = persister.default_datastore().await.unwrap();
        assert_eq!(datastore.kind, DATASTORE_KIND_FILE);
        assert_eq!(datastore.uri, dir.path().to_string_lossy());
    }
}
