/// Datastore registry
///
/// Maps storage destination URIs to stable generated identifiers, creating
/// records on first use. Uniqueness on `uri` is enforced by the database;
/// concurrent creators race on the insert and the loser adopts the winner's
/// record.
use crate::{
    error::{MediaError, MediaResult},
    store::{generate_secure_id, is_unique_violation, models::Datastore, GENERATED_ID_LENGTH},
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, error};

/// Registry of known datastores
#[derive(Clone)]
pub struct DatastoreRegistry {
    db: SqlitePool,
}

impl DatastoreRegistry {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Return the datastore for `uri`, creating it if none exists
    ///
    /// Two concurrent calls for the same `uri` may both miss the initial
    /// lookup; at most one insert succeeds and both callers observe the
    /// same record.
    pub async fn get_or_create_by_uri(&self, kind: &str, uri: &str) -> MediaResult<Datastore> {
        if let Some(existing) = self.get_by_uri(uri).await? {
            return Ok(existing);
        }

        let datastore = Datastore {
            datastore_id: generate_secure_id(GENERATED_ID_LENGTH),
            kind: kind.to_string(),
            uri: uri.to_string(),
        };

        match self.insert(&datastore).await {
            Ok(()) => {
                debug!("Created datastore {} for {}", datastore.datastore_id, uri);
                Ok(datastore)
            }
            Err(MediaError::Database(e)) if is_unique_violation(&e) => {
                debug!("Datastore for {} was created concurrently, reusing it", uri);
                self.get_by_uri(uri).await?.ok_or_else(|| {
                    MediaError::Internal(format!("Datastore for {} vanished after conflict", uri))
                })
            }
            Err(e) => {
                error!("Error creating datastore for {}: {}", uri, e);
                Err(e)
            }
        }
    }

    /// Look up a datastore by its generated identifier
    pub async fn get_by_id(&self, datastore_id: &str) -> MediaResult<Datastore> {
        let row = sqlx::query(
            r#"
            SELECT datastore_id, kind, uri
            FROM datastores
            WHERE datastore_id = ?1
            "#,
        )
        .bind(datastore_id)
        .fetch_optional(&self.db)
        .await
        .map_err(MediaError::Database)?;

        match row {
            Some(row) => Ok(Datastore {
                datastore_id: row.try_get("datastore_id")?,
                kind: row.try_get("kind")?,
                uri: row.try_get("uri")?,
            }),
            None => Err(MediaError::NotFound(format!(
                "No datastore with id {}",
                datastore_id
            ))),
        }
    }

    async fn get_by_uri(&self, uri: &str) -> MediaResult<Option<Datastore>> {
        let row = sqlx::query(
            r#"
            SELECT datastore_id, kind, uri
            FROM datastores
            WHERE uri = ?1
            "#,
        )
        .bind(uri)
        .fetch_optional(&self.db)
        .await
        .map_err(MediaError::Database)?;

        if let Some(row) = row {
            Ok(Some(Datastore {
                datastore_id: row.try_get("datastore_id")?,
                kind: row.try_get("kind")?,
                uri: row.try_get("uri")?,
            }))
        } else {
            Ok(None)
        }
    }

    async fn insert(&self, datastore: &Datastore) -> MediaResult<()> {
        sqlx::query(
            r#"
            INSERT INTO datastores (datastore_id, kind, uri)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(&datastore.datastore_id)
        .bind(&datastore.kind)
        .bind(&datastore.uri)
        .execute(&self.db)
        .await
        .map_err(MediaError::Database)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::tempdir;

    async fn create_test_registry() -> DatastoreRegistry {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        DatastoreRegistry::new(pool)
    }

    #[tokio::test]
    async fn test_create_and_reuse_by_uri() {
        let registry = create_test_registry().await;

        let first = registry
            .get_or_create_by_uri("file", "/tmp/media-a")
            .await
            .unwrap();
        assert_eq!(first.kind, "file");
        assert_eq!(first.uri, "/tmp/media-a");
        assert_eq!(first.datastore_id.len(), 32);

        // Repeated calls return the same identifier
        let second = registry
            .get_or_create_by_uri("file", "/tmp/media-a")
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_distinct_uris_get_distinct_ids() {
        let registry = create_test_registry().await;

        let a = registry.get_or_create_by_uri("file", "/tmp/a").await.unwrap();
        let b = registry.get_or_create_by_uri("file", "/tmp/b").await.unwrap();
        assert_ne!(a.datastore_id, b.datastore_id);
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let registry = create_test_registry().await;

        let created = registry.get_or_create_by_uri("file", "/tmp/c").await.unwrap();
        let fetched = registry.get_by_id(&created.datastore_id).await.unwrap();
        assert_eq!(created, fetched);

        let missing = registry.get_by_id("does-not-exist").await;
        assert!(matches!(missing, Err(MediaError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_creation_converges() {
        // File-backed pool so every task can hold its own connection
        let dir = tempdir().unwrap();
        let pool = db::create_pool(&dir.path().join("registry.sqlite"), db::DatabaseOptions::default())
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();
        let registry = DatastoreRegistry::new(pool);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.get_or_create_by_uri("file", "/tmp/shared").await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().datastore_id);
        }

        ids.dedup();
        assert_eq!(ids.len(), 1, "all callers must observe one datastore");
    }
}
