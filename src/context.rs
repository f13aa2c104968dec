/// Application context and dependency injection
use crate::{
    config::MediaConfig,
    db,
    error::MediaResult,
    federation::{
        DnsSrvResolver, FederationClient, HttpWellKnownClient, ResolverCache, ServerResolver,
    },
    media::MediaService,
    store::{media_store::MediaStore, persister::FilePersister, registry::DatastoreRegistry},
    thumbnail::{ThumbnailService, Thumbnailer},
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// Application context holding all shared services
///
/// Constructed once at startup; everything here is shared by all request
/// handlers. The resolver cache in particular is the process-wide endpoint
/// memo — there is exactly one, owned here, with no global statics.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<MediaConfig>,
    pub db: SqlitePool,
    pub registry: DatastoreRegistry,
    pub persister: Arc<FilePersister>,
    pub resolver: Arc<ServerResolver>,
    pub federation_client: Arc<FederationClient>,
    pub media: Arc<MediaService>,
    pub thumbnails: Arc<ThumbnailService>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: MediaConfig) -> MediaResult<Self> {
        config.validate()?;

        Self::ensure_directories(&config).await?;

        let pool = db::create_pool(&config.database.path, db::DatabaseOptions::default()).await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        let registry = DatastoreRegistry::new(pool.clone());
        let persister = Arc::new(FilePersister::new(
            registry.clone(),
            config.datastores.default_path.clone(),
        ));

        let federation_timeout = Duration::from_secs(config.timeouts.federation);
        let resolver = Arc::new(ServerResolver::new(
            Arc::new(ResolverCache::new()),
            Arc::new(HttpWellKnownClient::new(federation_timeout)?),
            Arc::new(DnsSrvResolver::from_system_conf()?),
        ));
        let federation_client = Arc::new(FederationClient::new(federation_timeout));

        let store = MediaStore::new(pool.clone());
        let media = Arc::new(MediaService::new(
            store.clone(),
            persister.clone(),
            resolver.clone(),
            federation_client.clone(),
            config.hostname.clone(),
        ));

        let thumbnailer = Thumbnailer::new(
            persister.clone(),
            config.thumbnails.animated_types.clone(),
        );
        let thumbnails = Arc::new(ThumbnailService::new(store, thumbnailer));

        Ok(Self {
            config: Arc::new(config),
            db: pool,
            registry,
            persister,
            resolver,
            federation_client,
            media,
            thumbnails,
        })
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &MediaConfig) -> MediaResult<()> {
        tokio::fs::create_dir_all(&config.datastores.default_path).await?;
        if let Some(parent) = config.database.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}
