pub mod config;
pub mod observability;
pub mod routes;
pub mod server;
pub mod sweeper;

use std::sync::Arc;

use gatekeep_auth::{InMemorySessionStorage, SessionStorage};
use gatekeep_auth_postgres::PostgresSessionStorage;

pub use config::{AppConfig, LoggingConfig, PostgresStorageConfig, ServerConfig, StorageBackend};
pub use observability::{LogControl, init_tracing};
pub use server::{AppState, GatekeepServer, build_app};
pub use sweeper::spawn_sweeper;

/// Create the session storage backend named by the configuration.
///
/// ## Backends
///
/// - **memory**: sessions live in this process only
/// - **postgres**: connects, runs the schema migration, and shares sessions
///   across instances
pub async fn create_session_storage(
    cfg: &config::StorageConfig,
) -> anyhow::Result<Arc<dyn SessionStorage>> {
    match cfg.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory session storage; sessions are lost on restart");
            Ok(Arc::new(InMemorySessionStorage::new()))
        }
        StorageBackend::Postgres => {
            let pg = cfg
                .postgres
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("storage.postgres is not configured"))?;
            let storage = PostgresSessionStorage::connect(&pg.url, pg.pool_size).await?;
            storage.migrate().await?;
            tracing::info!(pool_size = pg.pool_size, "PostgreSQL session storage ready");
            Ok(Arc::new(storage))
        }
    }
}
