use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DatabaseSettings;
use crate::store::{PgVideoStore, SqliteVideoStore, VideoStore};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connects to the configured database and makes sure the schema exists.
///
/// `postgres://` and `postgresql://` URLs get the Postgres store, `sqlite:`
/// URLs the SQLite one.
#[tracing::instrument(name = "Initialize video store", skip(settings), fields(backend))]
pub async fn init_db(settings: &DatabaseSettings, max_page_size: u32) -> anyhow::Result<Arc<dyn VideoStore>> {
    let url = settings.url.as_str();

    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        tracing::Span::current().record("backend", "postgres");
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;
        let store = PgVideoStore::new(pool, max_page_size);
        store.ensure_schema().await?;
        return Ok(Arc::new(store));
    }

    if url.starts_with("sqlite:") {
        tracing::Span::current().record("backend", "sqlite");
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // Every connection to an in-memory database gets its own database, so
        // the pool must hold exactly one that never expires.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(settings.max_connections.max(1))
        };
        let pool = pool_options
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await?;
        let store = SqliteVideoStore::new(pool, max_page_size);
        store.ensure_schema().await?;
        return Ok(Arc::new(store));
    }

    anyhow::bail!("Unsupported DATABASE_URL scheme, expected postgres:// or sqlite:")
}
