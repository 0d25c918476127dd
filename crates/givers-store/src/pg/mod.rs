//! PostgreSQL Backend
//!
//! diesel-async over a deadpool pool. Every statement runs under a 10 s
//! deadline; webhook transactions additionally `SET LOCAL statement_timeout`.

mod directory;
mod donations;
mod models;
mod schema;
mod tx;

use diesel::Connection;
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, StoreError};

pub type DbPool = Pool<AsyncPgConnection>;
pub type DbConnection = Object<AsyncPgConnection>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Deadline for a single statement or pool checkout
pub(crate) const STATEMENT_TIMEOUT: Duration = Duration::from_secs(10);

const CONNECT_ATTEMPTS: u32 = 5;

/// Run `fut` under [`STATEMENT_TIMEOUT`]
pub(crate) async fn bounded<T, E, F>(fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    StoreError: From<E>,
{
    Ok(tokio::time::timeout(STATEMENT_TIMEOUT, fut).await??)
}

/// Build the pool and make sure the database answers
pub async fn create_pool(database_url: &str, max_connections: usize) -> Result<Arc<DbPool>> {
    tracing::info!(url = %mask_database_url(database_url), "Setting up database connection pool");

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder(manager)
        .max_size(max_connections)
        .build()
        .map_err(|e| StoreError::Database(format!("failed to create pool: {e}")))?;

    let mut last_error = StoreError::Database("no connection attempt made".into());
    for attempt in 1..=CONNECT_ATTEMPTS {
        match tokio::time::timeout(Duration::from_secs(15), pool.get()).await {
            Ok(Ok(_conn)) => {
                tracing::info!(attempt, "Database connection established");
                return Ok(Arc::new(pool));
            }
            Ok(Err(e)) => {
                tracing::warn!(attempt, error = %e, "Database connection failed");
                last_error = e.into();
            }
            Err(_) => {
                tracing::warn!(attempt, "Database connection timed out");
                last_error = StoreError::Timeout;
            }
        }

        if attempt < CONNECT_ATTEMPTS {
            let wait = Duration::from_secs(2_u64.pow(attempt - 1));
            tracing::info!(wait_secs = wait.as_secs(), "Waiting before retry");
            tokio::time::sleep(wait).await;
        }
    }

    tracing::error!("All database connection attempts failed");
    Err(last_error)
}

/// Apply pending embedded migrations on a dedicated blocking connection
pub async fn run_migrations(database_url: &str) -> Result<usize> {
    let url = database_url.to_string();
    let applied = tokio::task::spawn_blocking(move || -> Result<usize> {
        let mut conn = AsyncConnectionWrapper::<AsyncPgConnection>::establish(&url)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let versions = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(versions.len())
    })
    .await
    .map_err(|e| StoreError::Database(format!("migration task failed: {e}")))??;

    tracing::info!(applied, "Database migrations complete");
    Ok(applied)
}

/// Hide the password part of a connection URL for logging
pub fn mask_database_url(url: &str) -> String {
    match url.find('@') {
        Some(at_pos) => {
            let (before_at, after_at) = url.split_at(at_pos);
            match before_at.rfind(':') {
                Some(colon_pos) if before_at[..colon_pos].contains("//") => {
                    format!("{}:****{after_at}", &before_at[..colon_pos])
                }
                _ => "postgres://****@****".to_string(),
            }
        }
        None => "Invalid URL format".to_string(),
    }
}

/// PostgreSQL implementation of every storage trait
#[derive(Clone)]
pub struct PgStore {
    pool: Arc<DbPool>,
}

impl PgStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    pub(crate) async fn conn(&self) -> Result<DbConnection> {
        bounded(self.pool.get()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_database_url() {
        assert_eq!(
            mask_database_url("postgres://givers:s3cret@db:5432/givers"),
            "postgres://givers:****@db:5432/givers"
        );
        assert_eq!(mask_database_url("postgres://db/givers"), "Invalid URL format");
    }
}
