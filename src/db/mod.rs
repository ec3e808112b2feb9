//! Database pool initialization.
//!
//! SYSTEM CONTEXT
//! ==============
//! The sync server never writes to the database. It reads board membership
//! for subscribe-time access checks; the schema belongs to the CRUD layer.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Initialize the `PostgreSQL` connection pool.
///
/// # Errors
///
/// Returns an error if the initial connection fails.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
