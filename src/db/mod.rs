mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::error::Result;
use crate::payments::StripeClient;
use crate::session::SessionKeys;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Per-process application context, built once at startup and cloned into
/// every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Public storefront origin, used to build checkout redirect URLs
    pub base_url: String,
    pub stripe: StripeClient,
    pub sessions: SessionKeys,
    pub dev_mode: bool,
}

fn connection_manager(manager: SqliteConnectionManager) -> SqliteConnectionManager {
    manager.with_init(|conn| {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    })
}

/// Open a bounded pool over a SQLite file and make sure the schema exists.
pub fn create_pool(path: &str, max_size: u32) -> Result<DbPool> {
    let manager = connection_manager(SqliteConnectionManager::file(path));
    let pool = Pool::builder()
        .max_size(max_size)
        .connection_timeout(Duration::from_secs(10))
        .build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    init_db(&conn)?;

    Ok(pool)
}

/// Single-connection in-memory pool. Every checkout sees the same database,
/// which is what tests and throwaway dev runs need.
pub fn create_memory_pool() -> Result<DbPool> {
    let manager = connection_manager(SqliteConnectionManager::memory());
    let pool = Pool::builder()
        .max_size(1)
        .connection_timeout(Duration::from_secs(5))
        .build(manager)?;

    init_db(&*pool.get()?)?;

    Ok(pool)
}
