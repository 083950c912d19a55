use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Mirrors [`ethp_ledger`]'s ledger contract result for `add` (§4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Ok,
    Duplicate,
    Error(String),
}

/// Most-recent-first cap applied to both ledgers' in-memory view (I5).
pub const LEDGER_CAP: usize = 100;

/// Opens (creating if necessary) the shared SQLite store and runs
/// migrations. Both ledgers point at the same file, each owning a disjoint
/// table (§5).
pub async fn open_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().max_connections(8).connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;
    Ok(pool)
}

pub(crate) fn now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}
