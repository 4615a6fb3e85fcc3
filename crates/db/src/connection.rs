use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

pub type DbPool = sqlx::SqlitePool;

/// How long a writer waits on a locked database before giving up. Decision
/// recording and sequence issuing serialize on the write lock.
const WRITE_LOCK_WAIT: Duration = Duration::from_secs(5);

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

/// Opens a pool with referential integrity enforced on every connection.
///
/// File databases are created on first use and run in WAL mode so readers
/// listing pending work do not block approvers. In-memory databases keep
/// SQLite's default journal.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .connect_with(store_options(database_url)?)
        .await
}

fn store_options(database_url: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .foreign_keys(true)
        .busy_timeout(WRITE_LOCK_WAIT);
    if is_in_memory(database_url) {
        return Ok(options);
    }
    Ok(options
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal))
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

#[cfg(test)]
mod tests {
    use super::{connect_with_settings, is_in_memory};

    #[tokio::test]
    async fn every_connection_enforces_foreign_keys() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        let enforced: i64 =
            sqlx::query_scalar("PRAGMA foreign_keys").fetch_one(&pool).await.expect("pragma");
        assert_eq!(enforced, 1);
    }

    #[tokio::test]
    async fn file_database_is_created_in_wal_mode() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("fresh.db");
        let url = format!("sqlite://{}", path.display());

        let pool = connect_with_settings(&url, 2, 5).await.expect("connect");
        let journal: String =
            sqlx::query_scalar("PRAGMA journal_mode").fetch_one(&pool).await.expect("pragma");

        assert_eq!(journal, "wal");
        assert!(path.exists());
    }

    #[test]
    fn memory_urls_are_recognised() {
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite://file:signoff?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite://data/signoff.db"));
    }
}
