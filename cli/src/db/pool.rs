//! Database connection pool management.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Type alias for the database pool.
pub type Pool = SqlitePool;

/// How long a query waits on a database another process is writing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a read-only pool on an existing SQLite file.
///
/// Neither the reader's database nor a library's is ever written through
/// this pool; library writes go through `calibredb`.
pub async fn open_read_only(path: &Path) -> Result<Pool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .create_if_missing(false)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}
