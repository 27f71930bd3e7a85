use anyhow::{Context, Result};
use std::path::Path;
use tokio_rusqlite::Connection;

pub mod progress;

pub use progress::SqliteProgressStore;

/// Open (or create) the progress database at `path`.
///
/// The file is shared by the server and any `bkpanel run` processes, so it
/// runs in WAL mode with a busy timeout instead of failing on lock contention.
pub async fn init(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let conn = Connection::open(path)
        .await
        .with_context(|| format!("Failed to open progress database {}", path.display()))?;

    conn.call(|conn| {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;

        let schema = include_str!("schema.sql");
        conn.execute_batch(schema)?;

        Ok::<(), tokio_rusqlite::rusqlite::Error>(())
    })
    .await?;

    Ok(conn)
}
