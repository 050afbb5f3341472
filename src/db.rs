//! SQLite-backed persistence: traffic counters, snapshots, webhooks.

use anyhow::{Context as _, Result};
use std::path::Path;

pub mod snapshots;
pub mod traffic;
pub mod webhooks;

pub use snapshots::SnapshotStore;
pub use traffic::{Metric, TrafficRow, TrafficStore};
pub use webhooks::{Webhook, WebhookStore};

/// Opens a connection with the pragmas every store relies on.
pub(crate) fn open(path: &Path) -> Result<rusqlite::Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let conn = rusqlite::Connection::open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Runs the numbered migrations that have not been applied yet, tracked
/// through `pragma user_version`.
pub(crate) fn run_migrations(
    conn: &mut rusqlite::Connection,
    migrations: &[&'static str],
) -> Result<()> {
    let version: i64 =
        conn.query_row("select user_version from pragma_user_version", [], |row| {
            row.get(0)
        })?;
    for (id, sql) in migrations.iter().enumerate().skip(version as usize) {
        let tx = conn.transaction()?;
        tx.execute_batch(sql)
            .with_context(|| format!("running migration {id}"))?;
        tx.pragma_update(None, "user_version", id as i64 + 1)?;
        tx.commit()?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn temp_db_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("octostats-test-{name}-{}.db", uuid::Uuid::new_v4()))
}
