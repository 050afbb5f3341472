//! Append-only statistics snapshots for temporal queries.

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use std::path::PathBuf;
use std::sync::Mutex;

static MIGRATIONS: &[&str] = &[
    r#"
CREATE TABLE snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX idx_snapshots_user_time ON snapshots (username, timestamp);
    "#,
];

pub struct SnapshotStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SnapshotStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut conn = crate::db::open(&path)?;
        crate::db::run_migrations(&mut conn, MIGRATIONS)?;
        Ok(SnapshotStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends a snapshot; the timestamp defaults to now (UTC).
    pub fn save(
        &self,
        username: &str,
        data: &serde_json::Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let ts = timestamp.unwrap_or_else(Utc::now).to_rfc3339();
        self.lock()
            .execute(
                "INSERT INTO snapshots (username, timestamp, data) VALUES (?, ?, ?)",
                params![username.to_lowercase(), ts, data.to_string()],
            )
            .context("inserting snapshot")?;
        Ok(())
    }

    /// Snapshots for a user in ascending timestamp order, each enriched
    /// with a `date` field (the timestamp's calendar day).
    pub fn query(
        &self,
        username: &str,
        from: Option<&str>,
        to: Option<&str>,
        limit: u32,
    ) -> Result<Vec<serde_json::Value>> {
        let mut sql = String::from("SELECT timestamp, data FROM snapshots WHERE username = ?");
        let mut args: Vec<String> = vec![username.to_lowercase()];
        if let Some(from) = from {
            sql.push_str(" AND timestamp >= ?");
            args.push(from.to_string());
        }
        if let Some(to) = to {
            sql.push_str(" AND timestamp <= ?");
            args.push(format!("{to}T23:59:59"));
        }
        sql.push_str(&format!(" ORDER BY timestamp ASC LIMIT {limit}"));

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args), |row| {
                let ts: String = row.get(0)?;
                let data: String = row.get(1)?;
                Ok((ts, data))
            })?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        rows.into_iter()
            .map(|(ts, data)| {
                let mut entry: serde_json::Value =
                    serde_json::from_str(&data).context("decoding snapshot data")?;
                entry["date"] = serde_json::Value::String(ts.chars().take(10).collect());
                Ok(entry)
            })
            .collect()
    }

    /// The most recent snapshot for a user, if any.
    pub fn latest(&self, username: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT timestamp, data FROM snapshots
                 WHERE username = ? ORDER BY timestamp DESC LIMIT 1",
                [username.to_lowercase()],
                |row| {
                    let ts: String = row.get(0)?;
                    let data: String = row.get(1)?;
                    Ok((ts, data))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })?;
        match row {
            None => Ok(None),
            Some((ts, data)) => {
                let mut entry: serde_json::Value =
                    serde_json::from_str(&data).context("decoding snapshot data")?;
                entry["date"] = serde_json::Value::String(ts.chars().take(10).collect());
                Ok(Some(entry))
            }
        }
    }
}
