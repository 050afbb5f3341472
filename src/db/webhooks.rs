//! Webhook registrations.

use anyhow::{Context as _, Result};
use rusqlite::params;
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

static MIGRATIONS: &[&str] = &[
    r#"
CREATE TABLE webhooks (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    url TEXT NOT NULL,
    conditions TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX idx_webhooks_user ON webhooks (username);
    "#,
];

#[derive(Clone, Debug, serde::Serialize)]
pub struct Webhook {
    pub id: String,
    pub username: String,
    pub url: String,
    pub conditions: serde_json::Value,
    pub created_at: Option<String>,
}

pub struct WebhookStore {
    conn: Mutex<rusqlite::Connection>,
}

impl WebhookStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut conn = crate::db::open(&path)?;
        crate::db::run_migrations(&mut conn, MIGRATIONS)?;
        Ok(WebhookStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create(
        &self,
        username: &str,
        url: &str,
        conditions: &serde_json::Value,
    ) -> Result<Webhook> {
        let id = Uuid::new_v4().to_string();
        self.lock()
            .execute(
                "INSERT INTO webhooks (id, username, url, conditions) VALUES (?, ?, ?, ?)",
                params![id, username.to_lowercase(), url, conditions.to_string()],
            )
            .context("inserting webhook")?;
        Ok(Webhook {
            id,
            username: username.to_lowercase(),
            url: url.to_string(),
            conditions: conditions.clone(),
            created_at: None,
        })
    }

    pub fn list_by_user(&self, username: &str) -> Result<Vec<Webhook>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, username, url, conditions, created_at FROM webhooks
             WHERE username = ? ORDER BY created_at",
        )?;
        let hooks = stmt
            .query_map([username.to_lowercase()], deserialize_webhook)?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(hooks)
    }

    pub fn get(&self, id: &str) -> Result<Option<Webhook>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, username, url, conditions, created_at FROM webhooks WHERE id = ?",
            [id],
            deserialize_webhook,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            e => Err(e.into()),
        })
    }

    /// Returns true when a row was actually deleted.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let deleted = self
            .lock()
            .execute("DELETE FROM webhooks WHERE id = ?", [id])?;
        Ok(deleted > 0)
    }
}

fn deserialize_webhook(row: &rusqlite::Row<'_>) -> std::result::Result<Webhook, rusqlite::Error> {
    let conditions: String = row.get(3)?;
    Ok(Webhook {
        id: row.get(0)?,
        username: row.get(1)?,
        url: row.get(2)?,
        conditions: serde_json::from_str(&conditions).unwrap_or(serde_json::Value::Null),
        created_at: row.get(4)?,
    })
}
