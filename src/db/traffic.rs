//! Persistent view/clone counters.
//!
//! GitHub only exposes a sliding 14-day traffic window, so the service
//! accumulates counts and window edges here as the window slides. One row
//! per metric; a fresh connection per operation so concurrent requests
//! serialise on SQLite's own WAL locking.

use anyhow::{Context as _, Result};
use rusqlite::params;
use std::path::PathBuf;

/// Sentinel for "never seen".
pub const EPOCH_DATE: &str = "0000-00-00";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    Views,
    Clones,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Views => "views",
            Metric::Clones => "clones",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrafficRow {
    pub count: u64,
    pub date_from: String,
    pub date_to: String,
}

pub struct TrafficStore {
    path: PathBuf,
}

impl TrafficStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let store = TrafficStore { path };
        let conn = store.connect()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS traffic_stats (
                metric TEXT PRIMARY KEY,
                count INTEGER NOT NULL,
                date_from TEXT NOT NULL,
                date_to TEXT NOT NULL
            );",
        )
        .context("creating traffic_stats")?;
        for metric in [Metric::Views, Metric::Clones] {
            conn.execute(
                "INSERT INTO traffic_stats (metric, count, date_from, date_to)
                 VALUES (?, 0, ?, ?)
                 ON CONFLICT (metric) DO NOTHING",
                params![metric.as_str(), EPOCH_DATE, EPOCH_DATE],
            )?;
        }
        Ok(store)
    }

    fn connect(&self) -> Result<rusqlite::Connection> {
        crate::db::open(&self.path)
    }

    pub fn read(&self, metric: Metric) -> Result<TrafficRow> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT count, date_from, date_to FROM traffic_stats WHERE metric = ?",
                [metric.as_str()],
                |row| {
                    Ok(TrafficRow {
                        count: row.get(0)?,
                        date_from: row.get(1)?,
                        date_to: row.get(2)?,
                    })
                },
            )
            .with_context(|| format!("reading {} row", metric.as_str()))?;
        Ok(row)
    }

    pub fn set_count(&self, metric: Metric, count: u64) -> Result<()> {
        self.connect()?.execute(
            "UPDATE traffic_stats SET count = ? WHERE metric = ?",
            params![count, metric.as_str()],
        )?;
        Ok(())
    }

    pub fn set_date_from(&self, metric: Metric, date: &str) -> Result<()> {
        self.connect()?.execute(
            "UPDATE traffic_stats SET date_from = ? WHERE metric = ?",
            params![date, metric.as_str()],
        )?;
        Ok(())
    }

    pub fn set_date_to(&self, metric: Metric, date: &str) -> Result<()> {
        self.connect()?.execute(
            "UPDATE traffic_stats SET date_to = ? WHERE metric = ?",
            params![date, metric.as_str()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::temp_db_path;

    #[test]
    fn rows_are_seeded_on_first_open() {
        let path = temp_db_path("traffic-seed");
        let store = TrafficStore::new(path.clone()).unwrap();
        let row = store.read(Metric::Views).unwrap();
        assert_eq!(
            row,
            TrafficRow {
                count: 0,
                date_from: EPOCH_DATE.to_string(),
                date_to: EPOCH_DATE.to_string(),
            }
        );
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn updates_survive_reopen() {
        let path = temp_db_path("traffic-reopen");
        {
            let store = TrafficStore::new(path.clone()).unwrap();
            store.set_count(Metric::Clones, 42).unwrap();
            store.set_date_from(Metric::Clones, "2026-01-01").unwrap();
            store.set_date_to(Metric::Clones, "2026-01-14").unwrap();
        }
        let store = TrafficStore::new(path.clone()).unwrap();
        let row = store.read(Metric::Clones).unwrap();
        assert_eq!(row.count, 42);
        assert_eq!(row.date_from, "2026-01-01");
        assert_eq!(row.date_to, "2026-01-14");
        // Reseeding must not clobber existing rows.
        assert_eq!(store.read(Metric::Views).unwrap().count, 0);
        std::fs::remove_file(path).ok();
    }
}
