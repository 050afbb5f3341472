//! Cumulative view/clone traffic with persistent window accumulation.
//!
//! GitHub exposes at most 14 days of traffic per repository, so each pass
//! folds the new slice of the window into the persistent counters and
//! advances the stored window edges.

use crate::db::{Metric, TrafficStore};
use crate::github::GithubClient;
use anyhow::Result;
use chrono::{Duration, Utc};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{OnceCell, Semaphore};
use tracing as log;

/// Per-repo fan-out width; local so a single request cannot monopolise
/// the shared transport semaphore.
const FAN_OUT: usize = 10;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrafficTotal {
    pub count: u64,
    /// First calendar day covered by the counter.
    pub from_date: String,
}

pub struct TrafficCollector {
    gh: GithubClient,
    store: Arc<TrafficStore>,
    views: OnceCell<TrafficTotal>,
    clones: OnceCell<TrafficTotal>,
}

/// What one pass over the per-repo traffic endpoints found.
#[derive(Default)]
struct WindowSlice {
    /// Counts dated today; not yet persisted (today keeps changing).
    today_count: u64,
    /// Counts newer than the stored window edge.
    accumulated: u64,
    /// Every date seen past the stored edge, for first-seen tracking.
    dates: BTreeSet<String>,
}

/// Folds raw traffic payloads into a window slice. `last_date` is the
/// stored `date_to` edge; entries at or before it were counted already.
fn fold_entries(
    payloads: &[(String, serde_json::Value)],
    metric: Metric,
    last_date: &str,
    today: &str,
    yesterday: &str,
) -> WindowSlice {
    let mut slice = WindowSlice::default();
    slice.dates.insert(last_date.to_string());
    slice.dates.insert(yesterday.to_string());

    for (repo, payload) in payloads {
        let entries = payload[metric.as_str()].as_array();
        if entries.is_none() {
            log::debug!("no {} entries for {repo}", metric.as_str());
        }
        for entry in entries.into_iter().flatten() {
            let timestamp: String = entry["timestamp"]
                .as_str()
                .unwrap_or("")
                .chars()
                .take(10)
                .collect();
            let count = entry["count"].as_u64().unwrap_or(0);
            if timestamp == today {
                slice.today_count += count;
            } else if timestamp.as_str() > last_date {
                slice.accumulated += count;
                slice.dates.insert(timestamp);
            }
        }
    }

    if last_date == crate::db::traffic::EPOCH_DATE {
        slice.dates.remove(last_date);
    }
    slice
}

impl TrafficCollector {
    pub fn new(gh: GithubClient, store: Arc<TrafficStore>) -> Self {
        TrafficCollector {
            gh,
            store,
            views: OnceCell::new(),
            clones: OnceCell::new(),
        }
    }

    pub async fn views(&self, repos: &BTreeSet<String>) -> Result<&TrafficTotal> {
        self.views
            .get_or_try_init(|| self.fetch(Metric::Views, repos))
            .await
    }

    pub async fn clones(&self, repos: &BTreeSet<String>) -> Result<&TrafficTotal> {
        self.clones
            .get_or_try_init(|| self.fetch(Metric::Clones, repos))
            .await
    }

    async fn fetch(&self, metric: Metric, repos: &BTreeSet<String>) -> Result<TrafficTotal> {
        let row = self.store.read(metric)?;
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        let yesterday = (Utc::now().date_naive() - Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();

        let sem = Semaphore::new(FAN_OUT);
        let fetches = repos.iter().map(|repo| {
            let sem = &sem;
            let gh = &self.gh;
            async move {
                let _permit = sem.acquire().await.expect("traffic semaphore closed");
                let path = format!("repos/{repo}/traffic/{}", metric.as_str());
                (repo.clone(), gh.rest(&path, &[]).await)
            }
        });

        let mut payloads = Vec::new();
        for (repo, result) in join_all(fetches).await {
            match result {
                Ok(payload) => payloads.push((repo, payload)),
                Err(e) => {
                    log::warn!("failed to fetch {} traffic for {repo}: {e}", metric.as_str());
                }
            }
        }

        let slice = fold_entries(&payloads, metric, &row.date_to, &today, &yesterday);

        let count = row.count + slice.accumulated;
        self.store.set_count(metric, count)?;
        self.store.set_date_to(metric, &yesterday)?;

        let from_date = if row.date_from == crate::db::traffic::EPOCH_DATE {
            slice
                .dates
                .first()
                .cloned()
                .unwrap_or_else(|| yesterday.clone())
        } else {
            row.date_from.clone()
        };
        self.store.set_date_from(metric, &from_date)?;

        Ok(TrafficTotal {
            count: count + slice.today_count,
            from_date,
        })
    }
}
