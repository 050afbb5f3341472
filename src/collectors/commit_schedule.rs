//! Weekly commit schedule, bounded by the user's local week.

use crate::collectors::Environment;
use crate::github::GithubClient;
use anyhow::Result;
use chrono::{DateTime, Datelike as _, Duration, NaiveTime, TimeZone as _, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr as _;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::OnceCell;
use tracing as log;

const PAGE_SIZE: u64 = 100;
const MESSAGE_LIMIT: usize = 120;

#[derive(Clone, Debug, serde::Serialize, PartialEq)]
pub struct CommitEvent {
    pub repo: String,
    pub sha: String,
    pub description: String,
    pub is_private: bool,
    /// RFC 3339, in the commit's original offset.
    pub timestamp: String,
}

/// Resolves an IANA timezone name, falling back to UTC.
fn resolve_timezone(name: &str) -> Tz {
    match Tz::from_str(name) {
        Ok(tz) => tz,
        Err(_) => {
            log::warn!("invalid timezone {name:?}; falling back to UTC");
            Tz::UTC
        }
    }
}

/// The current local week as half-open `[monday 00:00, next monday)`.
fn week_window(tz: Tz, now_utc: DateTime<Utc>) -> (DateTime<Tz>, DateTime<Tz>) {
    let now_local = now_utc.with_timezone(&tz);
    let week_start_date =
        now_local.date_naive() - Duration::days(now_local.weekday().num_days_from_monday() as i64);
    let start_naive = week_start_date.and_time(NaiveTime::MIN);
    let week_start = tz
        .from_local_datetime(&start_naive)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&start_naive));
    (week_start, week_start + Duration::days(7))
}

fn first_message_line(message: &str) -> String {
    let line = message.lines().next().unwrap_or("Commit");
    if line.is_empty() {
        return "Commit".to_string();
    }
    line.chars().take(MESSAGE_LIMIT).collect()
}

fn extract_timestamp(commit: &serde_json::Value) -> Option<DateTime<chrono::FixedOffset>> {
    let source = commit
        .pointer("/commit/author/date")
        .or_else(|| commit.pointer("/commit/committer/date"))?
        .as_str()?;
    DateTime::parse_from_rfc3339(source).ok()
}

pub struct CommitScheduleCollector {
    env: Arc<Environment>,
    gh: GithubClient,
    visibility: Mutex<HashMap<String, bool>>,
    result: OnceCell<Vec<CommitEvent>>,
}

impl CommitScheduleCollector {
    pub fn new(env: Arc<Environment>, gh: GithubClient) -> Self {
        CommitScheduleCollector {
            env,
            gh,
            visibility: Mutex::new(HashMap::new()),
            result: OnceCell::new(),
        }
    }

    /// Commits authored by the user inside the current local week, sorted
    /// by timestamp.
    pub async fn weekly_schedule(&self, repos: &BTreeSet<String>) -> Result<&Vec<CommitEvent>> {
        self.result
            .get_or_try_init(|| self.fetch(repos))
            .await
    }

    async fn fetch(&self, repos: &BTreeSet<String>) -> Result<Vec<CommitEvent>> {
        let tz = resolve_timezone(&self.env.timezone);
        let (week_start, week_end) = week_window(tz, Utc::now());
        let since_utc = week_start.with_timezone(&Utc).to_rfc3339();
        let until_utc = week_end.with_timezone(&Utc).to_rfc3339();

        let mut entries = Vec::new();
        for repo in repos {
            let is_private = self.is_private(repo).await;
            let commits = match self
                .fetch_repo_commits(repo, &since_utc, &until_utc)
                .await
            {
                Ok(commits) => commits,
                Err(e) => {
                    log::warn!("skipping weekly commits for {repo}: {e}");
                    continue;
                }
            };

            for commit in commits {
                let Some(timestamp) = extract_timestamp(&commit) else {
                    continue;
                };
                let local = timestamp.with_timezone(&tz);
                if local < week_start || local >= week_end {
                    continue;
                }

                let sha: String = commit["sha"].as_str().unwrap_or("").chars().take(40).collect();
                let message = commit
                    .pointer("/commit/message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("");
                let description = if is_private && self.env.mask_private {
                    sha.chars().take(7).collect()
                } else {
                    first_message_line(message)
                };

                entries.push(CommitEvent {
                    repo: repo.clone(),
                    sha,
                    description,
                    is_private,
                    timestamp: timestamp.to_rfc3339(),
                });
            }
        }

        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    async fn is_private(&self, repo: &str) -> bool {
        if let Some(known) = self
            .visibility
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(repo)
        {
            return *known;
        }
        let is_private = match self.gh.rest(&format!("repos/{repo}"), &[]).await {
            Ok(payload) => payload["private"].as_bool().unwrap_or(false),
            Err(e) => {
                log::debug!("visibility lookup failed for {repo}: {e}");
                false
            }
        };
        self.visibility
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(repo.to_string(), is_private);
        is_private
    }

    /// Pages `/commits` until a partial page signals the end.
    async fn fetch_repo_commits(
        &self,
        repo: &str,
        since_utc: &str,
        until_utc: &str,
    ) -> Result<Vec<serde_json::Value>> {
        let mut page = 1u64;
        let mut all = Vec::new();
        loop {
            let result = self
                .gh
                .rest(
                    &format!("repos/{repo}/commits"),
                    &[
                        ("author", self.env.username.clone()),
                        ("since", since_utc.to_string()),
                        ("until", until_utc.to_string()),
                        ("per_page", PAGE_SIZE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;
            let Some(batch) = result.as_array() else {
                break;
            };
            if batch.is_empty() {
                break;
            }
            let len = batch.len();
            all.extend(batch.iter().cloned());
            if (len as u64) < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok(all)
    }
}
