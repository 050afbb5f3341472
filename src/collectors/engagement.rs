//! Engagement metrics: pull requests, issues, collaborators.

use crate::github::GithubClient;
use anyhow::Result;
use futures::future::join_all;
use std::collections::{BTreeSet, HashSet};
use tokio::sync::{OnceCell, Semaphore};
use tracing as log;

const FAN_OUT: usize = 10;

/// GitHub's issues endpoint mixes pull requests in; they are told apart
/// by the second-to-last path segment of `html_url` (`/issues/` for real
/// issues, `/pull/` for PRs).
fn is_issue_url(url: &str) -> bool {
    let mut segments = url.rsplit('/');
    segments.next();
    segments.next() == Some("issues")
}

pub struct EngagementCollector {
    gh: GithubClient,
    more_collabs: u64,
    pull_requests: OnceCell<u64>,
    issues: OnceCell<u64>,
    collaborators: OnceCell<u64>,
}

impl EngagementCollector {
    pub fn new(gh: GithubClient, more_collabs: u64) -> Self {
        EngagementCollector {
            gh,
            more_collabs,
            pull_requests: OnceCell::new(),
            issues: OnceCell::new(),
            collaborators: OnceCell::new(),
        }
    }

    /// Fans out one REST call per repository; failures count as empty.
    async fn fetch_per_repo(
        &self,
        repos: &BTreeSet<String>,
        path_suffix: &str,
    ) -> Vec<(String, serde_json::Value)> {
        let sem = Semaphore::new(FAN_OUT);
        let fetches = repos.iter().map(|repo| {
            let sem = &sem;
            let gh = &self.gh;
            let path = format!("repos/{repo}/{path_suffix}");
            async move {
                let _permit = sem.acquire().await.expect("engagement semaphore closed");
                (repo.clone(), gh.rest(&path, &[]).await)
            }
        });
        join_all(fetches)
            .await
            .into_iter()
            .filter_map(|(repo, result)| match result {
                Ok(payload) => Some((repo, payload)),
                Err(e) => {
                    log::warn!("failed to fetch {path_suffix} for {repo}: {e}");
                    None
                }
            })
            .collect()
    }

    pub async fn pull_requests(&self, repos: &BTreeSet<String>) -> Result<u64> {
        self.pull_requests
            .get_or_try_init(|| async {
                let payloads = self.fetch_per_repo(repos, "pulls?state=all").await;
                let total = payloads
                    .iter()
                    .flat_map(|(_, payload)| payload.as_array().into_iter().flatten())
                    .filter(|entry| entry.is_object())
                    .count() as u64;
                Ok(total)
            })
            .await
            .map(|total| *total)
    }

    pub async fn issues(&self, repos: &BTreeSet<String>) -> Result<u64> {
        self.issues
            .get_or_try_init(|| async {
                let payloads = self.fetch_per_repo(repos, "issues?state=all").await;
                let total = payloads
                    .iter()
                    .flat_map(|(_, payload)| payload.as_array().into_iter().flatten())
                    .filter(|entry| {
                        entry["html_url"].as_str().is_some_and(is_issue_url)
                    })
                    .count() as u64;
                Ok(total)
            })
            .await
            .map(|total| *total)
    }

    /// `|collaborator logins ∪ contributors| - 1` (the user themselves)
    /// plus the configured offset.
    pub async fn collaborators(
        &self,
        repos: &BTreeSet<String>,
        contributors: &HashSet<String>,
    ) -> Result<u64> {
        self.collaborators
            .get_or_try_init(|| async {
                let payloads = self.fetch_per_repo(repos, "collaborators").await;
                let mut logins: HashSet<String> = payloads
                    .iter()
                    .flat_map(|(_, payload)| payload.as_array().into_iter().flatten())
                    .filter_map(|entry| entry["login"].as_str().map(str::to_string))
                    .collect();
                logins.extend(contributors.iter().cloned());
                let collabs = (logins.len() as u64).saturating_sub(1);
                Ok(self.more_collabs + collabs)
            })
            .await
            .map(|total| *total)
    }
}
