//! Lines-changed analysis over `/stats/contributors`.

use crate::github::GithubClient;
use anyhow::Result;
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use tokio::sync::OnceCell;
use tracing as log;

#[derive(Clone, Debug, Default)]
pub struct CodeChanges {
    /// Lines the user added / deleted.
    pub additions: u64,
    pub deletions: u64,
    /// Lines changed by anyone across the same repositories.
    pub total_additions: u64,
    pub total_deletions: u64,
    /// User share of all changed lines, e.g. `"25.00%"`.
    pub contributions_percentage: String,
    /// Mean of the user's per-repository share, e.g. `"10.50%"`.
    pub avg_percent: String,
    /// Everyone who shows up in any contributor list.
    pub contributors: HashSet<String>,
}

#[derive(Deserialize)]
struct Week {
    #[serde(default)]
    a: u64,
    #[serde(default)]
    d: u64,
}

#[derive(Deserialize)]
struct ContributorStats {
    author: Option<Author>,
    #[serde(default)]
    weeks: Vec<Week>,
}

#[derive(Deserialize)]
struct Author {
    #[serde(default)]
    login: String,
}

#[derive(Default)]
struct RepoTally {
    user_additions: u64,
    user_deletions: u64,
    others_additions: u64,
    others_deletions: u64,
    authors: Vec<String>,
}

impl RepoTally {
    fn user_changes(&self) -> u64 {
        self.user_additions + self.user_deletions
    }
    fn total_changes(&self) -> u64 {
        self.user_changes() + self.others_additions + self.others_deletions
    }
}

/// Partitions one repository's contributor weeks by author.
fn tally_repo(stats: &[ContributorStats], username: &str) -> RepoTally {
    let mut tally = RepoTally::default();
    for contributor in stats {
        let Some(author) = &contributor.author else {
            continue;
        };
        tally.authors.push(author.login.clone());
        if author.login == username {
            for week in &contributor.weeks {
                tally.user_additions += week.a;
                tally.user_deletions += week.d;
            }
        } else {
            for week in &contributor.weeks {
                tally.others_additions += week.a;
                tally.others_deletions += week.d;
            }
        }
    }
    tally
}

pub struct CodeChangeAnalyzer {
    gh: GithubClient,
    username: String,
    result: OnceCell<CodeChanges>,
}

impl CodeChangeAnalyzer {
    pub fn new(gh: GithubClient, username: &str) -> Self {
        CodeChangeAnalyzer {
            gh,
            username: username.to_string(),
            result: OnceCell::new(),
        }
    }

    /// Walks every non-empty repository. Per-repo failures (including
    /// exhausted 202 polling) are skipped so one slow repository cannot
    /// sink the whole metric.
    pub async fn analyze(
        &self,
        repos: &BTreeSet<String>,
        empty_repos: &HashSet<String>,
    ) -> Result<&CodeChanges> {
        self.result
            .get_or_try_init(|| async {
                let mut changes = CodeChanges::default();
                let mut share_sum = 0.0_f64;

                for repo in repos {
                    if empty_repos.contains(repo) {
                        continue;
                    }
                    let stats = match self
                        .gh
                        .rest(&format!("repos/{repo}/stats/contributors"), &[])
                        .await
                    {
                        Ok(value) => value,
                        Err(e) => {
                            log::warn!("skipping contributor stats for {repo}: {e}");
                            continue;
                        }
                    };
                    let stats: Vec<ContributorStats> = match crate::deserialize_payload(stats) {
                        Ok(stats) => stats,
                        Err(e) => {
                            // A `message` object here is GitHub telling us
                            // the repo is off limits; same treatment.
                            log::warn!("unexpected contributor payload for {repo}: {e}");
                            continue;
                        }
                    };

                    let tally = tally_repo(&stats, &self.username);
                    changes.contributors.extend(tally.authors.iter().cloned());
                    changes.additions += tally.user_additions;
                    changes.deletions += tally.user_deletions;
                    changes.total_additions += tally.others_additions;
                    changes.total_deletions += tally.others_deletions;
                    if tally.user_changes() > 0 {
                        share_sum += tally.user_changes() as f64 / tally.total_changes() as f64;
                    }
                }

                let non_empty = repos.len().saturating_sub(empty_repos.len());
                let avg = if share_sum > 0.0 && non_empty > 0 {
                    share_sum / non_empty as f64
                } else {
                    0.0
                };
                changes.avg_percent = format!("{:.2}%", avg * 100.0);

                changes.total_additions += changes.additions;
                changes.total_deletions += changes.deletions;

                let user_changes = changes.additions + changes.deletions;
                let all_changes = changes.total_additions + changes.total_deletions;
                let percent = if user_changes > 0 && all_changes > 0 {
                    user_changes as f64 / all_changes as f64 * 100.0
                } else {
                    0.0
                };
                changes.contributions_percentage = format!("{percent:.2}%");

                Ok(changes)
            })
            .await
    }
}
