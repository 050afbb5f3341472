//! Specialised collectors behind the stats facade.
//!
//! Each collector owns one narrow slice of GitHub data and memoises its
//! result for the lifetime of the request: `collect()` runs the fetch at
//! most once, concurrent callers included, via `tokio::sync::OnceCell`.

use crate::config::RepoFilter;

pub mod code_changes;
pub mod commit_schedule;
pub mod contributions;
pub mod engagement;
pub mod facade;
pub mod repo_stats;
pub mod traffic;

pub use facade::UserStats;

/// Per-request settings every collector reads from.
#[derive(Clone, Debug)]
pub struct Environment {
    pub username: String,
    pub filter: RepoFilter,
    /// IANA timezone used to bound the commit-schedule week.
    pub timezone: String,
    /// Offset added to the computed collaborator count.
    pub more_collabs: u64,
    /// Redact private commit messages at collection time.
    pub mask_private: bool,
}

impl Environment {
    pub fn new(username: &str, filter: RepoFilter) -> Self {
        Environment {
            username: username.to_string(),
            filter,
            timezone: "UTC".to_string(),
            more_collabs: 0,
            mask_private: false,
        }
    }
}
