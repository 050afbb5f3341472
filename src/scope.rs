//! Per-request token resolution and privacy scope.
//!
//! A request either carries its own `X-GitHub-Token` (which must belong to
//! the path username) or falls back to the server token in restricted
//! mode, where private repositories are never visible no matter what the
//! environment switches say.

use crate::collectors::commit_schedule::CommitEvent;
use crate::config::{Config, RepoFilter};
use crate::errors::ApiError;
use crate::github::Transport;
use secrecy::{ExposeSecret as _, SecretString};
use std::collections::HashMap;

/// The token a request will use, plus what it is allowed to see.
pub struct ResolvedToken {
    pub token: SecretString,
    pub filter: RepoFilter,
    pub user_owns_token: bool,
}

/// Builds the effective repository filter for a request.
///
/// Owners see whatever the configured filter allows. Everyone else gets
/// `exclude_private` forced on, regardless of `ALLOW_PRIVATE_REPOS`.
pub fn resolve_repo_filter(base: &RepoFilter, user_owns_token: bool) -> RepoFilter {
    let mut filter = base.clone();
    if !user_owns_token {
        filter.exclude_private = true;
    }
    filter
}

/// Checks that `token` belongs to `username` via `GET /user`.
async fn token_matches_user(
    transport: &Transport,
    token: &SecretString,
    username: &str,
) -> bool {
    let api_url = std::env::var("GITHUB_API_URL")
        .unwrap_or_else(|_| "https://api.github.com".to_string());
    let resp = transport
        .raw()
        .get(format!("{api_url}/user"))
        .header("Authorization", format!("Bearer {}", token.expose_secret()))
        .header("User-Agent", "octostats")
        .send()
        .await;
    let Ok(resp) = resp else { return false };
    if !resp.status().is_success() {
        return false;
    }
    let Ok(body) = resp.json::<serde_json::Value>().await else {
        return false;
    };
    body["login"]
        .as_str()
        .is_some_and(|login| login.eq_ignore_ascii_case(username))
}

/// Resolves the token for a request.
///
/// A supplied `X-GitHub-Token` must validate against the path username or
/// the request is rejected with 403 before any repository data is
/// touched. Without one, the server token is used in restricted mode; a
/// missing server token is a configuration error.
pub async fn resolve_token(
    transport: &Transport,
    config: &Config,
    username: &str,
    user_token: Option<String>,
) -> Result<ResolvedToken, ApiError> {
    if let Some(user_token) = user_token {
        let token = SecretString::from(user_token);
        if !token_matches_user(transport, &token, username).await {
            return Err(ApiError::Forbidden(
                "X-GitHub-Token does not belong to the requested user".to_string(),
            ));
        }
        return Ok(ResolvedToken {
            token,
            filter: resolve_repo_filter(&config.repo_filter, true),
            user_owns_token: true,
        });
    }

    let token = config.github_token.clone().ok_or_else(|| {
        ApiError::Config(anyhow::anyhow!(
            "GITHUB_TOKEN or ACCESS_TOKEN environment variable not set"
        ))
    })?;
    Ok(ResolvedToken {
        token,
        filter: resolve_repo_filter(&config.repo_filter, false),
        user_owns_token: false,
    })
}

/// Canonical placeholder for a masked private repository.
pub fn masked_repo_name(username: &str) -> String {
    format!("{username}/private-repo")
}

/// Masks private repository names in a listing, keeping order.
pub fn mask_repo_names(
    repos: impl IntoIterator<Item = String>,
    visibility: &HashMap<String, bool>,
    username: &str,
    mask_enabled: bool,
) -> Vec<String> {
    repos
        .into_iter()
        .map(|repo| {
            if mask_enabled && visibility.get(&repo).copied().unwrap_or(false) {
                masked_repo_name(username)
            } else {
                repo
            }
        })
        .collect()
}

/// Masks commit details from private repositories.
pub fn mask_weekly_commits(
    commits: Vec<CommitEvent>,
    username: &str,
    mask_enabled: bool,
) -> Vec<CommitEvent> {
    if !mask_enabled {
        return commits;
    }
    let placeholder = masked_repo_name(username);
    commits
        .into_iter()
        .map(|mut commit| {
            if commit.is_private {
                commit.repo = placeholder.clone();
                commit.sha = "private".to_string();
                commit.description = "Private commit".to_string();
            }
            commit
        })
        .collect()
}
