//! Server configuration, read once from the environment at startup.

use anyhow::Context as _;
use secrecy::SecretString;
use std::collections::HashSet;
use std::path::PathBuf;

/// Parses the `"1"/"true"/"yes"/"on"` family of toggle values.
pub fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_list(name: &str) -> HashSet<String> {
    std::env::var(name)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Repository admission rules shared by the collectors.
///
/// All switches default to "include"; the privacy filter tightens
/// `exclude_private` for requests that do not own the target account.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RepoFilter {
    pub exclude_repos: HashSet<String>,
    pub exclude_langs: HashSet<String>,
    /// Explicit whitelist; when non-empty, everything else is dropped.
    pub only_included: HashSet<String>,
    /// Repositories merged in by REST lookup after GraphQL pagination.
    pub manually_added: HashSet<String>,
    pub include_forks: bool,
    pub exclude_contributed: bool,
    pub exclude_archived: bool,
    pub exclude_private: bool,
    /// When set, public repositories are excluded. The predicate is
    /// "repository is public AND flag set => drop"; private repositories
    /// are never affected by this switch.
    pub exclude_public: bool,
}

impl RepoFilter {
    pub fn from_env() -> Self {
        RepoFilter {
            exclude_repos: env_list("EXCLUDED"),
            exclude_langs: env_list("EXCLUDED_LANGS"),
            only_included: env_list("ONLY_INCLUDED"),
            manually_added: env_list("MORE_REPOS"),
            include_forks: env_flag("INCLUDE_FORKED_REPOS", false),
            exclude_contributed: env_flag("EXCLUDE_CONTRIB_REPOS", false),
            exclude_archived: env_flag("EXCLUDE_ARCHIVE_REPOS", false),
            exclude_private: env_flag("EXCLUDE_PRIVATE_REPOS", false),
            exclude_public: env_flag("EXCLUDE_PUBLIC_REPOS", false),
        }
    }
}

pub struct Config {
    /// Server-wide GitHub token; `GITHUB_TOKEN` with `ACCESS_TOKEN` as the
    /// legacy fallback. Absence is a `ConfigError` at request time, not at
    /// startup, so the health endpoint stays reachable.
    pub github_token: Option<SecretString>,
    pub api_auth_enabled: bool,
    pub api_keys: HashSet<String>,
    pub cors_origins: Vec<String>,
    pub cache_ttl_secs: u64,
    pub cache_maxsize: usize,
    pub redis_url: Option<String>,
    /// Requests per minute: anonymous, API-key authenticated, heavy routes.
    pub rate_limit_default: u32,
    pub rate_limit_auth: u32,
    pub rate_limit_heavy: u32,
    pub traffic_db_path: PathBuf,
    pub snapshots_db_path: PathBuf,
    pub webhooks_db_path: PathBuf,
    pub mask_private_repos: bool,
    pub allow_private_repos: bool,
    pub timezone: String,
    /// Offset added to the computed collaborator count.
    pub more_collabs: u64,
    pub repo_filter: RepoFilter,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        let port = std::env::var("PORT")
            .ok()
            .map(|p| p.parse::<u16>().context("parsing PORT"))
            .transpose()?
            .unwrap_or(8000);

        Ok(Config {
            github_token: std::env::var("GITHUB_TOKEN")
                .or_else(|_| std::env::var("ACCESS_TOKEN"))
                .ok()
                .map(SecretString::from),
            api_auth_enabled: env_flag("API_AUTH_ENABLED", false),
            api_keys: env_list("API_KEYS"),
            cors_origins: env_list("CORS_ORIGINS").into_iter().collect(),
            cache_ttl_secs: env_parse("CACHE_TTL", 300),
            cache_maxsize: env_parse("CACHE_MAXSIZE", 100),
            redis_url: std::env::var("REDIS_URL").ok(),
            rate_limit_default: env_parse("RATE_LIMIT_DEFAULT", 30),
            rate_limit_auth: env_parse("RATE_LIMIT_AUTH", 100),
            rate_limit_heavy: env_parse("RATE_LIMIT_HEAVY", 10),
            traffic_db_path: env_parse("DATABASE_PATH", PathBuf::from("octostats.db")),
            snapshots_db_path: env_parse("SNAPSHOTS_DB_PATH", PathBuf::from("snapshots.db")),
            webhooks_db_path: env_parse("WEBHOOKS_DB_PATH", PathBuf::from("webhooks.db")),
            mask_private_repos: env_flag("MASK_PRIVATE_REPOS", false),
            allow_private_repos: env_flag("ALLOW_PRIVATE_REPOS", false),
            timezone: std::env::var("TIMEZONE").unwrap_or_else(|_| "UTC".to_string()),
            more_collabs: env_parse("MORE_COLLABS", 0),
            repo_filter: RepoFilter::from_env(),
            port,
        })
    }
}
