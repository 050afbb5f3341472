//! Repository-level statistics: repos, stars, forks, languages.

use crate::collectors::Environment;
use crate::config::RepoFilter;
use crate::github::{GithubClient, queries};
use anyhow::Result;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing as log;

#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct LanguageStats {
    pub size: u64,
    pub occurrences: u64,
    pub color: Option<String>,
    /// Share of all language bytes, in percent. Zero when no bytes at all.
    pub prop: f64,
}

/// Everything one pass over the repository graph produces.
#[derive(Clone, Debug, Default)]
pub struct RepoOverview {
    pub name: String,
    pub followers: u64,
    pub following: u64,
    pub stargazers: u64,
    pub forks: u64,
    pub languages: BTreeMap<String, LanguageStats>,
    pub repos: BTreeSet<String>,
    /// Excluded from language aggregation and from per-repo REST passes.
    pub empty_repos: HashSet<String>,
    pub visibility: HashMap<String, bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountNode {
    total_count: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LanguageEdge {
    size: u64,
    node: LanguageNode,
}

#[derive(Deserialize)]
struct LanguageNode {
    name: String,
    color: Option<String>,
}

#[derive(Deserialize, Default)]
struct LanguageConnection {
    #[serde(default)]
    edges: Vec<LanguageEdge>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepoNode {
    name_with_owner: String,
    stargazers: CountNode,
    fork_count: u64,
    is_fork: bool,
    is_empty: bool,
    is_archived: bool,
    is_private: bool,
    #[serde(default)]
    languages: LanguageConnection,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RepoConnection {
    #[serde(default)]
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<Option<RepoNode>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Viewer {
    login: String,
    name: Option<String>,
    followers: Option<CountNode>,
    following: Option<CountNode>,
    #[serde(default)]
    repositories: RepoConnection,
    #[serde(default)]
    repositories_contributed_to: RepoConnection,
}

/// Repository admission by kind. Split out of the collector so the
/// predicate is testable without a client.
fn is_type_excluded(filter: &RepoFilter, is_fork: bool, is_archived: bool, is_private: bool) -> bool {
    (!filter.include_forks && is_fork)
        || (filter.exclude_archived && is_archived)
        || (filter.exclude_private && is_private)
        || (filter.exclude_public && !is_private)
}

/// Repository admission by name: dedup, whitelist, exclusion list.
fn is_name_excluded(filter: &RepoFilter, seen: &BTreeSet<String>, full_name: &str) -> bool {
    full_name.is_empty()
        || seen.contains(full_name)
        || (!filter.only_included.is_empty() && !filter.only_included.contains(full_name))
        || filter.exclude_repos.contains(full_name)
}

pub struct RepoStatsCollector {
    env: Arc<Environment>,
    gh: GithubClient,
    result: OnceCell<RepoOverview>,
}

impl RepoStatsCollector {
    pub fn new(env: Arc<Environment>, gh: GithubClient) -> Self {
        RepoStatsCollector {
            env,
            gh,
            result: OnceCell::new(),
        }
    }

    /// Fetches and aggregates once; later calls return the memoised result.
    pub async fn collect(&self) -> Result<&RepoOverview> {
        self.result.get_or_try_init(|| self.fetch()).await
    }

    async fn fetch(&self) -> Result<RepoOverview> {
        let filter = &self.env.filter;
        let mut overview = RepoOverview::default();
        let mut owned_cursor: Option<String> = None;
        let mut contrib_cursor: Option<String> = None;

        loop {
            let result = self
                .gh
                .graphql(&queries::repos_overview(
                    owned_cursor.as_deref(),
                    contrib_cursor.as_deref(),
                ))
                .await?;
            let viewer: Viewer = crate::deserialize_payload(
                result
                    .pointer("/data/viewer")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null),
            )?;

            overview.name = viewer.name.unwrap_or(viewer.login);
            overview.followers = viewer.followers.map(|f| f.total_count).unwrap_or(0);
            overview.following = viewer.following.map(|f| f.total_count).unwrap_or(0);

            let mut nodes: Vec<RepoNode> =
                viewer.repositories.nodes.into_iter().flatten().collect();
            if !filter.exclude_contributed {
                nodes.extend(
                    viewer
                        .repositories_contributed_to
                        .nodes
                        .into_iter()
                        .flatten(),
                );
            }

            for repo in nodes {
                if is_type_excluded(filter, repo.is_fork, repo.is_archived, repo.is_private) {
                    continue;
                }
                if is_name_excluded(filter, &overview.repos, &repo.name_with_owner) {
                    continue;
                }

                overview.repos.insert(repo.name_with_owner.clone());
                overview
                    .visibility
                    .insert(repo.name_with_owner.clone(), repo.is_private);
                overview.stargazers += repo.stargazers.total_count;
                overview.forks += repo.fork_count;

                if repo.is_empty {
                    overview.empty_repos.insert(repo.name_with_owner);
                    continue;
                }

                for edge in repo.languages.edges {
                    accumulate_language(
                        &mut overview.languages,
                        filter,
                        &edge.node.name,
                        edge.size,
                        edge.node.color,
                    );
                }
            }

            let owned_page = viewer.repositories.page_info;
            let contrib_page = viewer.repositories_contributed_to.page_info;
            if owned_page.has_next_page || contrib_page.has_next_page {
                owned_cursor = owned_page.end_cursor.or(owned_cursor);
                contrib_cursor = contrib_page.end_cursor.or(contrib_cursor);
            } else {
                break;
            }
        }

        if !filter.exclude_contributed {
            self.merge_manually_added(&mut overview).await;
        }

        compute_language_proportions(&mut overview.languages);
        log::debug!(
            repos = overview.repos.len(),
            languages = overview.languages.len(),
            "repository overview collected"
        );
        Ok(overview)
    }

    /// Folds in repositories named by `MORE_REPOS` via REST lookup.
    async fn merge_manually_added(&self, overview: &mut RepoOverview) {
        let filter = &self.env.filter;
        if filter.manually_added.is_empty() {
            return;
        }
        let colors = fetch_language_colors(&self.gh).await;

        for repo in filter.manually_added.clone() {
            if is_name_excluded(filter, &overview.repos, &repo) {
                continue;
            }
            let stats = match self.gh.rest(&format!("repos/{repo}"), &[]).await {
                Ok(stats) => stats,
                Err(e) => {
                    log::warn!("skipping manually added repo {repo}: {e}");
                    continue;
                }
            };
            let is_private = stats["private"].as_bool().unwrap_or(false);
            if is_type_excluded(
                filter,
                stats["fork"].as_bool().unwrap_or(false),
                stats["archived"].as_bool().unwrap_or(false),
                is_private,
            ) {
                continue;
            }

            overview.repos.insert(repo.clone());
            overview.visibility.insert(repo.clone(), is_private);
            overview.stargazers += stats["stargazers_count"].as_u64().unwrap_or(0);
            overview.forks += stats["forks_count"].as_u64().unwrap_or(0);

            if stats["size"].as_u64() == Some(0) {
                overview.empty_repos.insert(repo);
                continue;
            }
            if !stats["language"].is_string() {
                continue;
            }

            match self.gh.rest(&format!("repos/{repo}/languages"), &[]).await {
                Ok(langs) => {
                    for (lang, size) in langs.as_object().into_iter().flatten() {
                        let color = colors
                            .get(lang.as_str())
                            .and_then(|c| c["color"].as_str())
                            .map(str::to_string);
                        accumulate_language(
                            &mut overview.languages,
                            filter,
                            lang,
                            size.as_u64().unwrap_or(0),
                            color,
                        );
                    }
                }
                Err(e) => log::warn!("language lookup failed for {repo}: {e}"),
            }
        }
    }
}

fn accumulate_language(
    languages: &mut BTreeMap<String, LanguageStats>,
    filter: &RepoFilter,
    name: &str,
    size: u64,
    color: Option<String>,
) {
    if filter.exclude_langs.contains(name) {
        return;
    }
    let entry = languages.entry(name.to_string()).or_insert(LanguageStats {
        color,
        ..LanguageStats::default()
    });
    entry.size += size;
    entry.occurrences += 1;
}

/// Each language's share of all bytes, as a percentage.
pub fn compute_language_proportions(languages: &mut BTreeMap<String, LanguageStats>) {
    let total: u64 = languages.values().map(|l| l.size).sum();
    for lang in languages.values_mut() {
        lang.prop = if total > 0 {
            100.0 * lang.size as f64 / total as f64
        } else {
            0.0
        };
    }
}

/// The community language-color map; failures degrade to colorless.
async fn fetch_language_colors(gh: &GithubClient) -> serde_json::Map<String, serde_json::Value> {
    let result = gh
        .transport()
        .raw()
        .get("https://raw.githubusercontent.com/ozh/github-colors/master/colors.json")
        .header("User-Agent", "octostats")
        .send()
        .await;
    match result {
        Ok(resp) => resp
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default(),
        Err(e) => {
            log::warn!("failed to fetch language colors: {e}");
            Default::default()
        }
    }
}
