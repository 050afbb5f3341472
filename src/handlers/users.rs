//! Per-user statistics endpoints.

use crate::errors::ApiError;
use crate::handlers::{
    Context, build_stats, json_response, user_token_header, validated_username, verify_api_key,
};
use crate::partial::PartialReport;
use crate::scope::{ResolvedToken, mask_repo_names, masked_repo_name, resolve_token};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing as log;

fn default_page() -> u32 {
    1
}
fn default_per_page() -> u32 {
    30
}

#[derive(Deserialize)]
pub struct CommonQuery {
    #[serde(default)]
    pub no_cache: bool,
    #[serde(default)]
    pub proportional: bool,
}

#[derive(Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub no_cache: bool,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

#[derive(Deserialize)]
pub struct DetailedQuery {
    #[serde(default)]
    pub no_cache: bool,
    pub visibility: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<u32>,
    pub exclude_forks: Option<bool>,
    pub exclude_archived: Option<bool>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

/// Shared prologue: username validation, API-key gate, token resolution.
async fn setup(
    ctx: &Context,
    username: &str,
    headers: &HeaderMap,
) -> Result<ResolvedToken, ApiError> {
    validated_username(username)?;
    verify_api_key(&ctx.config, headers)?;
    resolve_token(
        &ctx.transport,
        &ctx.config,
        username,
        user_token_header(headers),
    )
    .await
}

fn validate_pagination(page: u32, per_page: u32) -> Result<(), ApiError> {
    if page < 1 {
        return Err(ApiError::Validation("page must be >= 1".to_string()));
    }
    if !(1..=100).contains(&per_page) {
        return Err(ApiError::Validation(
            "per_page must be between 1 and 100".to_string(),
        ));
    }
    Ok(())
}

/// Builds the overview dict through the partial-failure wrapper: failed
/// metrics become nulls plus a warning instead of sinking the request.
async fn collect_overview(
    stats: &crate::collectors::UserStats,
    username: &str,
    report: &mut PartialReport,
) -> Value {
    let name = report.opt("name", stats.name()).await;
    let total_contributions = report
        .opt("total contributions", stats.total_contributions())
        .await;
    let repos_count = report
        .opt("repositories", async { Ok(stats.repos().await?.len()) })
        .await;
    let stars = report.opt("stargazers", stats.stargazers()).await;
    let forks = report.opt("forks", stats.forks()).await;
    let followers = report.opt("followers", stats.followers()).await;
    let following = report.opt("following", stats.following()).await;
    let views = report.opt("views", stats.views()).await;
    let views_from = report.opt("views from date", stats.views_from_date()).await;
    let clones = report.opt("clones", stats.clones()).await;
    let clones_from = report
        .opt("clones from date", stats.clones_from_date())
        .await;
    let pull_requests = report.opt("pull requests", stats.pull_requests()).await;
    let issues = report.opt("issues", stats.issues()).await;
    let lines = report.opt("lines changed", stats.lines_changed()).await;
    let avg_percent = report
        .opt("average contribution percent", stats.avg_contribution_percent())
        .await;
    let collaborators = report.opt("collaborators", stats.collaborators()).await;
    let contributors = report
        .opt("contributors", async { Ok(stats.contributors().await?.len()) })
        .await;

    json!({
        "username": username,
        "name": name,
        "total_contributions": total_contributions,
        "repositories_count": repos_count,
        "total_stars": stars,
        "total_forks": forks,
        "followers": followers,
        "following": following,
        "total_views": views,
        "views_from_date": views_from,
        "total_clones": clones,
        "clones_from_date": clones_from,
        "total_pull_requests": pull_requests,
        "total_issues": issues,
        "lines_added": lines.map(|l| l.0),
        "lines_deleted": lines.map(|l| l.1),
        "avg_contribution_percent": avg_percent,
        "collaborators_count": collaborators,
        "contributors_count": contributors,
    })
}

pub async fn overview(
    State(ctx): State<Arc<Context>>,
    Path(username): Path<String>,
    Query(q): Query<CommonQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let resolved = setup(&ctx, &username, &headers).await?;
    let signature = "overview";
    if let Some(value) = crate::handlers::cached_lookup(&ctx, &username, signature, q.no_cache).await {
        return Ok(json_response(&value, Some(true), &ctx.transport));
    }

    let stats = build_stats(&ctx, &username, &resolved)?;
    let mut report = PartialReport::new();
    let mut payload = collect_overview(&stats, &username, &mut report).await;
    report.annotate(&mut payload);

    ctx.cache.set(&username, signature, payload.clone()).await;
    Ok(json_response(&payload, Some(false), &ctx.transport))
}

pub async fn languages(
    State(ctx): State<Arc<Context>>,
    Path(username): Path<String>,
    Query(q): Query<CommonQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let resolved = setup(&ctx, &username, &headers).await?;
    let signature = if q.proportional {
        "languages_proportional"
    } else {
        "languages"
    };
    if let Some(value) = crate::handlers::cached_lookup(&ctx, &username, signature, q.no_cache).await {
        return Ok(json_response(&value, Some(true), &ctx.transport));
    }

    let stats = build_stats(&ctx, &username, &resolved)?;
    let languages = if q.proportional {
        serde_json::to_value(stats.languages_proportional().await?)
    } else {
        serde_json::to_value(stats.languages().await?)
    }
    .map_err(anyhow::Error::from)?;

    let payload = json!({ "username": username, "languages": languages });
    ctx.cache.set(&username, signature, payload.clone()).await;
    Ok(json_response(&payload, Some(false), &ctx.transport))
}

pub async fn streak(
    State(ctx): State<Arc<Context>>,
    Path(username): Path<String>,
    Query(q): Query<CommonQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let resolved = setup(&ctx, &username, &headers).await?;
    let signature = "streak";
    if let Some(value) = crate::handlers::cached_lookup(&ctx, &username, signature, q.no_cache).await {
        return Ok(json_response(&value, Some(true), &ctx.transport));
    }

    let stats = build_stats(&ctx, &username, &resolved)?;
    let current = stats.current_streak().await?;
    let longest = stats.longest_streak().await?;
    let total = stats.total_contributions().await?;

    let payload = json!({
        "username": username,
        "current_streak": current.length,
        "current_streak_range": current.range_label(),
        "longest_streak": longest.length,
        "longest_streak_range": longest.range_label(),
        "total_contributions": total,
    });
    ctx.cache.set(&username, signature, payload.clone()).await;
    Ok(json_response(&payload, Some(false), &ctx.transport))
}

pub async fn recent_contributions(
    State(ctx): State<Arc<Context>>,
    Path(username): Path<String>,
    Query(q): Query<CommonQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let resolved = setup(&ctx, &username, &headers).await?;
    let signature = "contributions_recent";
    if let Some(value) = crate::handlers::cached_lookup(&ctx, &username, signature, q.no_cache).await {
        return Ok(json_response(&value, Some(true), &ctx.transport));
    }

    let stats = build_stats(&ctx, &username, &resolved)?;
    let recent = stats.recent_contributions().await?;
    let payload = json!({ "username": username, "recent_contributions": recent });
    ctx.cache.set(&username, signature, payload.clone()).await;
    Ok(json_response(&payload, Some(false), &ctx.transport))
}

pub async fn weekly_commits(
    State(ctx): State<Arc<Context>>,
    Path(username): Path<String>,
    Query(q): Query<CommonQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let resolved = setup(&ctx, &username, &headers).await?;
    let signature = "commits_weekly";
    if let Some(value) = crate::handlers::cached_lookup(&ctx, &username, signature, q.no_cache).await {
        return Ok(json_response(&value, Some(true), &ctx.transport));
    }

    let stats = build_stats(&ctx, &username, &resolved)?;
    let weekly = stats.weekly_commit_schedule().await?;
    let weekly =
        crate::scope::mask_weekly_commits(weekly, &username, ctx.config.mask_private_repos);
    let payload = json!({ "username": username, "weekly_commits": weekly });
    ctx.cache.set(&username, signature, payload.clone()).await;
    Ok(json_response(&payload, Some(false), &ctx.transport))
}

pub async fn repositories(
    State(ctx): State<Arc<Context>>,
    Path(username): Path<String>,
    Query(q): Query<PageQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let resolved = setup(&ctx, &username, &headers).await?;
    validate_pagination(q.page, q.per_page)?;
    let signature = format!("repositories:p{}:{}", q.page, q.per_page);
    if let Some(value) = crate::handlers::cached_lookup(&ctx, &username, &signature, q.no_cache).await {
        return Ok(json_response(&value, Some(true), &ctx.transport));
    }

    let stats = build_stats(&ctx, &username, &resolved)?;
    let repos = stats.repos().await?.clone();
    let visibility = stats.repo_visibility().await?.clone();
    let names = mask_repo_names(repos, &visibility, &username, ctx.config.mask_private_repos);

    let total = names.len();
    let start = (q.page as usize - 1).saturating_mul(q.per_page as usize);
    let page: Vec<&String> = names.iter().skip(start).take(q.per_page as usize).collect();

    let payload = json!({
        "username": username,
        "repositories_count": total,
        "page": q.page,
        "per_page": q.per_page,
        "repositories": page,
    });
    ctx.cache.set(&username, &signature, payload.clone()).await;
    Ok(json_response(&payload, Some(false), &ctx.transport))
}

/// One repository in the detailed listing. Fields mirror GitHub's REST
/// repo payload, filtered down to what a portfolio needs.
#[derive(serde::Serialize, Deserialize, Clone)]
pub struct DetailedRepo {
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub html_url: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub languages: serde_json::Map<String, Value>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub open_issues_count: u64,
    #[serde(default)]
    pub watchers_count: u64,
    #[serde(default)]
    pub topics: Vec<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub pushed_at: Option<String>,
    #[serde(rename(serialize = "is_fork"), alias = "fork", default)]
    pub is_fork: bool,
    #[serde(rename(serialize = "is_archived"), alias = "archived", default)]
    pub is_archived: bool,
    #[serde(rename(serialize = "is_private"), alias = "private", default)]
    pub is_private: bool,
}

/// Replaces identifying fields of a private repository.
fn mask_detailed_repo(repo: &mut DetailedRepo, username: &str) {
    if !repo.is_private {
        return;
    }
    let full = masked_repo_name(username);
    repo.name = full
        .split_once('/')
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| full.clone());
    repo.full_name = full;
    repo.description = Some(String::new());
    repo.html_url = None;
    repo.homepage = Some(String::new());
    repo.language = None;
    repo.languages = Default::default();
    repo.topics = Vec::new();
}

pub async fn repositories_detailed(
    State(ctx): State<Arc<Context>>,
    Path(username): Path<String>,
    Query(q): Query<DetailedQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let resolved = setup(&ctx, &username, &headers).await?;
    validate_pagination(q.page, q.per_page)?;

    let visibility = q.visibility.unwrap_or_else(|| "public".to_string());
    if !["public", "private", "all"].contains(&visibility.as_str()) {
        return Err(ApiError::Validation(
            "visibility must be public, private or all".to_string(),
        ));
    }
    let sort = q.sort.unwrap_or_else(|| "updated".to_string());
    if !["updated", "created", "pushed", "stars", "name"].contains(&sort.as_str()) {
        return Err(ApiError::Validation(
            "sort must be one of updated, created, pushed, stars, name".to_string(),
        ));
    }
    let limit = q.limit.unwrap_or(100);
    if !(1..=500).contains(&limit) {
        return Err(ApiError::Validation(
            "limit must be between 1 and 500".to_string(),
        ));
    }
    let exclude_forks = q.exclude_forks.unwrap_or(true);
    let exclude_archived = q.exclude_archived.unwrap_or(true);

    let signature = format!(
        "repositories_detailed:{visibility}:{sort}:{limit}:{exclude_forks}:{exclude_archived}:p{}:{}",
        q.page, q.per_page
    );
    if let Some(value) = crate::handlers::cached_lookup(&ctx, &username, &signature, q.no_cache).await {
        return Ok(json_response(&value, Some(true), &ctx.transport));
    }

    let gh = crate::github::GithubClient::new(
        ctx.transport.clone(),
        &username,
        resolved.token.clone(),
    )
    .map_err(ApiError::Config)?;

    let raw = gh
        .rest(
            &format!("users/{username}/repos"),
            &[
                ("per_page", limit.to_string()),
                ("sort", sort.clone()),
                ("type", visibility.clone()),
            ],
        )
        .await?;

    let mut repositories = Vec::new();
    for repo in raw.as_array().into_iter().flatten() {
        let Ok(mut repo) = serde_json::from_value::<DetailedRepo>(repo.clone()) else {
            continue;
        };
        if exclude_forks && repo.is_fork {
            continue;
        }
        if exclude_archived && repo.is_archived {
            continue;
        }

        match gh
            .rest(&format!("repos/{}/languages", repo.full_name), &[])
            .await
        {
            Ok(langs) => {
                repo.languages = langs.as_object().cloned().unwrap_or_default();
            }
            Err(e) => {
                log::warn!("failed to fetch languages for {}: {e}", repo.full_name);
            }
        }

        if ctx.config.mask_private_repos {
            mask_detailed_repo(&mut repo, &username);
        }
        repositories.push(repo);
    }

    let start = (q.page as usize - 1).saturating_mul(q.per_page as usize);
    let total = repositories.len();
    let page: Vec<&DetailedRepo> = repositories
        .iter()
        .skip(start)
        .take(q.per_page as usize)
        .collect();

    let payload = json!({
        "username": username,
        "repositories_count": total,
        "page": q.page,
        "per_page": q.per_page,
        "repositories": page,
    });
    ctx.cache.set(&username, &signature, payload.clone()).await;
    Ok(json_response(&payload, Some(false), &ctx.transport))
}

pub async fn full_stats(
    State(ctx): State<Arc<Context>>,
    Path(username): Path<String>,
    Query(q): Query<CommonQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let resolved = setup(&ctx, &username, &headers).await?;
    let signature = "stats_full";
    if let Some(value) = crate::handlers::cached_lookup(&ctx, &username, signature, q.no_cache).await {
        return Ok(json_response(&value, Some(true), &ctx.transport));
    }

    let stats = build_stats(&ctx, &username, &resolved)?;
    let mut report = PartialReport::new();

    let mut overview = collect_overview(&stats, &username, &mut report).await;
    let Value::Object(ref mut overview_map) = overview else {
        unreachable!("collect_overview builds an object");
    };
    overview_map.remove("username");

    let languages = report
        .opt("languages", async {
            Ok(serde_json::to_value(stats.languages().await?)?)
        })
        .await;
    let current = report.opt("current streak", stats.current_streak()).await;
    let longest = report.opt("longest streak", stats.longest_streak()).await;
    let total_contributions = report
        .opt("total contributions", stats.total_contributions())
        .await;
    let recent = report
        .opt("recent contributions", stats.recent_contributions())
        .await;
    let weekly = report
        .opt("weekly commits", stats.weekly_commit_schedule())
        .await
        .map(|weekly| {
            crate::scope::mask_weekly_commits(weekly, &username, ctx.config.mask_private_repos)
        });
    let repos = report
        .opt("repositories", async { Ok(stats.repos().await?.clone()) })
        .await;
    let visibility = report
        .opt("repository visibility", async {
            Ok(stats.repo_visibility().await?.clone())
        })
        .await
        .unwrap_or_default();

    let repo_list = repos.map(|repos| {
        mask_repo_names(repos, &visibility, &username, ctx.config.mask_private_repos)
    });

    let mut payload = json!({
        "username": username,
        "overview": overview,
        "languages": languages,
        "streak": {
            "current_streak": current.map(|s| s.length),
            "current_streak_range": current.map(|s| s.range_label()),
            "longest_streak": longest.map(|s| s.length),
            "longest_streak_range": longest.map(|s| s.range_label()),
        },
        "contributions": {
            "total": total_contributions,
            "recent": recent,
        },
        "repositories": {
            "count": repo_list.as_ref().map(Vec::len),
            "list": repo_list,
        },
        "weekly_commits": weekly,
    });
    report.annotate(&mut payload);

    ctx.cache.set(&username, signature, payload.clone()).await;
    Ok(json_response(&payload, Some(false), &ctx.transport))
}
