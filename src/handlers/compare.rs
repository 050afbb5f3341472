//! Side-by-side comparison of two users.

use crate::errors::ApiError;
use crate::handlers::{
    Context, build_stats, json_response, user_token_header, validated_username, verify_api_key,
};
use crate::partial::PartialReport;
use crate::scope::resolve_token;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct CompareQuery {
    #[serde(default)]
    pub no_cache: bool,
}

const COMPARE_FIELDS: &[&str] = &[
    "total_contributions",
    "repositories_count",
    "total_stars",
    "total_forks",
    "total_pull_requests",
    "total_issues",
    "lines_added",
    "lines_deleted",
    "current_streak",
    "longest_streak",
];

/// The flat overview dict used on both sides of a comparison, collected
/// with zero-fallbacks so the diff arithmetic always has numbers.
pub(crate) async fn collect_user_stats(
    ctx: &Context,
    username: &str,
    resolved: &crate::scope::ResolvedToken,
) -> Result<Value, ApiError> {
    let stats = build_stats(ctx, username, resolved)?;
    let mut report = PartialReport::new();

    let total_contributions = report
        .or_default("total contributions", stats.total_contributions(), 0)
        .await;
    let repos_count = report
        .or_default("repositories", async { Ok(stats.repos().await?.len() as u64) }, 0)
        .await;
    let stars = report.or_default("stargazers", stats.stargazers(), 0).await;
    let forks = report.or_default("forks", stats.forks(), 0).await;
    let pull_requests = report
        .or_default("pull requests", stats.pull_requests(), 0)
        .await;
    let issues = report.or_default("issues", stats.issues(), 0).await;
    let lines = report
        .or_default("lines changed", stats.lines_changed(), (0, 0))
        .await;
    let current_streak = report
        .or_default("current streak", async { Ok(stats.current_streak().await?.length) }, 0)
        .await;
    let longest_streak = report
        .or_default("longest streak", async { Ok(stats.longest_streak().await?.length) }, 0)
        .await;

    let mut payload = json!({
        "username": username,
        "total_contributions": total_contributions,
        "repositories_count": repos_count,
        "total_stars": stars,
        "total_forks": forks,
        "total_pull_requests": pull_requests,
        "total_issues": issues,
        "lines_added": lines.0,
        "lines_deleted": lines.1,
        "current_streak": current_streak,
        "longest_streak": longest_streak,
    });
    report.annotate(&mut payload);
    Ok(payload)
}

/// `{diff, ratio}` for one numeric field; ratio is null against zero.
fn compare_field(a: &Value, b: &Value) -> Option<Value> {
    let (a, b) = (a.as_i64()?, b.as_i64()?);
    let ratio = if b != 0 {
        Some((a as f64 / b as f64 * 100.0).round() / 100.0)
    } else {
        None
    };
    Some(json!({ "diff": a - b, "ratio": ratio }))
}

pub async fn compare(
    State(ctx): State<Arc<Context>>,
    Path((username, other_username)): Path<(String, String)>,
    Query(q): Query<CompareQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    validated_username(&username)?;
    validated_username(&other_username)?;
    verify_api_key(&ctx.config, &headers)?;
    let resolved = resolve_token(
        &ctx.transport,
        &ctx.config,
        &username,
        user_token_header(&headers),
    )
    .await?;

    let signature = format!("compare:{other_username}");
    if let Some(value) = crate::handlers::cached_lookup(&ctx, &username, &signature, q.no_cache).await
    {
        return Ok(json_response(&value, Some(true), &ctx.transport));
    }

    // The resolved scope follows the path username; the comparison
    // target is always viewed through the same lens.
    let (user_a, user_b) = futures::join!(
        collect_user_stats(&ctx, &username, &resolved),
        collect_user_stats(&ctx, &other_username, &resolved),
    );
    let (user_a, user_b) = (user_a?, user_b?);

    let mut comparison = serde_json::Map::new();
    for field in COMPARE_FIELDS {
        if let Some(result) = compare_field(&user_a[*field], &user_b[*field]) {
            comparison.insert((*field).to_string(), result);
        }
    }

    let payload = json!({
        "user_a": user_a,
        "user_b": user_b,
        "comparison": comparison,
    });
    ctx.cache.set(&username, &signature, payload.clone()).await;
    Ok(json_response(&payload, Some(false), &ctx.transport))
}
