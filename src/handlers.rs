//! HTTP surface: shared state, request plumbing, route handlers.

use crate::cache::ResponseCache;
use crate::collectors::{Environment, UserStats};
use crate::config::Config;
use crate::db::{SnapshotStore, TrafficStore, WebhookStore};
use crate::errors::ApiError;
use crate::github::{GithubClient, Transport};
use crate::ratelimit::{RateLimiter, RouteClass};
use crate::scope::ResolvedToken;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse as _, Response};
use lazy_static::lazy_static;
use regex::Regex;
use std::net::SocketAddr;
use std::sync::Arc;

pub mod cards;
pub mod compare;
pub mod health;
pub mod history;
pub mod users;
pub mod webhooks;

use axum::routing::{delete, get, post};

/// The route table: `/health` plus the `/v1` surface with its quota
/// middleware. Infrastructure layers (request ids, tracing, compression,
/// CORS, the governor flood guard) are stacked on top by the binary.
pub fn router(ctx: Arc<Context>) -> axum::Router {
    let users = axum::Router::new()
        .route("/overview", get(users::overview))
        .route("/languages", get(users::languages))
        .route("/streak", get(users::streak))
        .route("/contributions/recent", get(users::recent_contributions))
        .route("/commits/weekly", get(users::weekly_commits))
        .route("/repositories", get(users::repositories))
        .route("/repositories/detailed", get(users::repositories_detailed))
        .route("/stats/full", get(users::full_stats))
        .route("/cards/{card_type}", get(cards::card))
        .route("/compare/{other_username}", get(compare::compare))
        .route("/history", get(history::get_history))
        .route("/history/snapshot", post(history::create_snapshot))
        .route("/webhooks", get(webhooks::list).post(webhooks::create))
        .route("/webhooks/{webhook_id}", delete(webhooks::delete));

    let v1 = axum::Router::new()
        .nest("/users/{username}", users)
        .route("/cache/stats", get(health::cache_stats))
        .layer(axum::middleware::from_fn_with_state(
            ctx.clone(),
            quota_middleware,
        ));

    axum::Router::new()
        .route("/", get(|| async { "octostats is collecting." }))
        .route(
            "/robots.txt",
            get(|| async { "User-Agent: *\nDisallow: /\n" }),
        )
        .route("/health", get(health::health))
        .nest("/v1", v1)
        .with_state(ctx)
}

pub struct Context {
    pub config: Config,
    pub transport: Arc<Transport>,
    pub cache: ResponseCache,
    pub traffic_store: Arc<TrafficStore>,
    pub snapshots: SnapshotStore,
    pub webhooks: WebhookStore,
    pub limiter: RateLimiter,
}

lazy_static! {
    // GitHub's username rules, minus the lookahead (regex has none):
    // alphanumeric segments, single hyphens between them. The 39-char
    // cap is enforced separately because the hyphen alternation here
    // consumes two characters per repetition.
    static ref USERNAME_RE: Regex =
        Regex::new("^[A-Za-z0-9](?:-?[A-Za-z0-9]){0,38}$").unwrap();
}

/// Validates a path username against GitHub's naming rules.
pub fn validated_username(username: &str) -> Result<&str, ApiError> {
    if username.len() <= 39 && USERNAME_RE.is_match(username) {
        Ok(username)
    } else {
        Err(ApiError::Validation(
            "Invalid GitHub username format".to_string(),
        ))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Enforces the optional API-key gate.
///
/// Returns whether the caller is authenticated. With the gate disabled a
/// valid key still marks the caller authenticated (for the bigger rate
/// pool); with it enabled a missing or unknown key is a 401.
pub fn verify_api_key(config: &Config, headers: &HeaderMap) -> Result<bool, ApiError> {
    let provided = bearer_token(headers);
    if !config.api_auth_enabled {
        return Ok(provided.is_some_and(|key| config.api_keys.contains(&key)));
    }
    let Some(key) = provided else {
        return Err(ApiError::Unauthorized("Missing API key".to_string()));
    };
    if config.api_keys.is_empty() {
        return Err(ApiError::Config(anyhow::anyhow!(
            "API_AUTH_ENABLED is set but no API keys are configured"
        )));
    }
    if !config.api_keys.contains(&key) {
        return Err(ApiError::Unauthorized("Invalid API key".to_string()));
    }
    Ok(true)
}

/// Builds the stats facade for a request from its resolved token.
pub fn build_stats(
    ctx: &Context,
    username: &str,
    resolved: &ResolvedToken,
) -> Result<UserStats, ApiError> {
    let gh = GithubClient::new(ctx.transport.clone(), username, resolved.token.clone())
        .map_err(ApiError::Config)?;
    let mut env = Environment::new(username, resolved.filter.clone());
    env.timezone = ctx.config.timezone.clone();
    env.more_collabs = ctx.config.more_collabs;
    env.mask_private = ctx.config.mask_private_repos;
    Ok(UserStats::new(env, gh, ctx.traffic_store.clone()))
}

/// Cache lookup honouring the `no_cache=true` bypass.
pub(crate) async fn cached_lookup(
    ctx: &Context,
    username: &str,
    signature: &str,
    no_cache: bool,
) -> Option<serde_json::Value> {
    if no_cache {
        return None;
    }
    ctx.cache.get(username, signature).await
}

/// The `X-GitHub-Token` request header, if any.
pub fn user_token_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-github-token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Serialises a payload with the `X-Cache` marker and, when known, the
/// observed GitHub rate-limit headers.
pub fn json_response(
    payload: &serde_json::Value,
    cache_hit: Option<bool>,
    transport: &Transport,
) -> Response {
    let mut resp = axum::Json(payload).into_response();
    let headers = resp.headers_mut();
    if let Some(hit) = cache_hit {
        headers.insert(
            "x-cache",
            HeaderValue::from_static(if hit { "HIT" } else { "MISS" }),
        );
    }
    if let Some(snapshot) = transport.rate_limit.snapshot() {
        for (name, value) in [
            ("x-github-ratelimit-remaining", snapshot.remaining),
            ("x-github-ratelimit-limit", snapshot.limit),
            ("x-github-ratelimit-reset", snapshot.reset_epoch),
        ] {
            headers.insert(name, HeaderValue::from(value));
        }
    }
    resp
}

fn is_heavy_path(path: &str) -> bool {
    path.ends_with("/stats/full")
        || path.contains("/compare/")
        || path.ends_with("/history/snapshot")
}

fn client_ip(req: &Request<Body>) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Quota middleware for the `/v1` surface. Authenticated callers are
/// keyed by API key; everyone else by client IP.
pub async fn quota_middleware(
    State(ctx): State<Arc<Context>>,
    req: Request,
    next: Next,
) -> Response {
    let class = if is_heavy_path(req.uri().path()) {
        RouteClass::Heavy
    } else {
        RouteClass::Default
    };
    let api_key = bearer_token(req.headers()).filter(|key| ctx.config.api_keys.contains(key));
    let (key, authenticated) = match api_key {
        Some(key) => (format!("key:{key}"), true),
        None => (format!("ip:{}", client_ip(&req)), false),
    };
    match ctx.limiter.check(&key, authenticated, class) {
        Ok(()) => next.run(req).await,
        Err(retry_after) => ApiError::Throttled { retry_after }.into_response(),
    }
}
