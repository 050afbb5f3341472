//! Health and cache introspection endpoints.

use crate::github::{BreakerState, LimitTier, Transport};
use crate::handlers::Context;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse as _, Response};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Health {
    Ok,
    Degraded,
    Unavailable,
}

impl Health {
    fn as_str(self) -> &'static str {
        match self {
            Health::Ok => "ok",
            Health::Degraded => "degraded",
            Health::Unavailable => "unavailable",
        }
    }
}

/// The worst of the breaker-derived and rate-limit-derived states.
fn derive_health(breaker: BreakerState, tier: LimitTier) -> Health {
    if breaker == BreakerState::Open || tier == LimitTier::Critical {
        return Health::Unavailable;
    }
    if breaker == BreakerState::HalfOpen
        || tier == LimitTier::Degraded
        || tier == LimitTier::Unknown
    {
        return Health::Degraded;
    }
    Health::Ok
}

fn health_of(transport: &Transport) -> Health {
    derive_health(transport.breaker.state(), transport.rate_limit.tier())
}

pub async fn health(State(ctx): State<Arc<Context>>) -> Response {
    let health = health_of(&ctx.transport);
    let status = match health {
        Health::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(json!({ "status": health.as_str() }))).into_response()
}

pub async fn cache_stats(State(ctx): State<Arc<Context>>) -> Response {
    let stats = ctx.cache.stats().await;
    Json(serde_json::to_value(stats).unwrap_or(serde_json::Value::Null)).into_response()
}
