//! Temporal statistics: snapshot history and snapshot creation.

use crate::errors::ApiError;
use crate::handlers::{
    Context, json_response, user_token_header, validated_username, verify_api_key,
};
use crate::notifications;
use crate::scope::resolve_token;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing as log;

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "from")]
    pub from_date: Option<String>,
    #[serde(rename = "to")]
    pub to_date: Option<String>,
    pub limit: Option<u32>,
}

fn validate_date(label: &str, value: &Option<String>) -> Result<(), ApiError> {
    if let Some(value) = value {
        if NaiveDate::parse_from_str(value, "%Y-%m-%d").is_err() {
            return Err(ApiError::Validation(format!(
                "{label} must be a YYYY-MM-DD date"
            )));
        }
    }
    Ok(())
}

pub async fn get_history(
    State(ctx): State<Arc<Context>>,
    Path(username): Path<String>,
    Query(q): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    validated_username(&username)?;
    verify_api_key(&ctx.config, &headers)?;
    validate_date("from", &q.from_date)?;
    validate_date("to", &q.to_date)?;
    let limit = q.limit.unwrap_or(100);
    if !(1..=1000).contains(&limit) {
        return Err(ApiError::Validation(
            "limit must be between 1 and 1000".to_string(),
        ));
    }

    let snapshots = ctx.snapshots.query(
        &username,
        q.from_date.as_deref(),
        q.to_date.as_deref(),
        limit,
    )?;
    let payload = json!({ "username": username, "snapshots": snapshots });
    Ok(json_response(&payload, None, &ctx.transport))
}

pub async fn create_snapshot(
    State(ctx): State<Arc<Context>>,
    Path(username): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    validated_username(&username)?;
    verify_api_key(&ctx.config, &headers)?;
    let resolved = resolve_token(
        &ctx.transport,
        &ctx.config,
        &username,
        user_token_header(&headers),
    )
    .await?;

    let mut data = super::compare::collect_user_stats(&ctx, &username, &resolved).await?;
    let mut warnings = None;
    if let Some(map) = data.as_object_mut() {
        warnings = map.remove("warnings");
        map.remove("username");
    }

    // Evaluate against the previous snapshot before the new one lands,
    // then write; delivery runs detached from this request.
    let previous = ctx.snapshots.latest(&username)?;
    if let Some(previous) = previous {
        let hooks = ctx.webhooks.list_by_user(&username)?;
        let fired = notifications::dispatch(
            ctx.transport.raw(),
            hooks,
            &username,
            &data,
            &previous,
        );
        if fired > 0 {
            log::info!("{fired} webhook(s) matched for {username}");
        }
    }
    ctx.snapshots.save(&username, &data, None)?;

    let mut payload = json!({ "username": username, "snapshot": data });
    if let Some(warnings) = warnings {
        payload["warnings"] = warnings;
    }
    let mut resp = json_response(&payload, None, &ctx.transport);
    *resp.status_mut() = StatusCode::CREATED;
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_filters_must_be_calendar_days() {
        assert!(validate_date("from", &Some("2026-02-16".to_string())).is_ok());
        assert!(validate_date("from", &None).is_ok());
        assert!(validate_date("from", &Some("16/02/2026".to_string())).is_err());
        assert!(validate_date("from", &Some("2026-13-01".to_string())).is_err());
    }
}
