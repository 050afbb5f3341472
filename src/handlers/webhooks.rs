//! Webhook registration management.

use crate::errors::ApiError;
use crate::handlers::{Context, validated_username, verify_api_key};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse as _, Response};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct WebhookCreateRequest {
    pub url: String,
    pub conditions: Value,
}

const SUPPORTED_CONDITIONS: &[&str] =
    &["stars_threshold", "streak_broken", "contributions_record"];

/// Validates a webhook registration body.
fn validate_request(body: &WebhookCreateRequest) -> Result<(), ApiError> {
    let url = url::Url::parse(&body.url)
        .map_err(|_| ApiError::Validation("url must be a valid URL".to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::Validation(
            "url must use http or https".to_string(),
        ));
    }

    let Some(conditions) = body.conditions.as_object() else {
        return Err(ApiError::Validation(
            "conditions must be an object".to_string(),
        ));
    };
    if conditions.is_empty() {
        return Err(ApiError::Validation(
            "conditions must not be empty".to_string(),
        ));
    }
    for (key, value) in conditions {
        match key.as_str() {
            "stars_threshold" if value.as_i64().is_some_and(|v| v >= 0) => {}
            "streak_broken" | "contributions_record" if value.is_boolean() => {}
            key if SUPPORTED_CONDITIONS.contains(&key) => {
                return Err(ApiError::Validation(format!(
                    "invalid value for condition {key}"
                )));
            }
            key => {
                return Err(ApiError::Validation(format!("unknown condition {key}")));
            }
        }
    }
    Ok(())
}

pub async fn create(
    State(ctx): State<Arc<Context>>,
    Path(username): Path<String>,
    headers: HeaderMap,
    Json(body): Json<WebhookCreateRequest>,
) -> Result<Response, ApiError> {
    validated_username(&username)?;
    verify_api_key(&ctx.config, &headers)?;
    validate_request(&body)?;

    let record = ctx.webhooks.create(&username, &body.url, &body.conditions)?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

pub async fn list(
    State(ctx): State<Arc<Context>>,
    Path(username): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    validated_username(&username)?;
    verify_api_key(&ctx.config, &headers)?;
    let hooks = ctx.webhooks.list_by_user(&username)?;
    Ok(Json(hooks).into_response())
}

pub async fn delete(
    State(ctx): State<Arc<Context>>,
    Path((username, webhook_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    validated_username(&username)?;
    verify_api_key(&ctx.config, &headers)?;

    let hook = ctx.webhooks.get(&webhook_id)?;
    let owned = hook.is_some_and(|hook| hook.username == username.to_lowercase());
    if !owned {
        return Err(ApiError::NotFound("Webhook not found".to_string()));
    }
    ctx.webhooks.delete(&webhook_id)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
