//! Webhook condition evaluation and delivery.

use crate::db::Webhook;
use serde_json::{Value, json};
use std::time::Duration;
use tracing as log;

/// Delivery budget per callback.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

fn num(snapshot: &Value, field: &str) -> i64 {
    snapshot[field].as_i64().unwrap_or(0)
}

/// True when `field` crossed `threshold` upward between two snapshots.
fn crossed_threshold(field: &str, threshold: i64, current: &Value, previous: &Value) -> bool {
    let prev = num(previous, field);
    let cur = num(current, field);
    prev < threshold && threshold <= cur
}

/// Evaluates a webhook's conditions against the latest two snapshots,
/// returning one event description per triggered condition.
///
/// Supported keys: `stars_threshold` (integer), `streak_broken` (bool),
/// `contributions_record` (bool).
pub fn evaluate_conditions(conditions: &Value, current: &Value, previous: &Value) -> Vec<String> {
    let mut triggered = Vec::new();

    if let Some(threshold) = conditions["stars_threshold"].as_i64() {
        if crossed_threshold("total_stars", threshold, current, previous) {
            triggered.push(format!("Stars crossed {threshold}"));
        }
    }

    if conditions["streak_broken"].as_bool() == Some(true)
        && num(previous, "current_streak") > 0
        && num(current, "current_streak") == 0
    {
        triggered.push("Streak broken".to_string());
    }

    if conditions["contributions_record"].as_bool() == Some(true) {
        let prev = num(previous, "total_contributions");
        let cur = num(current, "total_contributions");
        if cur > prev && prev > 0 {
            triggered.push(format!("New contributions record: {cur}"));
        }
    }

    triggered
}

/// Fires every matching webhook for a fresh snapshot.
///
/// Deliveries run in detached tasks so a slow callback neither blocks nor
/// inherits cancellation from the triggering request; failures are logged
/// and dropped. Returns how many webhooks matched.
pub fn dispatch(
    http: &reqwest::Client,
    hooks: Vec<Webhook>,
    username: &str,
    current: &Value,
    previous: &Value,
) -> usize {
    let mut fired = 0;
    for hook in hooks {
        let events = evaluate_conditions(&hook.conditions, current, previous);
        if events.is_empty() {
            continue;
        }
        fired += 1;

        let payload = json!({
            "username": username,
            "webhook_id": hook.id,
            "events": events,
            "snapshot": current,
        });
        let request = http
            .post(&hook.url)
            .timeout(DELIVERY_TIMEOUT)
            .json(&payload);
        let hook_id = hook.id;
        tokio::spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    log::info!("webhook {hook_id} delivered");
                }
                Ok(resp) => {
                    log::warn!("webhook {hook_id} returned {}", resp.status());
                }
                Err(e) => {
                    log::warn!("webhook {hook_id} delivery failed: {e}");
                }
            }
        });
    }
    fired
}
