//! Partial-failure wrapper for aggregate endpoints.
//!
//! Metrics that fail degrade to a fallback plus a human-readable warning
//! instead of sinking the response. The `warnings` array is only attached
//! when at least one fallback was used.

use serde_json::{Value, json};
use std::future::Future;

#[derive(Default)]
pub struct PartialReport {
    warnings: Vec<String>,
}

impl PartialReport {
    pub fn new() -> Self {
        PartialReport::default()
    }

    /// Runs a metric future, degrading to `default` with a warning.
    pub async fn or_default<T>(
        &mut self,
        label: &str,
        fut: impl Future<Output = anyhow::Result<T>>,
        default: T,
    ) -> T {
        match fut.await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("{label} unavailable: {e:#}");
                self.warnings.push(format!("{label} unavailable: {e}"));
                default
            }
        }
    }

    /// Runs a metric future, degrading to `null` with a warning.
    pub async fn opt<T>(
        &mut self,
        label: &str,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> Option<T> {
        match fut.await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("{label} unavailable: {e:#}");
                self.warnings.push(format!("{label} unavailable: {e}"));
                None
            }
        }
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Attaches `warnings` to an object payload when any were recorded.
    pub fn annotate(&self, payload: &mut Value) {
        if self.has_warnings() {
            payload["warnings"] = json!(self.warnings);
        }
    }
}
