use anyhow::Context as _;

pub mod cache;
pub mod collectors;
pub mod config;
pub mod db;
pub mod errors;
pub mod github;
pub mod handlers;
pub mod notifications;
pub mod partial;
pub mod ratelimit;
pub mod scope;

/// Deserializes a JSON value with the failing path in the error context.
pub fn deserialize_payload<T: serde::de::DeserializeOwned>(
    v: serde_json::Value,
) -> anyhow::Result<T> {
    let res: Result<T, _> = serde_path_to_error::deserialize(v);
    match res {
        Ok(r) => Ok(r),
        Err(e) => {
            let ctx = format!("at {:?}", e.path());
            Err(e.into_inner()).context(ctx)
        }
    }
}
