//! TTL cache for endpoint payloads, keyed by `(username, endpoint signature)`.
//!
//! The default backend is an in-process map. When `REDIS_URL` is
//! configured and reachable at startup, Redis takes over so the cache
//! survives restarts and is shared between instances; values are
//! JSON-encoded on write and decoded on read. Request logic only ever
//! sees hit or miss.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing as log;

enum Backend {
    Memory(Mutex<HashMap<(String, String), (Instant, Value)>>),
    Redis(redis::aio::MultiplexedConnection),
}

pub struct ResponseCache {
    ttl: Duration,
    maxsize: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    backend: Backend,
}

#[derive(Debug, serde::Serialize)]
pub struct CacheStats {
    pub backend: &'static str,
    pub entries: i64,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

fn redis_key(username: &str, endpoint: &str) -> String {
    format!("cache:{username}:{endpoint}")
}

impl ResponseCache {
    /// Builds the cache, probing Redis when a URL is configured.
    ///
    /// An unreachable Redis degrades to the in-process map with a
    /// warning rather than failing startup.
    pub async fn new(ttl_secs: u64, maxsize: usize, redis_url: Option<&str>) -> Self {
        let backend = match redis_url {
            Some(url) => match Self::connect_redis(url).await {
                Ok(manager) => {
                    log::info!("cache backed by redis");
                    Backend::Redis(manager)
                }
                Err(e) => {
                    log::warn!("redis unavailable, falling back to memory: {e}");
                    Backend::Memory(Mutex::new(HashMap::new()))
                }
            },
            None => Backend::Memory(Mutex::new(HashMap::new())),
        };
        ResponseCache {
            ttl: Duration::from_secs(ttl_secs),
            maxsize,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            backend,
        }
    }

    async fn connect_redis(url: &str) -> anyhow::Result<redis::aio::MultiplexedConnection> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_multiplexed_tokio_connection().await?;
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(conn)
    }

    pub async fn get(&self, username: &str, endpoint: &str) -> Option<Value> {
        let value = match &self.backend {
            Backend::Memory(map) => {
                let mut map = map.lock().unwrap_or_else(|e| e.into_inner());
                match map.get(&(username.to_string(), endpoint.to_string())) {
                    Some((inserted, value)) if inserted.elapsed() < self.ttl => {
                        Some(value.clone())
                    }
                    Some(_) => {
                        map.remove(&(username.to_string(), endpoint.to_string()));
                        None
                    }
                    None => None,
                }
            }
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                match redis::cmd("GET")
                    .arg(redis_key(username, endpoint))
                    .query_async::<_, Option<String>>(&mut conn)
                    .await
                {
                    Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
                    Ok(None) => None,
                    Err(e) => {
                        log::warn!("redis get failed: {e}");
                        None
                    }
                }
            }
        };

        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::debug!(username, endpoint, "cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            log::debug!(username, endpoint, "cache miss");
        }
        value
    }

    pub async fn set(&self, username: &str, endpoint: &str, value: Value) {
        match &self.backend {
            Backend::Memory(map) => {
                let mut map = map.lock().unwrap_or_else(|e| e.into_inner());
                if map.len() >= self.maxsize {
                    // Drop expired entries first, then the oldest.
                    map.retain(|_, (inserted, _)| inserted.elapsed() < self.ttl);
                    if map.len() >= self.maxsize {
                        if let Some(oldest) = map
                            .iter()
                            .min_by_key(|(_, (inserted, _))| *inserted)
                            .map(|(k, _)| k.clone())
                        {
                            map.remove(&oldest);
                        }
                    }
                }
                map.insert(
                    (username.to_string(), endpoint.to_string()),
                    (Instant::now(), value),
                );
            }
            Backend::Redis(manager) => {
                let raw = match serde_json::to_string(&value) {
                    Ok(raw) => raw,
                    Err(e) => {
                        log::warn!("cache value not serialisable: {e}");
                        return;
                    }
                };
                let mut conn = manager.clone();
                if let Err(e) = redis::cmd("SETEX")
                    .arg(redis_key(username, endpoint))
                    .arg(self.ttl.as_secs())
                    .arg(raw)
                    .query_async::<_, ()>(&mut conn)
                    .await
                {
                    log::warn!("redis set failed: {e}");
                }
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let (backend, entries) = match &self.backend {
            Backend::Memory(map) => {
                let map = map.lock().unwrap_or_else(|e| e.into_inner());
                let live = map
                    .values()
                    .filter(|(inserted, _)| inserted.elapsed() < self.ttl)
                    .count();
                ("memory", live as i64)
            }
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let mut cursor: u64 = 0;
                let mut entries: i64 = 0;
                loop {
                    match redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg("cache:*")
                        .arg("COUNT")
                        .arg(100)
                        .query_async::<_, (u64, Vec<String>)>(&mut conn)
                        .await
                    {
                        Ok((next, keys)) => {
                            entries += keys.len() as i64;
                            if next == 0 {
                                break;
                            }
                            cursor = next;
                        }
                        Err(_) => {
                            entries = -1;
                            break;
                        }
                    }
                }
                ("redis", entries)
            }
        };
        CacheStats {
            backend,
            entries,
            hits,
            misses,
            hit_ratio: if total > 0 {
                (hits as f64 / total as f64 * 100.0).round() / 100.0
            } else {
                0.0
            },
        }
    }
}
