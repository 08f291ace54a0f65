use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::{HttpError, HttpResponse};

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Backing store; `None` keeps the cache in memory.
    pub path: Option<PathBuf>,
    pub default_ttl: Duration,
    pub stale_while_revalidate: Duration,
    pub methods: Vec<String>,
    pub statuses: Vec<u16>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            default_ttl: Duration::from_secs(3600),
            stale_while_revalidate: Duration::from_secs(60),
            methods: vec!["GET".to_string(), "HEAD".to_string()],
            statuses: vec![200],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// Within TTL; serve as-is.
    Fresh,
    /// Past TTL but inside the stale-while-revalidate window; serve and
    /// refresh in the background.
    Stale,
}

pub struct CacheLookup {
    pub response: HttpResponse,
    pub freshness: Freshness,
}

/// Persistent response cache, one SQLite file per metadata service so every
/// service ages independently. Keys fold in the auth-identity headers;
/// eviction is purely TTL-driven.
pub struct ResponseCache {
    pool: SqlitePool,
    config: CacheConfig,
    inflight: tokio::sync::Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
    refreshing: Mutex<std::collections::HashSet<String>>,
}

impl ResponseCache {
    pub async fn open(config: CacheConfig) -> Result<Self, HttpError> {
        let options = match &config.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| HttpError::Cache(format!("creating {}: {e}", parent.display())))?;
                }
                SqliteConnectOptions::new().filename(path).create_if_missing(true)
            }
            None => SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| HttpError::Cache(e.to_string()))?,
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| HttpError::Cache(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS http_cache (
                cache_key TEXT PRIMARY KEY,
                status INTEGER NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                stored_at INTEGER NOT NULL
            );",
        )
        .execute(&pool)
        .await
        .map_err(|e| HttpError::Cache(e.to_string()))?;

        let cache = Self {
            pool,
            config,
            inflight: tokio::sync::Mutex::new(HashMap::new()),
            refreshing: Mutex::new(std::collections::HashSet::new()),
        };
        cache.purge_expired().await?;

        Ok(cache)
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn is_cacheable_method(&self, method: &Method) -> bool {
        self.config.methods.iter().any(|m| m.eq_ignore_ascii_case(method.as_str()))
    }

    pub fn is_cacheable_status(&self, status: u16) -> bool {
        self.config.statuses.contains(&status)
    }

    /// Normalized method + URL + a digest over the auth-identity headers.
    pub fn cache_key(method: &Method, url: &str, auth_headers: &HeaderMap) -> String {
        let mut pairs: Vec<(String, String)> = auth_headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        pairs.sort();

        let mut hasher = Sha256::new();
        for (name, value) in &pairs {
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        let digest: String = hasher
            .finalize()
            .iter()
            .take(8)
            .map(|b| format!("{b:02x}"))
            .collect();

        format!("{} {url} {digest}", method.as_str().to_uppercase())
    }

    pub async fn lookup(&self, key: &str) -> Result<Option<CacheLookup>, HttpError> {
        let row: Option<(i64, String, Vec<u8>, i64)> = sqlx::query_as(
            "SELECT status, headers, body, stored_at FROM http_cache WHERE cache_key = ?;",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HttpError::Cache(e.to_string()))?;

        let Some((status, headers_json, body, stored_at)) = row else {
            return Ok(None);
        };

        let age = (Utc::now().timestamp() - stored_at).max(0) as u64;
        let ttl = self.config.default_ttl.as_secs();
        let swr = self.config.stale_while_revalidate.as_secs();

        if age > ttl + swr {
            sqlx::query("DELETE FROM http_cache WHERE cache_key = ?;")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(|e| HttpError::Cache(e.to_string()))?;
            return Ok(None);
        }

        let freshness = if age <= ttl { Freshness::Fresh } else { Freshness::Stale };

        let response = HttpResponse {
            status: status as u16,
            headers: deserialize_headers(&headers_json)?,
            body: Bytes::from(body),
        };

        Ok(Some(CacheLookup { response, freshness }))
    }

    pub async fn store(&self, key: &str, response: &HttpResponse) -> Result<(), HttpError> {
        sqlx::query(
            "INSERT OR REPLACE INTO http_cache(cache_key, status, headers, body, stored_at)
            VALUES (?, ?, ?, ?, ?);",
        )
        .bind(key)
        .bind(response.status as i64)
        .bind(serialize_headers(&response.headers)?)
        .bind(response.body.as_ref())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| HttpError::Cache(e.to_string()))?;

        Ok(())
    }

    pub async fn purge_expired(&self) -> Result<u64, HttpError> {
        let horizon = Utc::now().timestamp()
            - (self.config.default_ttl.as_secs() + self.config.stale_while_revalidate.as_secs()) as i64;

        let result = sqlx::query("DELETE FROM http_cache WHERE stored_at < ?;")
            .bind(horizon)
            .execute(&self.pool)
            .await
            .map_err(|e| HttpError::Cache(e.to_string()))?;

        Ok(result.rows_affected())
    }

    /// Per-key lock so concurrent misses coalesce into one upstream fetch.
    pub async fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inflight.lock().await;
        map.retain(|_, weak| weak.strong_count() > 0);

        if let Some(existing) = map.get(key).and_then(Weak::upgrade) {
            return existing;
        }

        let lock = Arc::new(tokio::sync::Mutex::new(()));
        map.insert(key.to_string(), Arc::downgrade(&lock));
        lock
    }

    /// Claims a background refresh slot for the key; false when a refresh
    /// is already running.
    pub fn begin_refresh(&self, key: &str) -> bool {
        self.refreshing.lock().unwrap().insert(key.to_string())
    }

    pub fn end_refresh(&self, key: &str) {
        self.refreshing.lock().unwrap().remove(key);
    }

    #[cfg(test)]
    pub(crate) async fn backdate(&self, key: &str, seconds: i64) {
        sqlx::query("UPDATE http_cache SET stored_at = stored_at - ? WHERE cache_key = ?;")
            .bind(seconds)
            .bind(key)
            .execute(&self.pool)
            .await
            .unwrap();
    }
}

fn serialize_headers(headers: &HeaderMap) -> Result<String, HttpError> {
    let pairs: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    serde_json::to_string(&pairs).map_err(|e| HttpError::Cache(e.to_string()))
}

fn deserialize_headers(raw: &str) -> Result<HeaderMap, HttpError> {
    let pairs: Vec<(String, String)> =
        serde_json::from_str(raw).map_err(|e| HttpError::Cache(e.to_string()))?;

    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let name = HeaderName::from_str(&name).map_err(|_| HttpError::InvalidHeader(name.clone()))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|_| HttpError::InvalidHeader(name.as_str().to_string()))?;
        headers.append(name, value);
    }

    Ok(headers)
}
