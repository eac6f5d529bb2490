//! TTL cache in front of the live-score upstream.
//!
//! All requests within the TTL window are served from the cached body. The
//! lock is held across the upstream fetch, so concurrent misses coalesce
//! into a single upstream request instead of stampeding it.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{msg, AppError, Result};

const CACHE_TTL_SECS: i64 = 30;
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
struct CachedScores {
    body: serde_json::Value,
    fetched_at: i64,
}

impl CachedScores {
    fn is_fresh(&self, now: i64) -> bool {
        now - self.fetched_at < CACHE_TTL_SECS
    }
}

pub struct LiveScoreCache {
    client: reqwest::Client,
    api_url: Option<String>,
    api_key: Option<String>,
    cached: Mutex<Option<CachedScores>>,
}

impl LiveScoreCache {
    pub fn new(api_url: Option<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
            cached: Mutex::new(None),
        }
    }

    /// Current scores, at most CACHE_TTL_SECS stale. On upstream failure a
    /// previously cached body is served instead of an error.
    pub async fn get_scores(&self) -> Result<serde_json::Value> {
        let api_url = self
            .api_url
            .as_deref()
            .ok_or_else(|| AppError::Config(msg::LIVESCORE_NOT_CONFIGURED.into()))?;

        let mut cached = self.cached.lock().await;
        let now = Utc::now().timestamp();

        if let Some(entry) = cached.as_ref() {
            if entry.is_fresh(now) {
                return Ok(entry.body.clone());
            }
        }

        match self.fetch_upstream(api_url).await {
            Ok(body) => {
                *cached = Some(CachedScores {
                    body: body.clone(),
                    fetched_at: now,
                });
                Ok(body)
            }
            Err(err) => {
                // Stale scores beat no scores.
                if let Some(entry) = cached.as_ref() {
                    tracing::warn!("live-score upstream failed, serving stale cache: {}", err);
                    return Ok(entry.body.clone());
                }
                Err(err)
            }
        }
    }

    async fn fetch_upstream(&self, api_url: &str) -> Result<serde_json::Value> {
        let mut request = self.client.get(api_url).timeout(UPSTREAM_TIMEOUT);
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("live-score API error: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "live-score API returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("invalid live-score response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_entry_freshness_respects_ttl() {
        let entry = CachedScores {
            body: serde_json::json!({"matches": []}),
            fetched_at: 1_000,
        };
        assert!(entry.is_fresh(1_000 + CACHE_TTL_SECS - 1));
        assert!(!entry.is_fresh(1_000 + CACHE_TTL_SECS));
    }

    #[tokio::test]
    async fn unconfigured_upstream_is_a_config_error() {
        let cache = LiveScoreCache::new(None, None);
        let err = cache.get_scores().await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
