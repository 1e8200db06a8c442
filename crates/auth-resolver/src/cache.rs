//! Shared cache for identity credentials.
//!
//! Each key owns its own async mutex, so one identity fetching a token never
//! serializes requests for another identity, and concurrent requests for the
//! same identity wait on a single in-flight fetch. The slot is only written
//! after a fetch completes; a fetch dropped mid-flight leaves the previous
//! entry untouched.

use crate::error::ResolveError;
use crate::secret::IssuedCredential;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

type Slot = Arc<Mutex<Option<IssuedCredential>>>;

pub struct TokenCache {
    entries: DashMap<String, Slot>,
    refresh_margin: chrono::Duration,
}

impl TokenCache {
    /// Credentials are refreshed once they are within `refresh_margin` of
    /// their expiry.
    pub fn new(refresh_margin: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            refresh_margin: chrono::Duration::from_std(refresh_margin)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
        }
    }

    /// Return the cached credential for `key`, or run `fetch` and cache its
    /// result. Credentials without an expiry are returned but not cached.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        fetch: F,
    ) -> Result<IssuedCredential, ResolveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<IssuedCredential, ResolveError>>,
    {
        let slot: Slot = Arc::clone(&self.entries.entry(key.to_string()).or_default());
        let mut cached = slot.lock().await;

        if let Some(credential) = cached.as_ref() {
            if self.is_fresh(credential, Utc::now()) {
                debug!(key = %key, "Using cached identity credential");
                return Ok(credential.clone());
            }
        }

        let issued = fetch().await?;
        *cached = issued.expires_at.map(|_| issued.clone());
        debug!(key = %key, expires_at = ?issued.expires_at, "Issued identity credential");
        Ok(issued)
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_fresh(&self, credential: &IssuedCredential, now: DateTime<Utc>) -> bool {
        credential
            .expires_at
            .map(|expires_at| expires_at - self.refresh_margin > now)
            .unwrap_or(false)
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn credential(token: &str, ttl_secs: i64) -> IssuedCredential {
        IssuedCredential::token(token, Some(Utc::now() + chrono::Duration::seconds(ttl_secs)))
    }

    #[tokio::test]
    async fn test_cached_until_refresh_margin() {
        let cache = TokenCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let issued = cache
                .get_or_fetch("azure:abc", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(credential("token-1", 3600))
                })
                .await
                .unwrap();
            assert_eq!(issued.access_token(), Some("token-1"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_near_expiry_is_refetched() {
        let cache = TokenCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            cache
                .get_or_fetch("gcp:default", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(credential("short", 30))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let cache = Arc::new(TokenCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_fetch("aws:role", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(credential("shared", 3600))
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().access_token(), Some("shared"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let cache = TokenCache::default();

        let err = cache
            .get_or_fetch("azure:broken", || async {
                Err(ResolveError::identity("azure-workload", "token file missing"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Identity { .. }));

        let issued = cache
            .get_or_fetch("azure:broken", || async { Ok(credential("recovered", 3600)) })
            .await
            .unwrap();
        assert_eq!(issued.access_token(), Some("recovered"));
    }

    #[tokio::test]
    async fn test_cancelled_fetch_keeps_previous_entry() {
        let cache = Arc::new(TokenCache::new(Duration::from_secs(60)));
        cache
            .get_or_fetch("vault:login", || async { Ok(credential("first", 3600)) })
            .await
            .unwrap();

        cache.invalidate("vault:login");
        let pending = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_fetch("vault:login", || async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(credential("never", 3600))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pending.abort();
        let _ = pending.await;

        let issued = cache
            .get_or_fetch("vault:login", || async { Ok(credential("second", 3600)) })
            .await
            .unwrap();
        assert_eq!(issued.access_token(), Some("second"));
    }
}
