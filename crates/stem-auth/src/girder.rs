//! Girder session token provider.
//!
//! Resolves a `Girder-Token` by asking the Girder server who owns it
//! (`GET {api_url}/user/me`). Girder answers `null` for an unknown or expired
//! token rather than an error status, so a null body is treated as rejection.
//! Successful lookups are cached per token for `cache_ttl` to keep the
//! per-frame auth check off the network.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::debug;

use crate::errors::AuthError;
use crate::types::{Credentials, Identity, IdentityProvider};

/// Header Girder reads session tokens from.
pub const GIRDER_TOKEN_HEADER: &str = "Girder-Token";

#[derive(Deserialize)]
struct GirderUser {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    login: Option<String>,
}

struct CachedIdentity {
    identity: Identity,
    fetched_at: Instant,
}

/// Identity provider backed by a Girder server.
pub struct GirderProvider {
    client: reqwest::Client,
    me_url: String,
    cache_ttl: Duration,
    cache: DashMap<String, CachedIdentity>,
    created: Instant,
    // Milliseconds after `created` of the last expired-entry sweep.
    last_sweep_ms: AtomicU64,
}

impl fmt::Debug for GirderProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GirderProvider")
            .field("me_url", &self.me_url)
            .field("cache_ttl", &self.cache_ttl)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl GirderProvider {
    /// Create a provider for the Girder API rooted at `api_url`.
    pub fn new(api_url: &str, cache_ttl: Duration, timeout: Duration) -> Result<Self, AuthError> {
        let base = api_url.trim_end_matches('/');
        if base.is_empty() {
            return Err(AuthError::Config("Girder API URL is empty".into()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            me_url: format!("{base}/user/me"),
            cache_ttl,
            cache: DashMap::new(),
            created: Instant::now(),
            last_sweep_ms: AtomicU64::new(0),
        })
    }

    /// Number of cached token lookups, including stale ones not yet swept.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    fn cached(&self, token: &str) -> Option<Identity> {
        let entry = self.cache.get(token)?;
        if entry.fetched_at.elapsed() < self.cache_ttl {
            return Some(entry.identity.clone());
        }
        drop(entry);
        let _ = self.cache.remove(token);
        None
    }

    /// Store a lookup. At most once per TTL, entries past their TTL are
    /// dropped first so tokens that are never seen again do not pile up.
    fn remember(&self, token: &str, identity: &Identity) {
        let now_ms = u64::try_from(self.created.elapsed().as_millis()).unwrap_or(u64::MAX);
        let ttl_ms = u64::try_from(self.cache_ttl.as_millis()).unwrap_or(u64::MAX);
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) >= ttl_ms
            && self
                .last_sweep_ms
                .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            let before = self.cache.len();
            self.cache
                .retain(|_, entry| entry.fetched_at.elapsed() < self.cache_ttl);
            debug!(evicted = before.saturating_sub(self.cache.len()), "swept identity cache");
        }
        let _ = self.cache.insert(
            token.to_string(),
            CachedIdentity {
                identity: identity.clone(),
                fetched_at: Instant::now(),
            },
        );
    }

    #[tracing::instrument(skip_all)]
    async fn fetch(&self, token: &str) -> Result<Identity, AuthError> {
        let resp = self
            .client
            .get(&self.me_url)
            .header(GIRDER_TOKEN_HEADER, token)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status,
                message: text,
            });
        }

        let body = resp.bytes().await?;
        let user: Option<GirderUser> = serde_json::from_slice(&body)?;
        let user = user.ok_or_else(|| AuthError::Rejected {
            status: 0,
            message: "no user for token".into(),
        })?;
        Ok(Identity {
            user_id: user.id.into(),
            login: user.login,
        })
    }
}

#[async_trait]
impl IdentityProvider for GirderProvider {
    async fn resolve(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let token = credentials.token();
        if token.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if let Some(identity) = self.cached(token) {
            return Ok(identity);
        }
        let identity = self.fetch(token).await?;
        debug!(user_id = %identity.user_id, "girder token resolved");
        if !self.cache_ttl.is_zero() {
            self.remember(token, &identity);
        }
        Ok(identity)
    }

    fn name(&self) -> &'static str {
        "girder"
    }
}
