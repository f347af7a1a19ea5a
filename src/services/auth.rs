//! Auth/token collaborator contract.
//!
//! Token acquisition itself is a black box. The host only requires a bearer
//! token that is valid right now, and it must be able to poll readiness
//! because the token service initializes asynchronously.
//!
//! There is no unauthenticated fallback: when a token cannot be produced the
//! caller gets an [`AuthError`] and must surface it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Tokens closer than this to expiry are treated as expired.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token service not ready")]
    NotReady,
    #[error("auth unavailable: {0}")]
    Unavailable(String),
    #[error("token refresh failed: {0}")]
    Refresh(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResult {
    pub success: bool,
    pub access_token: Option<String>,
    pub refreshed: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    fn is_service_ready(&self) -> bool;

    async fn get_valid_token(&self, provider: &str, profile: &str)
        -> Result<TokenResult, AuthError>;
}

/// Poll `provider` until it reports ready or `timeout` elapses.
pub async fn wait_until_ready(
    provider: &dyn TokenProvider,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), AuthError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if provider.is_service_ready() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(AuthError::NotReady);
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Fetch a usable bearer token or fail.
pub async fn require_token(
    provider: &dyn TokenProvider,
    name: &str,
    profile: &str,
) -> Result<String, AuthError> {
    if !provider.is_service_ready() {
        return Err(AuthError::NotReady);
    }
    let result = provider.get_valid_token(name, profile).await?;
    match result.access_token {
        Some(token) if result.success && !token.trim().is_empty() => {
            if result.refreshed {
                tracing::debug!(provider = name, "using refreshed access token");
            }
            Ok(token)
        }
        _ => Err(AuthError::Unavailable(format!(
            "{name}/{profile} returned no access token"
        ))),
    }
}

type Refresher = Arc<dyn Fn() -> Result<(String, Duration), AuthError> + Send + Sync>;

#[derive(Debug, Clone)]
struct IssuedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Token provider backed by a configured token, with an optional refresh hook
/// for when the token expires.
pub struct StaticTokenProvider {
    token: RwLock<Option<IssuedToken>>,
    refresher: Option<Refresher>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>, ttl: Duration) -> Self {
        Self {
            token: RwLock::new(Some(issue(token.into(), ttl))),
            refresher: None,
        }
    }

    /// A provider that stays not-ready until [`StaticTokenProvider::set_token`].
    pub fn pending() -> Self {
        Self {
            token: RwLock::new(None),
            refresher: None,
        }
    }

    pub fn with_refresher<F>(mut self, refresher: F) -> Self
    where
        F: Fn() -> Result<(String, Duration), AuthError> + Send + Sync + 'static,
    {
        self.refresher = Some(Arc::new(refresher));
        self
    }

    pub async fn set_token(&self, token: impl Into<String>, ttl: Duration) {
        *self.token.write().await = Some(issue(token.into(), ttl));
    }
}

fn issue(value: String, ttl: Duration) -> IssuedToken {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
    IssuedToken {
        value,
        expires_at: Utc::now() + ttl,
    }
}

fn is_expiring(token: &IssuedToken) -> bool {
    let skew = chrono::Duration::from_std(EXPIRY_SKEW).unwrap_or_else(|_| chrono::Duration::zero());
    token.expires_at - skew <= Utc::now()
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    fn is_service_ready(&self) -> bool {
        self.token
            .try_read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    async fn get_valid_token(
        &self,
        _provider: &str,
        _profile: &str,
    ) -> Result<TokenResult, AuthError> {
        {
            let guard = self.token.read().await;
            let Some(current) = guard.as_ref() else {
                return Err(AuthError::NotReady);
            };
            if !is_expiring(current) {
                return Ok(TokenResult {
                    success: true,
                    access_token: Some(current.value.clone()),
                    refreshed: false,
                    expires_at: Some(current.expires_at),
                });
            }
        }

        let Some(refresher) = self.refresher.as_ref() else {
            return Err(AuthError::Unavailable(
                "access token expired and no refresher configured".to_string(),
            ));
        };
        let (value, ttl) = refresher()?;
        let fresh = issue(value, ttl);
        let result = TokenResult {
            success: true,
            access_token: Some(fresh.value.clone()),
            refreshed: true,
            expires_at: Some(fresh.expires_at),
        };
        *self.token.write().await = Some(fresh);
        tracing::info!("access token refreshed");
        Ok(result)
    }
}
