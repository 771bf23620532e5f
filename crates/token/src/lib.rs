//! mab_token
//!
//! The Graph token cache and the Token Provider pipeline: allowlist check,
//! cache lookup, secret resolution + mint, cache write, and a
//! last-known-good fallback if minting fails after a cache miss.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use mab_contract::{ErrorCode, TokenMetadata};
use mab_secrets::{SecretError, SecretReference, SecretResolver};
use thiserror::Error;

/// The closed error set a `TokenMinter` may return.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MintError {
    #[error("token provider timeout")]
    Timeout,
    #[error("token provider auth failed")]
    AuthFailed,
    #[error("token provider rate limited")]
    RateLimited,
    #[error("token provider unavailable")]
    Unavailable,
    #[error("token provider bad response")]
    BadResponse,
}

impl MintError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MintError::Timeout => ErrorCode::ProviderTimeout,
            MintError::AuthFailed => ErrorCode::ProviderAuthFailed,
            MintError::RateLimited => ErrorCode::ProviderRateLimited,
            MintError::Unavailable => ErrorCode::ProviderUnavailable,
            MintError::BadResponse => ErrorCode::ProviderBadResponse,
        }
    }
}

/// Mints a fresh access token. `scope` is a single space-joined string, the
/// shape the OAuth2 client-credentials grant expects on the wire.
#[async_trait]
pub trait TokenMinter: Send + Sync {
    async fn mint(
        &self,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
        scope: &str,
        timeout_seconds: u64,
    ) -> Result<(String, String, i64), MintError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenProviderError {
    #[error("provider resource is not allowlisted")]
    PolicyDenied,
    #[error("requested scope is not allowlisted")]
    PolicyInvalidScope,
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error(transparent)]
    Mint(#[from] MintError),
}

impl TokenProviderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TokenProviderError::PolicyDenied => ErrorCode::PolicyDenied,
            TokenProviderError::PolicyInvalidScope => ErrorCode::PolicyInvalidScope,
            TokenProviderError::Secret(e) => e.code(),
            TokenProviderError::Mint(e) => e.code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    tenant_id: String,
    client_id: String,
    scopes: Vec<String>,
}

#[derive(Debug, Clone)]
struct TokenRecord {
    access_token: String,
    token_type: String,
    expires_at_epoch: i64,
    source: &'static str,
}

#[derive(Debug, Default)]
pub struct TokenCache {
    records: Mutex<HashMap<CacheKey, TokenRecord>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_valid(&self, key: &CacheKey, now_epoch: i64, skew_seconds: i64) -> Option<TokenRecord> {
        let records = self.records.lock().expect("token cache mutex poisoned");
        let record = records.get(key)?;
        if record.expires_at_epoch <= now_epoch + skew_seconds {
            return None;
        }
        Some(record.clone())
    }

    fn put(
        &self,
        key: CacheKey,
        access_token: String,
        token_type: String,
        expires_in_seconds: i64,
        now_epoch: i64,
        max_ttl_seconds: i64,
    ) -> TokenRecord {
        let effective_ttl = expires_in_seconds.min(max_ttl_seconds).max(1);
        let record = TokenRecord {
            access_token,
            token_type,
            expires_at_epoch: now_epoch + effective_ttl,
            source: "minted",
        };
        let mut records = self.records.lock().expect("token cache mutex poisoned");
        records.insert(key, record.clone());
        record
    }
}

pub struct TokenResult {
    pub token: String,
    pub metadata: TokenMetadata,
}

pub struct TokenProvider {
    pub client_id: String,
    pub secret_reference: SecretReference,
    pub secret_resolver: Box<dyn SecretResolver>,
    pub mint_client: Box<dyn TokenMinter>,
    pub cache: TokenCache,
    pub allowed_resources: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub cache_skew_seconds: i64,
    pub max_ttl_seconds: i64,
    pub timeout_seconds: u64,
}

impl TokenProvider {
    #[allow(clippy::too_many_arguments)]
    pub async fn get_token(
        &self,
        tenant_id: &str,
        resource: &str,
        scopes: &[String],
        force_refresh: bool,
        now_epoch: i64,
    ) -> Result<TokenResult, TokenProviderError> {
        self.validate_allowlist(resource, scopes)?;

        let key = CacheKey {
            tenant_id: tenant_id.to_string(),
            client_id: self.client_id.clone(),
            scopes: scopes.to_vec(),
        };

        if !force_refresh {
            if let Some(cached) = self.cache.get_valid(&key, now_epoch, self.cache_skew_seconds) {
                return Ok(self.to_result(
                    TokenRecord { source: "cache", ..cached },
                    tenant_id,
                    resource,
                    scopes,
                ));
            }
        }

        let client_secret = match self.secret_resolver.resolve(&self.secret_reference).await {
            Ok(value) if !value.is_empty() => value,
            Ok(_) => {
                return Err(TokenProviderError::Secret(SecretError::NotFound(
                    self.secret_reference.to_uri(),
                )))
            }
            Err(e) => return Err(TokenProviderError::Secret(e)),
        };

        let scope = scopes.join(" ");
        match self
            .mint_client
            .mint(tenant_id, &self.client_id, &client_secret, &scope, self.timeout_seconds)
            .await
        {
            Ok((access_token, token_type, expires_in)) => {
                let minted = self.cache.put(
                    key,
                    access_token,
                    token_type,
                    expires_in,
                    now_epoch,
                    self.max_ttl_seconds,
                );
                Ok(self.to_result(minted, tenant_id, resource, scopes))
            }
            Err(mint_err) => {
                if let Some(fallback) = self.cache.get_valid(&key, now_epoch, self.cache_skew_seconds) {
                    Ok(self.to_result(
                        TokenRecord { source: "cache_fallback", ..fallback },
                        tenant_id,
                        resource,
                        scopes,
                    ))
                } else {
                    Err(TokenProviderError::Mint(mint_err))
                }
            }
        }
    }

    fn validate_allowlist(&self, resource: &str, scopes: &[String]) -> Result<(), TokenProviderError> {
        if !self.allowed_resources.iter().any(|r| r == resource) {
            return Err(TokenProviderError::PolicyDenied);
        }
        if scopes.iter().any(|s| !self.allowed_scopes.contains(s)) {
            return Err(TokenProviderError::PolicyInvalidScope);
        }
        Ok(())
    }

    fn to_result(
        &self,
        record: TokenRecord,
        tenant_id: &str,
        resource: &str,
        scopes: &[String],
    ) -> TokenResult {
        TokenResult {
            token: record.access_token,
            metadata: TokenMetadata {
                tenant_id: tenant_id.to_string(),
                resource: resource.to_string(),
                scopes: scopes.to_vec(),
                token_type: record.token_type,
                expires_at_epoch: record.expires_at_epoch,
                source: record.source.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSecretResolver(&'static str);

    #[async_trait]
    impl SecretResolver for StubSecretResolver {
        async fn resolve(&self, _reference: &SecretReference) -> Result<String, SecretError> {
            Ok(self.0.to_string())
        }
    }

    struct CountingMinter {
        calls: std::sync::Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl TokenMinter for CountingMinter {
        async fn mint(
            &self,
            _tenant_id: &str,
            _client_id: &str,
            _client_secret: &str,
            _scope: &str,
            _timeout_seconds: u64,
        ) -> Result<(String, String, i64), MintError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(MintError::Unavailable)
            } else {
                Ok(("tok-123".to_string(), "Bearer".to_string(), 300))
            }
        }
    }

    fn provider(mint_client: CountingMinter) -> TokenProvider {
        TokenProvider {
            client_id: "client-1".into(),
            secret_reference: SecretReference::parse("op://vault/item/field").unwrap(),
            secret_resolver: Box::new(StubSecretResolver("shh")),
            mint_client: Box::new(mint_client),
            cache: TokenCache::new(),
            allowed_resources: vec!["https://graph.microsoft.com".into()],
            allowed_scopes: vec!["User.Read".into()],
            cache_skew_seconds: 60,
            max_ttl_seconds: 3000,
            timeout_seconds: 4,
        }
    }

    #[tokio::test]
    async fn denies_resource_not_on_allowlist_before_any_io() {
        let p = provider(CountingMinter { calls: std::sync::Arc::new(AtomicUsize::new(0)), fail: false });
        let err = p
            .get_token("tenant-1", "https://evil.example", &["User.Read".to_string()], false, 0)
            .await
            .unwrap_err();
        assert_eq!(err, TokenProviderError::PolicyDenied);
    }

    #[tokio::test]
    async fn mints_then_serves_from_cache_without_a_second_mint() {
        let calls = std::sync::Arc::new(AtomicUsize::new(0));
        let p = provider(CountingMinter { calls: calls.clone(), fail: false });
        let scopes = vec!["User.Read".to_string()];
        let r1 = p
            .get_token("tenant-1", "https://graph.microsoft.com", &scopes, false, 0)
            .await
            .unwrap();
        assert_eq!(r1.metadata.source, "minted");
        let r2 = p
            .get_token("tenant-1", "https://graph.microsoft.com", &scopes, false, 100)
            .await
            .unwrap();
        assert_eq!(r2.metadata.source, "cache");
        assert_eq!(r2.token, r1.token);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ttl_is_clamped_to_max_ttl_seconds() {
        let p = provider(CountingMinter { calls: std::sync::Arc::new(AtomicUsize::new(0)), fail: false });
        let scopes = vec!["User.Read".to_string()];
        // mint_client always returns expires_in=300, well under max_ttl_seconds=3000.
        let r = p
            .get_token("tenant-1", "https://graph.microsoft.com", &scopes, false, 1_000)
            .await
            .unwrap();
        assert_eq!(r.metadata.expires_at_epoch, 1_000 + 300);
    }

    #[tokio::test]
    async fn falls_back_to_stale_cache_entry_when_mint_fails() {
        let cache = TokenCache::new();
        let key = CacheKey {
            tenant_id: "tenant-1".into(),
            client_id: "client-1".into(),
            scopes: vec!["User.Read".into()],
        };
        cache.put(key, "stale-tok".into(), "Bearer".into(), 10, 0, 3000);

        let mut p = provider(CountingMinter { calls: std::sync::Arc::new(AtomicUsize::new(0)), fail: true });
        p.cache = cache;

        // force_refresh bypasses the fresh-cache read, so mint is attempted
        // and fails, and the stale-but-present entry is used as fallback.
        let r = p
            .get_token("tenant-1", "https://graph.microsoft.com", &["User.Read".to_string()], true, 0)
            .await
            .unwrap();
        assert_eq!(r.metadata.source, "cache_fallback");
        assert_eq!(r.token, "stale-tok");
    }

    #[tokio::test]
    async fn mint_failure_without_any_cache_entry_propagates_the_error() {
        let p = provider(CountingMinter { calls: std::sync::Arc::new(AtomicUsize::new(0)), fail: true });
        let err = p
            .get_token("tenant-1", "https://graph.microsoft.com", &["User.Read".to_string()], false, 0)
            .await
            .unwrap_err();
        assert_eq!(err, TokenProviderError::Mint(MintError::Unavailable));
    }

    #[tokio::test]
    async fn secret_resolution_failure_is_not_eligible_for_fallback() {
        struct FailingResolver;
        #[async_trait]
        impl SecretResolver for FailingResolver {
            async fn resolve(&self, _reference: &SecretReference) -> Result<String, SecretError> {
                Err(SecretError::AccessDenied("denied".into()))
            }
        }
        let cache = TokenCache::new();
        let key = CacheKey {
            tenant_id: "tenant-1".into(),
            client_id: "client-1".into(),
            scopes: vec!["User.Read".into()],
        };
        cache.put(key, "stale-tok".into(), "Bearer".into(), 10, 0, 3000);

        let mut p = provider(CountingMinter { calls: std::sync::Arc::new(AtomicUsize::new(0)), fail: false });
        p.cache = cache;
        p.secret_resolver = Box::new(FailingResolver);

        let err = p
            .get_token("tenant-1", "https://graph.microsoft.com", &["User.Read".to_string()], true, 0)
            .await
            .unwrap_err();
        assert_eq!(err, TokenProviderError::Secret(SecretError::AccessDenied("denied".into())));
    }
}
