//! mab_secrets
//!
//! `op://vault/item/field` secret references and the `SecretResolver`
//! capability trait. No concrete resolver ships here — callers supply one
//! (a test double, a password-manager CLI wrapper, a KMS client, ...).

use async_trait::async_trait;
use mab_contract::ErrorCode;
use thiserror::Error;

/// A parsed `op://<vault>/<item>/<field>` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
    pub vault: String,
    pub item: String,
    pub field: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid secret reference: {0}")]
pub struct InvalidReference(pub String);

impl SecretReference {
    const SCHEME: &'static str = "op://";

    /// Parse `op://vault/item/field`. Exactly three non-empty parts are
    /// required; anything else is rejected rather than guessed at.
    pub fn parse(uri: &str) -> Result<Self, InvalidReference> {
        let rest = uri
            .strip_prefix(Self::SCHEME)
            .ok_or_else(|| InvalidReference(uri.to_string()))?;

        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(InvalidReference(uri.to_string()));
        }

        Ok(SecretReference {
            vault: parts[0].to_string(),
            item: parts[1].to_string(),
            field: parts[2].to_string(),
        })
    }

    pub fn to_uri(&self) -> String {
        format!("{}{}/{}/{}", Self::SCHEME, self.vault, self.item, self.field)
    }
}

/// The closed error set a `SecretResolver` may return. `bad_request.invalid_field`
/// is reserved for reference parsing, done before any resolver is invoked.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),
    #[error("secret access denied: {0}")]
    AccessDenied(String),
    #[error("secret resolution timed out: {0}")]
    Timeout(String),
    #[error("secret provider unavailable: {0}")]
    Unavailable(String),
}

impl SecretError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SecretError::NotFound(_) => ErrorCode::SecretNotFound,
            SecretError::AccessDenied(_) => ErrorCode::SecretAccessDenied,
            SecretError::Timeout(_) => ErrorCode::SecretTimeout,
            SecretError::Unavailable(_) => ErrorCode::SecretUnavailable,
        }
    }
}

/// Resolves a `SecretReference` to its plaintext value.
///
/// A resolver that returns an empty string on success must be treated by
/// the caller as equivalent to `SecretError::NotFound` — an empty secret
/// is never a usable one.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, reference: &SecretReference) -> Result<String, SecretError>;
}

/// Resolve and collapse the "empty string on success" case to `NotFound`.
pub async fn resolve_non_empty(
    resolver: &dyn SecretResolver,
    reference: &SecretReference,
) -> Result<String, SecretError> {
    let value = resolver.resolve(reference).await?;
    if value.is_empty() {
        return Err(SecretError::NotFound(reference.to_uri()));
    }
    Ok(value)
}
