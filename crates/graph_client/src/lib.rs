//! mab_graph_client
//!
//! A reference `TokenMinter` over HTTP: POSTs a client-credentials grant to
//! the Microsoft identity platform's v2.0 token endpoint. This is the same
//! extension point `TokenMinter` exists for — swap it for a stub in tests,
//! or for a different identity provider entirely.

use std::time::Duration;

use async_trait::async_trait;
use mab_token::{MintError, TokenMinter};
use serde::Deserialize;

pub struct HttpGraphTokenMintClient {
    client: reqwest::Client,
}

impl Default for HttpGraphTokenMintClient {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl HttpGraphTokenMintClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn token_url(tenant_id: &str) -> String {
        format!("https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/token")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponsePayload {
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    expires_in: Option<i64>,
}

#[async_trait]
impl TokenMinter for HttpGraphTokenMintClient {
    async fn mint(
        &self,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
        scope: &str,
        timeout_seconds: u64,
    ) -> Result<(String, String, i64), MintError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("scope", scope),
        ];

        let response = self
            .client
            .post(Self::token_url(tenant_id))
            .timeout(Duration::from_secs(timeout_seconds))
            .form(&params)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(map_status_error(status.as_u16()));
        }

        let payload: TokenResponsePayload = response.json().await.map_err(|_| MintError::BadResponse)?;

        let access_token = payload.access_token.ok_or(MintError::BadResponse)?;
        let expires_in = payload.expires_in.ok_or(MintError::BadResponse)?;
        let token_type = payload.token_type.unwrap_or_else(|| "Bearer".to_string());

        Ok((access_token, token_type, expires_in))
    }
}

fn map_transport_error(err: reqwest::Error) -> MintError {
    if err.is_timeout() {
        MintError::Timeout
    } else {
        MintError::Unavailable
    }
}

fn map_status_error(status: u16) -> MintError {
    match status {
        401 | 403 => MintError::AuthFailed,
        429 => MintError::RateLimited,
        _ => MintError::Unavailable,
    }
}
