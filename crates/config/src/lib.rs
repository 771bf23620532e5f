//! mab_config
//!
//! `BrokerConfig::from_env` reads broker configuration from the process
//! environment. It does not load `.env` files — that happens once, in the
//! CLI entrypoint, before this is called.

use std::env;

use mab_secrets::SecretReference;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretProviderMode {
    None,
    OnePassword,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub environment: String,
    pub service_name: String,
    pub contract_version: String,
    pub policy_version: String,
    pub default_timeout_ms: u64,
    pub allowed_scopes: Vec<String>,
    pub secret_provider_mode: SecretProviderMode,
    pub graph_secret_reference: Option<SecretReference>,
    pub graph_client_id: String,
    pub allowed_graph_resources: Vec<String>,
    pub token_cache_skew_seconds: i64,
    pub token_max_ttl_seconds: i64,
    pub token_provider_timeout_seconds: u64,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl BrokerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let timeout_raw = env_or("MCP_AUTH_BROKER_DEFAULT_TIMEOUT_MS", "10000");
        let default_timeout_ms: i64 = timeout_raw
            .parse()
            .map_err(|_| invalid("MCP_AUTH_BROKER_DEFAULT_TIMEOUT_MS must be an integer"))?;
        if default_timeout_ms <= 0 {
            return Err(invalid("MCP_AUTH_BROKER_DEFAULT_TIMEOUT_MS must be positive"));
        }

        let scopes_raw = env_or("MCP_AUTH_BROKER_ALLOWED_SCOPES", "User.Read");
        let allowed_scopes = parse_csv(&scopes_raw);
        if allowed_scopes.is_empty() {
            return Err(invalid("MCP_AUTH_BROKER_ALLOWED_SCOPES must contain at least one scope"));
        }

        let secret_provider_raw = env_or("MCP_AUTH_BROKER_SECRET_PROVIDER", "none");
        let secret_provider_mode = match secret_provider_raw.as_str() {
            "none" => SecretProviderMode::None,
            "1password" => SecretProviderMode::OnePassword,
            _ => {
                return Err(invalid(
                    "MCP_AUTH_BROKER_SECRET_PROVIDER must be one of: none, 1password",
                ))
            }
        };

        let secret_reference_raw = env_or("MCP_AUTH_BROKER_GRAPH_SECRET_REF", "");
        let secret_reference_raw = secret_reference_raw.trim();
        let graph_secret_reference = if secret_reference_raw.is_empty() {
            None
        } else {
            Some(
                SecretReference::parse(secret_reference_raw)
                    .map_err(|_| invalid("MCP_AUTH_BROKER_GRAPH_SECRET_REF is invalid"))?,
            )
        };

        let graph_client_id = env_or("MCP_AUTH_BROKER_GRAPH_CLIENT_ID", "").trim().to_string();

        let resources_raw = env_or(
            "MCP_AUTH_BROKER_ALLOWED_GRAPH_RESOURCES",
            "https://graph.microsoft.com",
        );
        let allowed_graph_resources = parse_csv(&resources_raw);
        if allowed_graph_resources.is_empty() {
            return Err(invalid(
                "MCP_AUTH_BROKER_ALLOWED_GRAPH_RESOURCES must contain at least one value",
            ));
        }

        let skew_raw = env_or("MCP_AUTH_BROKER_TOKEN_CACHE_SKEW_SECONDS", "60");
        let ttl_raw = env_or("MCP_AUTH_BROKER_TOKEN_MAX_TTL_SECONDS", "3000");
        let timeout_raw = env_or("MCP_AUTH_BROKER_TOKEN_PROVIDER_TIMEOUT_SECONDS", "4");
        let token_cache_skew_seconds: i64 = skew_raw
            .parse()
            .map_err(|_| invalid("Token provider/cache settings must be integers"))?;
        let token_max_ttl_seconds: i64 = ttl_raw
            .parse()
            .map_err(|_| invalid("Token provider/cache settings must be integers"))?;
        let token_provider_timeout_seconds: i64 = timeout_raw
            .parse()
            .map_err(|_| invalid("Token provider/cache settings must be integers"))?;

        if token_cache_skew_seconds < 0 {
            return Err(invalid("MCP_AUTH_BROKER_TOKEN_CACHE_SKEW_SECONDS cannot be negative"));
        }
        if token_max_ttl_seconds <= 0 {
            return Err(invalid("MCP_AUTH_BROKER_TOKEN_MAX_TTL_SECONDS must be positive"));
        }
        if token_provider_timeout_seconds <= 0 {
            return Err(invalid(
                "MCP_AUTH_BROKER_TOKEN_PROVIDER_TIMEOUT_SECONDS must be positive",
            ));
        }

        Ok(BrokerConfig {
            environment: env_or("MCP_AUTH_BROKER_ENV", "dev"),
            service_name: env_or("MCP_AUTH_BROKER_SERVICE_NAME", "mcp-auth-broker"),
            contract_version: env_or("MCP_AUTH_BROKER_CONTRACT_VERSION", "v0.1.0"),
            policy_version: env_or("MCP_AUTH_BROKER_POLICY_VERSION", "v0.1.0"),
            default_timeout_ms: default_timeout_ms as u64,
            allowed_scopes,
            secret_provider_mode,
            graph_secret_reference,
            graph_client_id,
            allowed_graph_resources,
            token_cache_skew_seconds,
            token_max_ttl_seconds,
            token_provider_timeout_seconds: token_provider_timeout_seconds as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for key in [
            "MCP_AUTH_BROKER_ENV",
            "MCP_AUTH_BROKER_SERVICE_NAME",
            "MCP_AUTH_BROKER_CONTRACT_VERSION",
            "MCP_AUTH_BROKER_POLICY_VERSION",
            "MCP_AUTH_BROKER_DEFAULT_TIMEOUT_MS",
            "MCP_AUTH_BROKER_ALLOWED_SCOPES",
            "MCP_AUTH_BROKER_SECRET_PROVIDER",
            "MCP_AUTH_BROKER_GRAPH_SECRET_REF",
            "MCP_AUTH_BROKER_GRAPH_CLIENT_ID",
            "MCP_AUTH_BROKER_ALLOWED_GRAPH_RESOURCES",
            "MCP_AUTH_BROKER_TOKEN_CACHE_SKEW_SECONDS",
            "MCP_AUTH_BROKER_TOKEN_MAX_TTL_SECONDS",
            "MCP_AUTH_BROKER_TOKEN_PROVIDER_TIMEOUT_SECONDS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn defaults_apply_when_env_is_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let cfg = BrokerConfig::from_env().unwrap();
        assert_eq!(cfg.environment, "dev");
        assert_eq!(cfg.default_timeout_ms, 10000);
        assert_eq!(cfg.allowed_scopes, vec!["User.Read".to_string()]);
        assert_eq!(cfg.secret_provider_mode, SecretProviderMode::None);
        assert!(cfg.graph_secret_reference.is_none());
    }

    #[test]
    fn rejects_non_integer_timeout() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("MCP_AUTH_BROKER_DEFAULT_TIMEOUT_MS", "soon");
        assert!(BrokerConfig::from_env().is_err());
        env::remove_var("MCP_AUTH_BROKER_DEFAULT_TIMEOUT_MS");
    }

    #[test]
    fn rejects_unknown_secret_provider_mode() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("MCP_AUTH_BROKER_SECRET_PROVIDER", "vault");
        assert!(BrokerConfig::from_env().is_err());
        env::remove_var("MCP_AUTH_BROKER_SECRET_PROVIDER");
    }

    #[test]
    fn parses_valid_graph_secret_reference() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("MCP_AUTH_BROKER_GRAPH_SECRET_REF", "op://vault/item/field");
        let cfg = BrokerConfig::from_env().unwrap();
        assert_eq!(cfg.graph_secret_reference.unwrap().to_uri(), "op://vault/item/field");
        env::remove_var("MCP_AUTH_BROKER_GRAPH_SECRET_REF");
    }
}
