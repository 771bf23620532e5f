use std::path::Path;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use dotenvy::from_path as dotenv_from_path;
use mab_audit::AuditEmitter;
use mab_broker::{BrokerServer, TOOL_NAME};
use mab_config::{BrokerConfig, SecretProviderMode};
use mab_contract::Response;
use mab_graph_client::HttpGraphTokenMintClient;
use mab_secrets::{SecretError, SecretReference, SecretResolver};
use mab_token::{MintError, TokenCache, TokenMinter, TokenProvider};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(#[from] mab_config::ConfigError),
    #[error("{0}")]
    Setup(String),
}

#[derive(Parser)]
#[command(name = "mab-broker", version, about = "MCP auth broker: Graph token gateway")]
struct Args {
    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the broker (prints a started banner; the long-running server
    /// loop is out of this binary's scope).
    Run,
    /// Liveness probe.
    Health,
    /// Readiness probe.
    Ready,
    /// List registered tools.
    Tools,
    /// Run the in-process smoke harness end to end.
    SmokeE2e,
}

/// Reads the client secret straight out of the process environment, keyed
/// by the reference's own parts. A stand-in for a real secret manager
/// integration (1Password, a KMS, ...), which a production deployment
/// supplies by implementing `SecretResolver` itself.
struct EnvSecretResolver;

#[async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn resolve(&self, reference: &SecretReference) -> Result<String, SecretError> {
        let key = format!(
            "MAB_SECRET_{}_{}_{}",
            reference.vault.to_uppercase(),
            reference.item.to_uppercase(),
            reference.field.to_uppercase()
        );
        match std::env::var(&key) {
            Ok(value) if !value.is_empty() => Ok(value),
            Ok(_) | Err(_) => Err(SecretError::NotFound(reference.to_uri())),
        }
    }
}

struct SmokeSecretResolver;

#[async_trait]
impl SecretResolver for SmokeSecretResolver {
    async fn resolve(&self, _reference: &SecretReference) -> Result<String, SecretError> {
        Ok("smoke-secret".to_string())
    }
}

struct SmokeMintClient;

#[async_trait]
impl TokenMinter for SmokeMintClient {
    async fn mint(
        &self,
        _tenant_id: &str,
        _client_id: &str,
        _client_secret: &str,
        _scope: &str,
        _timeout_seconds: u64,
    ) -> Result<(String, String, i64), MintError> {
        Ok(("smoke-token-value".to_string(), "Bearer".to_string(), 600))
    }
}

fn load_dotenv() {
    let repo_env = Path::new(".env");
    if repo_env.exists() {
        let _ = dotenv_from_path(repo_env);
        eprintln!("loaded env from ./.env");
    }
}

fn build_server(config: BrokerConfig) -> Result<BrokerServer, CliError> {
    let secret_reference = config.graph_secret_reference.clone().ok_or_else(|| {
        CliError::Setup(
            "MCP_AUTH_BROKER_GRAPH_SECRET_REF must be set to run the broker".to_string(),
        )
    })?;

    if config.secret_provider_mode == SecretProviderMode::OnePassword {
        return Err(CliError::Setup(
            "MCP_AUTH_BROKER_SECRET_PROVIDER=1password is not wired into this binary; supply a \
             SecretResolver via the library API instead"
                .to_string(),
        ));
    }

    let token_provider = TokenProvider {
        client_id: config.graph_client_id.clone(),
        secret_reference,
        secret_resolver: Box::new(EnvSecretResolver),
        mint_client: Box::new(HttpGraphTokenMintClient::new()),
        cache: TokenCache::new(),
        allowed_resources: config.allowed_graph_resources.clone(),
        allowed_scopes: config.allowed_scopes.clone(),
        cache_skew_seconds: config.token_cache_skew_seconds,
        max_ttl_seconds: config.token_max_ttl_seconds,
        timeout_seconds: config.token_provider_timeout_seconds,
    };

    let audit = AuditEmitter::new(
        config.contract_version.clone(),
        config.service_name.clone(),
        config.environment.clone(),
    );

    Ok(BrokerServer::new(config, audit, token_provider, None))
}

async fn run_smoke_e2e() -> serde_json::Value {
    let config = BrokerConfig {
        environment: "smoke".to_string(),
        service_name: "mcp-auth-broker".to_string(),
        contract_version: "v0.1.0".to_string(),
        policy_version: "v0.1.0".to_string(),
        default_timeout_ms: 10000,
        allowed_scopes: vec!["User.Read".to_string()],
        secret_provider_mode: SecretProviderMode::None,
        graph_secret_reference: Some(SecretReference::parse("op://vault/item/field").unwrap()),
        graph_client_id: "smoke-client".to_string(),
        allowed_graph_resources: vec!["https://graph.microsoft.com".to_string()],
        token_cache_skew_seconds: 60,
        token_max_ttl_seconds: 3000,
        token_provider_timeout_seconds: 4,
    };

    let token_provider = TokenProvider {
        client_id: config.graph_client_id.clone(),
        secret_reference: config.graph_secret_reference.clone().unwrap(),
        secret_resolver: Box::new(SmokeSecretResolver),
        mint_client: Box::new(SmokeMintClient),
        cache: TokenCache::new(),
        allowed_resources: config.allowed_graph_resources.clone(),
        allowed_scopes: config.allowed_scopes.clone(),
        cache_skew_seconds: config.token_cache_skew_seconds,
        max_ttl_seconds: config.token_max_ttl_seconds,
        timeout_seconds: config.token_provider_timeout_seconds,
    };

    let audit = AuditEmitter::new(
        config.contract_version.clone(),
        config.service_name.clone(),
        config.environment.clone(),
    );

    let server = BrokerServer::new(config, audit, token_provider, None);

    let request = json!({
        "contract_version": "v0.1.0",
        "request_id": "smoke-req-1",
        "requester": {"requester_id": "smoke-user", "identity_assurance": "verified"},
        "graph": {
            "tenant_id": "smoke-tenant",
            "resource": "https://graph.microsoft.com",
            "scopes": ["User.Read"],
        },
        "operation": {"action": "downstream_call", "method": "GET", "path": "/v1.0/me"},
        "timeout_ms": 1000,
    });

    let response = server.execute_tool(TOOL_NAME, request).await;

    match response {
        Response::Ok(ok) => {
            let token_metadata = &ok.result.execution.response_body.token_metadata;
            json!({
                "status": "ok",
                "checks": ["request", "policy", "secret", "token_response"],
                "token_source": token_metadata.source,
            })
        }
        Response::Error(_) => panic!("smoke e2e failed"),
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("ERROR: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    load_dotenv();
    let args = Args::parse();
    let config = BrokerConfig::from_env()?;

    match args.cmd.unwrap_or(Command::Run) {
        Command::Health => {
            let server = build_server(config)?;
            print_json(&server.health());
        }
        Command::Ready => {
            let server = build_server(config)?;
            print_json(&server.readiness());
        }
        Command::Tools => {
            let server = build_server(config)?;
            print_json(server.discover_tools());
        }
        Command::SmokeE2e => {
            print_json(&run_smoke_e2e().await);
        }
        Command::Run => {
            print_json(&json!({
                "status": "started",
                "service": config.service_name,
                "environment": config.environment,
            }));
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) {
    println!("{}", mab_common::canonical_json_string(value).unwrap());
}
