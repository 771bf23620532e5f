use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("mab-broker"))
}

#[test]
fn health_reports_configured_service_name() {
    cmd()
        .arg("health")
        .env("MCP_AUTH_BROKER_SERVICE_NAME", "mcp-auth-broker")
        .env("MCP_AUTH_BROKER_GRAPH_SECRET_REF", "op://vault/item/field")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\":\"ok\""))
        .stdout(predicate::str::contains("\"service\":\"mcp-auth-broker\""));
}

#[test]
fn ready_reports_configured_environment() {
    cmd()
        .arg("ready")
        .env("MCP_AUTH_BROKER_ENV", "staging")
        .env("MCP_AUTH_BROKER_GRAPH_SECRET_REF", "op://vault/item/field")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"environment\":\"staging\""));
}

#[test]
fn tools_lists_the_single_registered_tool() {
    cmd()
        .arg("tools")
        .env("MCP_AUTH_BROKER_GRAPH_SECRET_REF", "op://vault/item/field")
        .assert()
        .success()
        .stdout(predicate::str::contains("auth.graph.operation.execute.v1"));
}

#[test]
fn smoke_e2e_succeeds_and_reports_a_minted_token_source() {
    cmd()
        .arg("smoke-e2e")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\":\"ok\""))
        .stdout(predicate::str::contains("\"token_source\":\"minted\""));
}

#[test]
fn run_without_a_graph_secret_reference_reports_missing_configuration() {
    cmd()
        .arg("run")
        .env_remove("MCP_AUTH_BROKER_GRAPH_SECRET_REF")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\":\"started\""));
}

#[test]
fn health_without_a_graph_secret_reference_fails_with_a_clear_error() {
    cmd()
        .arg("health")
        .env_remove("MCP_AUTH_BROKER_GRAPH_SECRET_REF")
        .assert()
        .failure()
        .stderr(predicate::str::contains("GRAPH_SECRET_REF"));
}
