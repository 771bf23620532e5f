//! mab_broker
//!
//! The Broker Server: request validation, the audit-emitting policy and
//! token pipeline, health/readiness/discovery, and the single registered
//! tool (`auth.graph.operation.execute.v1`).

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use mab_audit::{AuditEmitter, EventContext};
use mab_config::BrokerConfig;
use mab_contract::{
    ErrorCode, ErrorResponse, ExecutionResponseBody, ExecutionResult, Request, Response,
    SuccessResponse, SuccessResult, ToolDefinition,
};
use mab_secrets::{SecretReference, SecretResolver};
use mab_token::TokenProvider;
use serde_json::{json, Value};
use uuid::Uuid;

pub const TOOL_NAME: &str = "auth.graph.operation.execute.v1";

const ALLOWED_TOP_LEVEL_FIELDS: &[&str] =
    &["contract_version", "request_id", "requester", "graph", "operation", "timeout_ms"];
const REQUIRED_FIELDS: &[&str] = &["contract_version", "request_id", "requester", "graph", "operation"];

pub struct BrokerServer {
    config: BrokerConfig,
    audit: Mutex<AuditEmitter>,
    token_provider: TokenProvider,
    /// Server-level secret check, independent of the Token Provider's own
    /// per-call secret resolution — only active when both a resolver and a
    /// `graph_secret_reference` are configured.
    secret_resolver: Option<Box<dyn SecretResolver>>,
    tools: Vec<ToolDefinition>,
}

impl BrokerServer {
    pub fn new(
        config: BrokerConfig,
        audit: AuditEmitter,
        token_provider: TokenProvider,
        secret_resolver: Option<Box<dyn SecretResolver>>,
    ) -> Self {
        let tools = vec![ToolDefinition {
            name: TOOL_NAME.to_string(),
            description: "Evaluate policy and execute approved Microsoft Graph operation.".to_string(),
            input_schema: json!({
                "type": "object",
                "required": ["contract_version", "request_id", "requester", "graph", "operation"],
            }),
        }];

        Self {
            config,
            audit: Mutex::new(audit),
            token_provider,
            secret_resolver,
            tools,
        }
    }

    pub fn health(&self) -> Value {
        json!({"status": "ok", "service": self.config.service_name})
    }

    pub fn readiness(&self) -> Value {
        json!({"status": "ready", "environment": self.config.environment})
    }

    pub fn discover_tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub async fn execute_tool(&self, tool_name: &str, raw_request: Value) -> Response {
        let request_id_for_errors = request_id_hint(&raw_request);

        if tool_name != TOOL_NAME {
            return Response::Error(self.error_response(
                &request_id_for_errors,
                ErrorCode::BadRequestUnsupportedOperation,
                "Unsupported tool name",
                json!({"tool_name": tool_name}),
            ));
        }

        let request = match self.validate_request(&raw_request) {
            Ok(request) => request,
            Err(error) => return Response::Error(error),
        };

        let trace_id = Uuid::new_v4().to_string();
        let ctx = EventContext {
            request_id: request.request_id.clone(),
            trace_id: trace_id.clone(),
            requester_id: request.requester.requester_id.clone(),
        };

        {
            let mut audit = self.audit.lock().expect("audit mutex poisoned");
            let _ = audit.emit(
                "request.received",
                &ctx,
                json!({
                    "tool_name": tool_name,
                    "contract_version": request.contract_version.clone(),
                    "tenant_id": request.graph.tenant_id.clone(),
                    "requested_scopes": request.graph.scopes_as_list(),
                }),
                vec![],
            );
        }

        let policy_decision = mab_policy::evaluate(&request, &self.config);
        {
            let mut audit = self.audit.lock().expect("audit mutex poisoned");
            let _ = audit.emit(
                "policy.decided",
                &ctx,
                json!({
                    "decision": policy_decision.decision.clone(),
                    "reason": policy_decision.reason.clone(),
                    "policy_version": policy_decision.metadata.policy_version.clone(),
                    "matched_rule_id": policy_decision.metadata.matched_rule_id.clone(),
                }),
                vec![],
            );
        }

        if !policy_decision.is_allow() {
            let response = self.error_response(
                &request.request_id,
                ErrorCode::PolicyDenied,
                "Access denied by policy",
                json!({"reason_code": policy_decision.reason.clone()}),
            );
            self.emit_result(&ctx, "error", Some(response.error.code.clone()));
            return Response::Error(response);
        }

        if let Some(error) = self.resolve_server_graph_secret(&request.request_id).await {
            self.emit_result_with_redaction(&ctx, &error.error.code);
            return Response::Error(error);
        }

        let now_epoch = now_epoch_seconds();
        let scopes = request.graph.scopes_as_list();
        let token_result = self
            .token_provider
            .get_token(&request.graph.tenant_id, &request.graph.resource, &scopes, false, now_epoch)
            .await;

        let token_result = match token_result {
            Ok(result) => result,
            Err(err) => {
                let response = self.error_response(
                    &request.request_id,
                    err.code(),
                    "token provider failed",
                    json!({}),
                );
                self.emit_result(&ctx, "error", Some(response.error.code.clone()));
                return Response::Error(response);
            }
        };

        let effective_timeout = request
            .timeout_ms
            .as_ref()
            .and_then(|v| v.as_i64())
            .unwrap_or(self.config.default_timeout_ms as i64);

        {
            let mut audit = self.audit.lock().expect("audit mutex poisoned");
            let _ = audit.emit(
                "provider.called",
                &ctx,
                json!({
                    "provider": "microsoft_graph",
                    "operation": {
                        "action": request.operation.action.clone(),
                        "method": request.operation.method.clone(),
                        "path": request.operation.path.clone(),
                    },
                    "timeout_ms": effective_timeout,
                    "attempt": 1,
                    "outcome": "success",
                }),
                vec![],
            );
        }

        let response = SuccessResponse {
            contract_version: self.config.contract_version.clone(),
            request_id: request.request_id.clone(),
            status: "ok".to_string(),
            result: SuccessResult {
                policy: policy_decision,
                execution: ExecutionResult {
                    mode: "broker_downstream_execution".to_string(),
                    provider: "microsoft_graph".to_string(),
                    provider_request_id: Uuid::new_v4().to_string(),
                    http_status: 200,
                    response_headers: json!({}),
                    response_body: ExecutionResponseBody {
                        ok: true,
                        token_metadata: token_result.metadata,
                    },
                },
                redactions: vec![],
            },
        };

        self.emit_result(&ctx, "ok", None);
        Response::Ok(response)
    }

    fn emit_result(&self, ctx: &EventContext, status: &str, error_code: Option<String>) {
        let mut audit = self.audit.lock().expect("audit mutex poisoned");
        let _ = audit.emit(
            "result.emitted",
            ctx,
            json!({"status": status, "error_code": error_code, "duration_ms": 0}),
            vec![],
        );
    }

    fn emit_result_with_redaction(&self, ctx: &EventContext, error_code: &str) {
        let mut audit = self.audit.lock().expect("audit mutex poisoned");
        let _ = audit.emit(
            "result.emitted",
            ctx,
            json!({"status": "error", "error_code": error_code, "duration_ms": 0}),
            vec![mab_contract::RedactionRecord {
                field: "error.metadata.secret_value".to_string(),
                reason: "sensitive".to_string(),
            }],
        );
    }

    async fn resolve_server_graph_secret(&self, request_id: &str) -> Option<ErrorResponse> {
        let resolver = self.secret_resolver.as_ref()?;
        let reference = self.config.graph_secret_reference.as_ref()?;

        let resolved = resolver.resolve(reference).await;
        match resolved {
            Err(err) => Some(self.error_response(
                request_id,
                err.code(),
                "secret provider error",
                json!({"reference": reference.to_uri()}),
            )),
            Ok(value) if value.is_empty() => Some(self.error_response(
                request_id,
                ErrorCode::SecretNotFound,
                "secret reference returned empty value",
                json!({"reference": reference.to_uri()}),
            )),
            Ok(_) => None,
        }
    }

    fn error_response(
        &self,
        request_id: &str,
        code: ErrorCode,
        message: &str,
        metadata: Value,
    ) -> ErrorResponse {
        ErrorResponse::new(self.config.contract_version.clone(), request_id, code, message, metadata)
    }

    fn validate_request(&self, raw: &Value) -> Result<Request, ErrorResponse> {
        let request_id = request_id_hint(raw);
        let object = raw.as_object().ok_or_else(|| {
            self.error_response(
                &request_id,
                ErrorCode::BadRequestInvalidField,
                "Request body must be a JSON object",
                json!({}),
            )
        })?;

        let mut unknown_fields: Vec<&str> = object
            .keys()
            .map(|k| k.as_str())
            .filter(|k| !ALLOWED_TOP_LEVEL_FIELDS.contains(k))
            .collect();
        unknown_fields.sort_unstable();
        if !unknown_fields.is_empty() {
            return Err(self.error_response(
                &request_id,
                ErrorCode::BadRequestInvalidField,
                "Unknown request fields",
                json!({"fields": unknown_fields}),
            ));
        }

        let missing_fields: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .filter(|f| !object.contains_key(**f))
            .copied()
            .collect();
        if !missing_fields.is_empty() {
            return Err(self.error_response(
                &request_id,
                ErrorCode::BadRequestInvalidField,
                "Missing required fields",
                json!({"fields": missing_fields}),
            ));
        }

        let contract_version = object.get("contract_version").and_then(Value::as_str).unwrap_or("");
        if contract_version != self.config.contract_version {
            return Err(self.error_response(
                &request_id,
                ErrorCode::BadRequestInvalidField,
                "Unsupported contract_version",
                json!({"contract_version": contract_version}),
            ));
        }

        let timeout_value = object
            .get("timeout_ms")
            .cloned()
            .unwrap_or_else(|| json!(self.config.default_timeout_ms));
        let timeout_ok = timeout_value.as_i64().map(|v| v > 0).unwrap_or(false);
        if !timeout_ok {
            return Err(self.error_response(
                &request_id,
                ErrorCode::BadRequestInvalidTimeout,
                "timeout_ms must be a positive integer",
                json!({"timeout_ms": timeout_value}),
            ));
        }

        serde_json::from_value(raw.clone()).map_err(|_| {
            self.error_response(
                &request_id,
                ErrorCode::BadRequestInvalidField,
                "Request body does not match the expected shape",
                json!({}),
            )
        })
    }
}

fn request_id_hint(raw: &Value) -> String {
    raw.get("request_id")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs() as i64
}
