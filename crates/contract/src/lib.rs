//! mab_contract
//!
//! Wire types shared across the broker pipeline: the inbound tool request,
//! the outbound response envelope, policy decisions, redaction records, and
//! the stable dotted error-code taxonomy (§7 of the spec this crate backs).
//!
//! Field defaulting here is intentionally lenient (missing/wrong-shaped
//! optional fields resolve to an empty value) — strict structural
//! validation (unknown fields, required fields, contract version, timeout
//! shape) is the Broker Server's job, not this crate's.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ----------------------------
// Error taxonomy
// ----------------------------

/// The exhaustive, dotted error taxonomy. A public contract: never renamed
/// or collapsed across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequestInvalidField,
    BadRequestInvalidTimeout,
    BadRequestUnsupportedOperation,
    PolicyDenied,
    PolicyInvalidScope,
    PolicyMissingIdentity,
    SecretNotFound,
    SecretAccessDenied,
    SecretTimeout,
    SecretUnavailable,
    ProviderTimeout,
    ProviderAuthFailed,
    ProviderRateLimited,
    ProviderUnavailable,
    ProviderBadResponse,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadRequestInvalidField => "bad_request.invalid_field",
            ErrorCode::BadRequestInvalidTimeout => "bad_request.invalid_timeout",
            ErrorCode::BadRequestUnsupportedOperation => "bad_request.unsupported_operation",
            ErrorCode::PolicyDenied => "policy.denied",
            ErrorCode::PolicyInvalidScope => "policy.invalid_scope",
            ErrorCode::PolicyMissingIdentity => "policy.missing_identity",
            ErrorCode::SecretNotFound => "secret.not_found",
            ErrorCode::SecretAccessDenied => "secret.access_denied",
            ErrorCode::SecretTimeout => "secret.timeout",
            ErrorCode::SecretUnavailable => "secret.unavailable",
            ErrorCode::ProviderTimeout => "provider.timeout",
            ErrorCode::ProviderAuthFailed => "provider.auth_failed",
            ErrorCode::ProviderRateLimited => "provider.rate_limited",
            ErrorCode::ProviderUnavailable => "provider.unavailable",
            ErrorCode::ProviderBadResponse => "provider.bad_response",
        }
    }

    /// First dotted segment of the code, e.g. "policy" for "policy.denied".
    pub fn category(self) -> &'static str {
        self.as_str().split('.').next().unwrap_or(self.as_str())
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------
// Redaction
// ----------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedactionRecord {
    pub field: String,
    pub reason: String,
}

// ----------------------------
// Request
// ----------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Requester {
    #[serde(default)]
    pub requester_id: String,
    /// Anything else the caller sent (e.g. `identity_assurance`). Carried
    /// through untouched; the broker never inspects it.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GraphParams {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub scopes: Value,
}

impl GraphParams {
    /// `scopes` as an ordered list of strings; empty if absent or not a
    /// JSON array (§4.3: "empty list if absent or non-list").
    pub fn scopes_as_list(&self) -> Vec<String> {
        match &self.scopes {
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OperationParams {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub contract_version: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub requester: Requester,
    #[serde(default)]
    pub graph: GraphParams,
    #[serde(default)]
    pub operation: OperationParams,
    #[serde(default)]
    pub timeout_ms: Option<Value>,
}

// ----------------------------
// Policy
// ----------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyMetadata {
    pub policy_version: String,
    pub matched_rule_id: Option<String>,
    pub requester_id: String,
    pub tenant_id: String,
    pub scopes_evaluated: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision: String, // "allow" | "deny"
    pub reason: String,
    pub metadata: PolicyMetadata,
}

impl PolicyDecision {
    pub fn is_allow(&self) -> bool {
        self.decision == "allow"
    }
}

// ----------------------------
// Token metadata (crosses the trust boundary; the token itself never does)
// ----------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub tenant_id: String,
    pub resource: String,
    pub scopes: Vec<String>,
    pub token_type: String,
    pub expires_at_epoch: i64,
    pub source: String, // "minted" | "cache" | "cache_fallback"
}

// ----------------------------
// Tool registry
// ----------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

// ----------------------------
// Response envelope
// ----------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResponseBody {
    pub ok: bool,
    pub token_metadata: TokenMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub mode: String,
    pub provider: String,
    pub provider_request_id: String,
    pub http_status: u16,
    pub response_headers: Value,
    pub response_body: ExecutionResponseBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuccessResult {
    pub policy: PolicyDecision,
    pub execution: ExecutionResult,
    pub redactions: Vec<RedactionRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuccessResponse {
    pub contract_version: String,
    pub request_id: String,
    pub status: String,
    pub result: SuccessResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub category: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub contract_version: String,
    pub request_id: String,
    pub status: String,
    pub error: ErrorDetail,
    pub redactions: Vec<RedactionRecord>,
}

impl ErrorResponse {
    pub fn new(
        contract_version: impl Into<String>,
        request_id: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
        metadata: Value,
    ) -> Self {
        Self {
            contract_version: contract_version.into(),
            request_id: request_id.into(),
            status: "error".to_string(),
            error: ErrorDetail {
                code: code.as_str().to_string(),
                message: message.into(),
                retryable: false,
                category: code.category().to_string(),
                metadata,
            },
            redactions: Vec::new(),
        }
    }

    /// Build an error response whose `code`/`category` come from a raw,
    /// externally-sourced string (a collaborator's own error code) rather
    /// than an `ErrorCode` variant — used when propagating a capability's
    /// error verbatim without remapping it (§7 propagation policy).
    pub fn from_raw_code(
        contract_version: impl Into<String>,
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        metadata: Value,
    ) -> Self {
        let code = code.into();
        let category = code.split('.').next().unwrap_or(&code).to_string();
        Self {
            contract_version: contract_version.into(),
            request_id: request_id.into(),
            status: "error".to_string(),
            error: ErrorDetail {
                code,
                message: message.into(),
                retryable: false,
                category,
                metadata,
            },
            redactions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok(SuccessResponse),
    Error(ErrorResponse),
}

impl Response {
    pub fn status(&self) -> &'static str {
        match self {
            Response::Ok(_) => "ok",
            Response::Error(_) => "error",
        }
    }
}
