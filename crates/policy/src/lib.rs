//! mab_policy
//!
//! Pure policy evaluation: no I/O, no audit emission, no mutation. Given a
//! request and the broker's configured allowlist, decide allow or deny.

use mab_config::BrokerConfig;
use mab_contract::{PolicyDecision, PolicyMetadata, Request};

const RULE_MISSING_IDENTITY: &str = "policy.missing_identity";
const RULE_DENY_SCOPE: &str = "policy.rule.deny.scope.not_permitted";
const RULE_ALLOW_USER_READ: &str = "policy.rule.allow.graph.user.read";
const MATCHED_RULE_ALLOW_USER_READ: &str = "allow-user-read";

pub fn evaluate(request: &Request, config: &BrokerConfig) -> PolicyDecision {
    let tenant_id = request.graph.tenant_id.clone();
    let scopes = request.graph.scopes_as_list();
    let requester_id = request.requester.requester_id.clone();

    if requester_id.is_empty() {
        return PolicyDecision {
            decision: "deny".to_string(),
            reason: RULE_MISSING_IDENTITY.to_string(),
            metadata: PolicyMetadata {
                policy_version: config.policy_version.clone(),
                matched_rule_id: None,
                requester_id: String::new(),
                tenant_id,
                scopes_evaluated: scopes,
            },
        };
    }

    let unsupported_scopes: Vec<&String> = scopes
        .iter()
        .filter(|scope| !config.allowed_scopes.contains(scope))
        .collect();

    if !unsupported_scopes.is_empty() {
        return PolicyDecision {
            decision: "deny".to_string(),
            reason: RULE_DENY_SCOPE.to_string(),
            metadata: PolicyMetadata {
                policy_version: config.policy_version.clone(),
                matched_rule_id: None,
                requester_id,
                tenant_id,
                scopes_evaluated: scopes,
            },
        };
    }

    PolicyDecision {
        decision: "allow".to_string(),
        reason: RULE_ALLOW_USER_READ.to_string(),
        metadata: PolicyMetadata {
            policy_version: config.policy_version.clone(),
            matched_rule_id: Some(MATCHED_RULE_ALLOW_USER_READ.to_string()),
            requester_id,
            tenant_id,
            scopes_evaluated: scopes,
        },
    }
}
