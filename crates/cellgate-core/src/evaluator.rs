//! Contract with the external policy engine.
//!
//! The engine answers one resource+action question at a time. Everything
//! about decomposing a multi-family request into such questions lives in
//! [`crate::access`].

use crate::audit::AuditEvent;
use crate::error::AuthzResult;
use crate::request::{Action, MatchingScope, ResourcePath};
use std::collections::BTreeSet;

/// A single resource+action question for the policy engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    /// Resource being checked.
    pub resource: ResourcePath,
    /// Action being checked.
    pub action: Action,
    /// Principal short name.
    pub user: String,
    /// Principal groups.
    pub groups: BTreeSet<String>,
    /// Host operation name, for audit.
    pub operation: String,
    /// Matching scope.
    pub scope: MatchingScope,
    /// When false, a deny anywhere below the resource defeats a
    /// `SelfOrDescendants` check.
    pub ignore_descendant_deny: bool,
    /// Client address, for audit.
    pub client_address: Option<String>,
    /// Command description, for audit.
    pub request_data: Option<String>,
}

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    /// Whether the action is allowed on the resource.
    pub allowed: bool,
    /// Policy that decided, if any.
    pub policy_id: Option<u64>,
    /// Evaluator-supplied explanation, if any.
    pub reason: Option<String>,
    /// Audit record for this evaluation; absent when auditing is off for
    /// the matching policy.
    pub audit_event: Option<AuditEvent>,
}

impl AccessDecision {
    /// An unaudited grant.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            policy_id: None,
            reason: None,
            audit_event: None,
        }
    }

    /// An unaudited denial.
    pub fn deny() -> Self {
        Self {
            allowed: false,
            ..Self::allow()
        }
    }

    /// Attach the deciding policy.
    pub fn with_policy(mut self, policy_id: u64) -> Self {
        self.policy_id = Some(policy_id);
        self
    }

    /// Attach an explanation.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach an audit record built from the request.
    pub fn audited(mut self, request: &AccessRequest) -> Self {
        self.audit_event = Some(
            AuditEvent::new(
                request.user.clone(),
                request.operation.clone(),
                request.action,
                &request.resource,
                self.allowed,
            )
            .with_policy(self.policy_id)
            .with_client_address(request.client_address.clone())
            .with_request_data(request.request_data.clone()),
        );
        self
    }
}

/// External policy evaluator.
///
/// Implementations must be safe to call concurrently from many request
/// threads. Returning `Err` signals an infrastructure failure; it is never
/// interpreted as either a grant or a denial by the aggregation code.
pub trait PolicyEvaluator: Send + Sync {
    /// Evaluate one request.
    fn evaluate(&self, request: &AccessRequest) -> AuthzResult<AccessDecision>;
}
