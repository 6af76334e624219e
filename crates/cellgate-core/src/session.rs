//! Reusable authorization session.
//!
//! A session fixes who is asking and for what operation, then is re-pointed
//! at one resource after another (table, family, column) and asked to
//! authorize each. The audit event of the latest call is parked in the
//! session's [`AuditHandler`] until the caller takes it.

use crate::audit::{AuditEvent, AuditHandler};
use crate::error::AuthzResult;
use crate::evaluator::{AccessRequest, PolicyEvaluator};
use crate::identity::Identity;
use crate::request::{Action, MatchingScope, ResourcePath};
use std::sync::Arc;

/// Per-request authorization session over a [`PolicyEvaluator`].
pub struct AuthorizationSession {
    evaluator: Arc<dyn PolicyEvaluator>,
    identity: Identity,
    operation: String,
    action: Action,
    other_info: Option<String>,
    resource: ResourcePath,
    scope: MatchingScope,
    ignore_descendant_deny: bool,
    audit: AuditHandler,
    evaluations: usize,
}

impl AuthorizationSession {
    /// Create a session for `identity` performing `operation` with `action`.
    pub fn new(
        evaluator: Arc<dyn PolicyEvaluator>,
        identity: Identity,
        operation: impl Into<String>,
        action: Action,
    ) -> Self {
        Self {
            evaluator,
            identity,
            operation: operation.into(),
            action,
            other_info: None,
            resource: ResourcePath::global(),
            scope: MatchingScope::SelfOnly,
            ignore_descendant_deny: true,
            audit: AuditHandler::new(),
            evaluations: 0,
        }
    }

    /// Set the command description carried into audit events.
    pub fn other_info(&mut self, info: Option<String>) -> &mut Self {
        self.other_info = info;
        self
    }

    /// Change the action.
    pub fn action(&mut self, action: Action) -> &mut Self {
        self.action = action;
        self
    }

    /// Point the session at a whole resource path.
    pub fn resource(&mut self, resource: ResourcePath) -> &mut Self {
        self.resource = resource;
        self
    }

    /// Set the table, clearing any namespace.
    pub fn table(&mut self, table: Option<&str>) -> &mut Self {
        self.resource.namespace = None;
        self.resource.table = table.map(str::to_string);
        self
    }

    /// Set the column family.
    pub fn family(&mut self, family: Option<&str>) -> &mut Self {
        self.resource.family = family.map(str::to_string);
        self
    }

    /// Set the column.
    pub fn column(&mut self, column: Option<&str>) -> &mut Self {
        self.resource.column = column.map(str::to_string);
        self
    }

    /// Set the matching scope.
    pub fn scope(&mut self, scope: MatchingScope) -> &mut Self {
        self.scope = scope;
        self
    }

    /// Set whether descendant denials are ignored by descendant-scoped checks.
    pub fn ignore_descendant_deny(&mut self, ignore: bool) -> &mut Self {
        self.ignore_descendant_deny = ignore;
        self
    }

    /// Restore `SelfOnly` scope with descendant denials ignored.
    pub fn reset_scope(&mut self) -> &mut Self {
        self.scope = MatchingScope::SelfOnly;
        self.ignore_descendant_deny = true;
        self
    }

    /// Build the evaluator request for the current settings.
    pub fn build_request(&self) -> AccessRequest {
        AccessRequest {
            resource: self.resource.clone(),
            action: self.action,
            user: self.identity.short_name.clone(),
            groups: self.identity.groups.clone(),
            operation: self.operation.clone(),
            scope: self.scope,
            ignore_descendant_deny: self.ignore_descendant_deny,
            client_address: self.identity.remote_address.clone(),
            request_data: self.other_info.clone(),
        }
    }

    /// Evaluate the current resource and remember the outcome.
    ///
    /// Any event produced replaces the one still parked from a previous call.
    pub fn authorize(&mut self) -> AuthzResult<bool> {
        let request = self.build_request();
        self.evaluations += 1;

        let decision = self.evaluator.evaluate(&request)?;

        tracing::trace!(
            user = %request.user,
            resource = %request.resource,
            action = %request.action,
            scope = ?request.scope,
            allowed = decision.allowed,
            "policy evaluated"
        );

        self.audit.capture(decision.audit_event);
        Ok(decision.allowed)
    }

    /// Take the audit event of the latest call.
    pub fn take_event(&mut self) -> Option<AuditEvent> {
        self.audit.take_most_recent()
    }

    /// Human-readable denial reason for the current resource.
    pub fn denial_reason(&self) -> String {
        let mut reason = format!(
            "Insufficient permissions for user '{}',action: {}",
            self.identity.name, self.operation
        );
        if let Some(ns) = &self.resource.namespace {
            reason.push_str(&format!(", namespace:{}", ns));
        }
        match &self.resource.table {
            Some(table) => reason.push_str(&format!(", tableName:{}", table)),
            None => reason.push_str(&format!(", access:{}", self.action)),
        }
        if let Some(family) = &self.resource.family {
            reason.push_str(&format!(", family:{}", family));
        }
        if let Some(column) = &self.resource.column {
            reason.push_str(&format!(", column: {}", column));
        }
        reason
    }

    /// Number of evaluator calls made through this session.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }
}

impl std::fmt::Debug for AuthorizationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationSession")
            .field("user", &self.identity.short_name)
            .field("operation", &self.operation)
            .field("action", &self.action)
            .field("resource", &self.resource)
            .field("scope", &self.scope)
            .field("ignore_descendant_deny", &self.ignore_descendant_deny)
            .field("evaluations", &self.evaluations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::AccessDecision;

    /// Grants only requests on family `open`, auditing everything.
    struct FamilyEvaluator;

    impl PolicyEvaluator for FamilyEvaluator {
        fn evaluate(&self, request: &AccessRequest) -> AuthzResult<AccessDecision> {
            let allowed = request.resource.family.as_deref() == Some("open");
            let decision = if allowed {
                AccessDecision::allow()
            } else {
                AccessDecision::deny()
            };
            Ok(decision.audited(request))
        }
    }

    fn session() -> AuthorizationSession {
        AuthorizationSession::new(
            Arc::new(FamilyEvaluator),
            Identity::new("alice@EXAMPLE.COM"),
            "get",
            Action::Read,
        )
    }

    #[test]
    fn test_authorize_and_take_event() {
        let mut s = session();
        s.table(Some("t1")).family(Some("open"));

        assert!(s.authorize().unwrap());

        let event = s.take_event().unwrap();
        assert!(event.allowed);
        assert_eq!(event.resource, "t1/open");
        assert!(s.take_event().is_none());
    }

    #[test]
    fn test_request_reflects_scope() {
        let mut s = session();
        s.table(Some("t1"))
            .family(Some("cf"))
            .scope(MatchingScope::SelfOrDescendants)
            .ignore_descendant_deny(false);

        let request = s.build_request();
        assert_eq!(request.scope, MatchingScope::SelfOrDescendants);
        assert!(!request.ignore_descendant_deny);
        assert_eq!(request.user, "alice");

        s.reset_scope();
        let request = s.build_request();
        assert_eq!(request.scope, MatchingScope::SelfOnly);
        assert!(request.ignore_descendant_deny);
    }

    #[test]
    fn test_denial_reason() {
        let mut s = session();
        s.table(Some("t1")).family(Some("cf")).column(Some("q"));
        assert!(!s.authorize().unwrap());

        let reason = s.denial_reason();
        assert!(reason.contains("alice@EXAMPLE.COM"));
        assert!(reason.contains("tableName:t1"));
        assert!(reason.contains("family:cf"));
        assert!(reason.contains("column: q"));
    }

    #[test]
    fn test_counts_evaluations() {
        let mut s = session();
        s.table(Some("t1"));
        s.authorize().unwrap();
        s.family(Some("open"));
        s.authorize().unwrap();
        assert_eq!(s.evaluations(), 2);
    }
}
