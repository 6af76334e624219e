//! In-memory reference policy evaluator.
//!
//! Rules are matched in order against the table, family and column of a
//! request. Deny rules override allow rules. The engine is small on purpose;
//! it backs the CLI and the tests, not production deployments.

use crate::error::{AuthzError, AuthzResult};
use crate::evaluator::{AccessDecision, AccessRequest, PolicyEvaluator};
use crate::grant::{GrantRevokeRequest, PolicyAdmin};
use crate::request::{Action, MatchingScope, NAMESPACE_SEPARATOR, WILDCARD};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Name pattern: `*`, `prefix*`, `*suffix`, or an exact name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourcePattern(String);

impl ResourcePattern {
    /// Create a pattern.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    /// The match-everything pattern.
    pub fn wildcard() -> Self {
        Self(WILDCARD.to_string())
    }

    /// Whether this is `*`.
    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD
    }

    /// Check if `name` matches.
    pub fn matches(&self, name: &str) -> bool {
        let pattern = self.0.as_str();
        if pattern == WILDCARD {
            true
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            name.ends_with(suffix)
        } else {
            name == pattern
        }
    }

    /// Pattern text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Match one resource level. An unnamed level matches only `*`, unless
    /// descendants are being considered.
    fn matches_level(&self, value: Option<&str>, descendants: bool) -> bool {
        match value {
            Some(v) => self.matches(v),
            None => descendants || self.is_wildcard(),
        }
    }
}

impl Default for ResourcePattern {
    fn default() -> Self {
        Self::wildcard()
    }
}

impl From<&str> for ResourcePattern {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

fn default_true() -> bool {
    true
}

/// One allow or deny rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Rule ID, reported as the deciding policy.
    pub id: u64,
    /// Users the rule applies to; `*` means everyone.
    #[serde(default)]
    pub users: BTreeSet<String>,
    /// Groups the rule applies to.
    #[serde(default)]
    pub groups: BTreeSet<String>,
    /// Table pattern. Namespaces are matched as `ns:`.
    #[serde(default)]
    pub table: ResourcePattern,
    /// Family pattern.
    #[serde(default)]
    pub family: ResourcePattern,
    /// Column pattern.
    #[serde(default)]
    pub column: ResourcePattern,
    /// Actions covered.
    pub accesses: Vec<Action>,
    /// Deny instead of allow.
    #[serde(default)]
    pub deny: bool,
    /// Produce audit events for decisions made by this rule.
    #[serde(default = "default_true")]
    pub audit: bool,
    /// Principals may re-grant what this rule allows.
    #[serde(default)]
    pub delegate_admin: bool,
}

impl PolicyRule {
    /// Create an allow rule on `table/family/column` for `accesses`.
    pub fn allow(id: u64, table: &str, family: &str, column: &str, accesses: &[Action]) -> Self {
        Self {
            id,
            users: BTreeSet::new(),
            groups: BTreeSet::new(),
            table: table.into(),
            family: family.into(),
            column: column.into(),
            accesses: accesses.to_vec(),
            deny: false,
            audit: true,
            delegate_admin: false,
        }
    }

    /// Create a deny rule on `table/family/column` for `accesses`.
    pub fn deny(id: u64, table: &str, family: &str, column: &str, accesses: &[Action]) -> Self {
        Self {
            deny: true,
            ..Self::allow(id, table, family, column, accesses)
        }
    }

    /// Add a user.
    pub fn for_user(mut self, user: impl Into<String>) -> Self {
        self.users.insert(user.into());
        self
    }

    /// Add a group.
    pub fn for_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    /// Set whether decisions are audited.
    pub fn audited(mut self, audit: bool) -> Self {
        self.audit = audit;
        self
    }

    fn applies_to(&self, request: &AccessRequest) -> bool {
        self.users.contains(WILDCARD)
            || self.users.contains(&request.user)
            || request.groups.iter().any(|g| self.groups.contains(g))
    }

    fn matches_resource(&self, request: &AccessRequest, descendants: bool) -> bool {
        let table = match (&request.resource.namespace, &request.resource.table) {
            (Some(ns), _) => Some(format!("{}{}", ns, NAMESPACE_SEPARATOR)),
            (None, table) => table.clone(),
        };
        self.table.matches_level(table.as_deref(), descendants)
            && self
                .family
                .matches_level(request.resource.family.as_deref(), descendants)
            && self
                .column
                .matches_level(request.resource.column.as_deref(), descendants)
    }

    fn same_resource(&self, request: &GrantRevokeRequest) -> bool {
        self.table.as_str() == request.table
            && self.family.as_str() == request.family
            && self.column.as_str() == request.column
    }

    fn has_principals(&self) -> bool {
        !self.users.is_empty() || !self.groups.is_empty()
    }

    fn validate(&self) -> AuthzResult<()> {
        if self.accesses.is_empty() {
            return Err(AuthzError::Config(format!(
                "rule {} has no accesses",
                self.id
            )));
        }
        if !self.has_principals() {
            return Err(AuthzError::Config(format!(
                "rule {} names no users or groups",
                self.id
            )));
        }
        Ok(())
    }
}

/// On-disk form of an [`InMemoryPolicyEngine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyFile {
    /// Audit requests no rule decided.
    #[serde(default = "default_true")]
    pub audit_unmatched: bool,
    /// Rules, in evaluation order.
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

/// Rule-list policy evaluator.
#[derive(Debug)]
pub struct InMemoryPolicyEngine {
    rules: RwLock<Vec<PolicyRule>>,
    audit_unmatched: bool,
}

impl InMemoryPolicyEngine {
    /// Create an engine with no rules. Unmatched requests are audited.
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            audit_unmatched: true,
        }
    }

    /// Create an engine from rules.
    pub fn with_rules(rules: Vec<PolicyRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
            audit_unmatched: true,
        }
    }

    /// Set whether requests no rule decided are audited.
    pub fn with_audit_unmatched(mut self, audit: bool) -> Self {
        self.audit_unmatched = audit;
        self
    }

    /// Parse an engine from JSON.
    pub fn from_json(json: &str) -> AuthzResult<Self> {
        let file: PolicyFile = serde_json::from_str(json)?;

        let mut ids = BTreeSet::new();
        for rule in &file.rules {
            rule.validate()?;
            if !ids.insert(rule.id) {
                return Err(AuthzError::Config(format!("duplicate rule id {}", rule.id)));
            }
        }

        tracing::debug!(rules = file.rules.len(), "policy rules loaded");
        Ok(Self::with_rules(file.rules).with_audit_unmatched(file.audit_unmatched))
    }

    /// Load an engine from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> AuthzResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Whether requests no rule decided are audited.
    pub fn audit_unmatched(&self) -> bool {
        self.audit_unmatched
    }

    /// Append a rule.
    pub fn add_rule(&self, rule: PolicyRule) {
        self.rules.write().push(rule);
    }

    /// Snapshot of the rules.
    pub fn rules(&self) -> Vec<PolicyRule> {
        self.rules.read().clone()
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// True when there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    fn next_id(rules: &[PolicyRule]) -> u64 {
        rules.iter().map(|r| r.id).max().map_or(1, |id| id + 1)
    }

    /// Remove the principals of `request` from allow rules on the same
    /// resource, re-adding them with whatever accesses survive `removed`.
    fn carve_out(rules: &mut Vec<PolicyRule>, request: &GrantRevokeRequest, removed: &[Action]) {
        let mut survivors = Vec::new();

        for rule in rules.iter_mut().filter(|r| !r.deny && r.same_resource(request)) {
            let users: BTreeSet<String> = rule.users.intersection(&request.users).cloned().collect();
            let groups: BTreeSet<String> =
                rule.groups.intersection(&request.groups).cloned().collect();
            if users.is_empty() && groups.is_empty() {
                continue;
            }

            rule.users.retain(|u| !users.contains(u));
            rule.groups.retain(|g| !groups.contains(g));

            let remaining: Vec<Action> = rule
                .accesses
                .iter()
                .copied()
                .filter(|a| !removed.contains(a))
                .collect();
            if !remaining.is_empty() {
                survivors.push(PolicyRule {
                    users,
                    groups,
                    accesses: remaining,
                    delegate_admin: rule.delegate_admin && !request.delegate_admin,
                    ..rule.clone()
                });
            }
        }

        rules.retain(PolicyRule::has_principals);
        for mut rule in survivors {
            rule.id = Self::next_id(rules);
            rules.push(rule);
        }
    }
}

impl Default for InMemoryPolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEvaluator for InMemoryPolicyEngine {
    fn evaluate(&self, request: &AccessRequest) -> AuthzResult<AccessDecision> {
        let descendants = request.scope == MatchingScope::SelfOrDescendants;
        let deny_descendants = descendants && !request.ignore_descendant_deny;

        let rules = self.rules.read();
        let candidates: Vec<&PolicyRule> = rules
            .iter()
            .filter(|r| r.accesses.contains(&request.action) && r.applies_to(request))
            .collect();

        let deciding = candidates
            .iter()
            .find(|r| r.deny && r.matches_resource(request, deny_descendants))
            .or_else(|| {
                candidates
                    .iter()
                    .find(|r| !r.deny && r.matches_resource(request, descendants))
            });

        let (decision, audit) = match deciding {
            Some(rule) => {
                let decision = if rule.deny {
                    AccessDecision::deny().with_reason(format!("denied by rule {}", rule.id))
                } else {
                    AccessDecision::allow()
                };
                (decision.with_policy(rule.id), rule.audit)
            }
            None => (
                AccessDecision::deny().with_reason("no matching rule"),
                self.audit_unmatched,
            ),
        };

        Ok(if audit {
            decision.audited(request)
        } else {
            decision
        })
    }
}

impl PolicyAdmin for InMemoryPolicyEngine {
    fn grant_access(&self, request: &GrantRevokeRequest) -> AuthzResult<()> {
        if request.users.is_empty() && request.groups.is_empty() {
            return Err(AuthzError::InvalidGrant(
                "grant(): no principal to grant to".to_string(),
            ));
        }

        let mut rules = self.rules.write();
        if request.replace_existing_permissions {
            Self::carve_out(&mut rules, request, &Action::ALL);
        }

        let rule = PolicyRule {
            id: Self::next_id(&rules),
            users: request.users.clone(),
            groups: request.groups.clone(),
            table: request.table.as_str().into(),
            family: request.family.as_str().into(),
            column: request.column.as_str().into(),
            accesses: request.access_types.clone(),
            deny: false,
            audit: request.enable_audit,
            delegate_admin: request.delegate_admin,
        };
        tracing::info!(rule = rule.id, table = %request.table, "grant applied");
        rules.push(rule);
        Ok(())
    }

    fn revoke_access(&self, request: &GrantRevokeRequest) -> AuthzResult<()> {
        let mut rules = self.rules.write();
        let before = rules.len();
        Self::carve_out(&mut rules, request, &request.access_types);
        tracing::info!(table = %request.table, rules_before = before, rules_after = rules.len(), "revoke applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::{create_grant_data, create_revoke_data, PermissionScope, UserPermission};
    use crate::request::ResourcePath;

    fn request(resource: ResourcePath, scope: MatchingScope, ignore_descendant_deny: bool) -> AccessRequest {
        AccessRequest {
            resource,
            action: Action::Read,
            user: "alice".into(),
            groups: ["staff".to_string()].into_iter().collect(),
            operation: "get".into(),
            scope,
            ignore_descendant_deny,
            client_address: None,
            request_data: None,
        }
    }

    fn allowed(engine: &InMemoryPolicyEngine, resource: ResourcePath, scope: MatchingScope) -> bool {
        engine.evaluate(&request(resource, scope, false)).unwrap().allowed
    }

    #[test]
    fn test_pattern_matching() {
        assert!(ResourcePattern::new("*").matches("anything"));
        assert!(ResourcePattern::new("user_*").matches("user_profile"));
        assert!(ResourcePattern::new("*_log").matches("audit_log"));
        assert!(ResourcePattern::new("t1").matches("t1"));
        assert!(!ResourcePattern::new("t1").matches("t2"));
    }

    #[test]
    fn test_self_scope_requires_wildcard_below() {
        let engine = InMemoryPolicyEngine::with_rules(vec![
            PolicyRule::allow(1, "t1", "cf", "c1", &[Action::Read]).for_user("alice"),
        ]);
        let family = ResourcePath::table("t1").with_family("cf");

        assert!(!allowed(&engine, family.clone(), MatchingScope::SelfOnly));
        assert!(allowed(&engine, family.clone(), MatchingScope::SelfOrDescendants));
        assert!(allowed(&engine, family.with_column("c1"), MatchingScope::SelfOnly));
    }

    #[test]
    fn test_deny_overrides_and_descendant_deny() {
        let engine = InMemoryPolicyEngine::with_rules(vec![
            PolicyRule::allow(1, "t1", "cf", "*", &[Action::Read]).for_group("staff"),
            PolicyRule::deny(2, "t1", "cf", "secret", &[Action::Read]).for_user("alice"),
        ]);
        let family = ResourcePath::table("t1").with_family("cf");

        assert!(allowed(&engine, family.clone(), MatchingScope::SelfOnly));
        assert!(!allowed(&engine, family.clone(), MatchingScope::SelfOrDescendants));
        assert!(engine
            .evaluate(&request(family.clone(), MatchingScope::SelfOrDescendants, true))
            .unwrap()
            .allowed);

        let decision = engine
            .evaluate(&request(family.with_column("secret"), MatchingScope::SelfOnly, true))
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.policy_id, Some(2));
    }

    #[test]
    fn test_global_and_namespace_resources() {
        let engine = InMemoryPolicyEngine::with_rules(vec![
            PolicyRule::allow(1, "ns1:*", "*", "*", &[Action::Read]).for_user("alice"),
        ]);
        assert!(allowed(&engine, ResourcePath::namespace("ns1"), MatchingScope::SelfOnly));
        assert!(!allowed(&engine, ResourcePath::namespace("ns2"), MatchingScope::SelfOnly));
        assert!(!allowed(&engine, ResourcePath::global(), MatchingScope::SelfOnly));
    }

    #[test]
    fn test_audit_flags() {
        let engine = InMemoryPolicyEngine::with_rules(vec![
            PolicyRule::allow(1, "t1", "*", "*", &[Action::Read]).for_user("alice").audited(false),
        ])
        .with_audit_unmatched(false);

        let granted = engine
            .evaluate(&request(ResourcePath::table("t1"), MatchingScope::SelfOnly, true))
            .unwrap();
        assert!(granted.allowed);
        assert!(granted.audit_event.is_none());

        let unmatched = engine
            .evaluate(&request(ResourcePath::table("t2"), MatchingScope::SelfOnly, true))
            .unwrap();
        assert!(!unmatched.allowed);
        assert!(unmatched.audit_event.is_none());
    }

    #[test]
    fn test_from_json() {
        let engine = InMemoryPolicyEngine::from_json(
            r#"{
                "audit_unmatched": false,
                "rules": [
                    {"id": 1, "users": ["alice"], "table": "t1", "accesses": ["read", "write"]},
                    {"id": 2, "groups": ["ops"], "table": "t1", "family": "cf", "column": "c2",
                     "accesses": ["read"], "deny": true}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(engine.len(), 2);
        assert!(engine.rules()[1].deny);
        assert!(engine.rules()[0].family.is_wildcard());
    }

    #[test]
    fn test_from_json_rejects_bad_rules() {
        let err = InMemoryPolicyEngine::from_json(
            r#"{"rules": [{"id": 1, "users": ["a"], "accesses": ["read"]},
                          {"id": 1, "users": ["b"], "accesses": ["read"]}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate rule id"));

        let err = InMemoryPolicyEngine::from_json(r#"{"rules": [{"id": 1, "accesses": ["read"]}]}"#)
            .unwrap_err();
        assert!(matches!(err, AuthzError::Config(_)));
    }

    #[test]
    fn test_grant_then_revoke() {
        let engine = InMemoryPolicyEngine::new();
        let scope = PermissionScope::Table {
            table: "t1".into(),
            family: Some("cf".into()),
            qualifier: None,
        };
        let perm = UserPermission::new("alice", scope).with_actions("RW");
        let family = ResourcePath::table("t1").with_family("cf");

        engine.grant_access(&create_grant_data(&perm, None).unwrap()).unwrap();
        assert!(allowed(&engine, family.clone(), MatchingScope::SelfOnly));

        // granting again replaces rather than duplicates
        engine.grant_access(&create_grant_data(&perm, None).unwrap()).unwrap();
        assert_eq!(engine.len(), 1);

        engine.revoke_access(&create_revoke_data(&perm, None).unwrap()).unwrap();
        assert!(!allowed(&engine, family, MatchingScope::SelfOnly));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_revoke_keeps_other_principals() {
        let engine = InMemoryPolicyEngine::with_rules(vec![PolicyRule::allow(
            1,
            "t1",
            "*",
            "*",
            &[Action::Read],
        )
        .for_user("alice")
        .for_user("bob")]);

        let scope = PermissionScope::Table {
            table: "t1".into(),
            family: None,
            qualifier: None,
        };
        let perm = UserPermission::new("alice", scope);
        engine.revoke_access(&create_revoke_data(&perm, None).unwrap()).unwrap();

        let rules = engine.rules();
        assert_eq!(rules.len(), 1);
        assert!(rules[0].users.contains("bob"));
        assert!(!rules[0].users.contains("alice"));
    }
}
