//! Decision aggregation over the families and columns of one request.
//!
//! [`evaluate_access`] turns an [`AccessRequestShape`] into a
//! [`ColumnFamilyAccessResult`] by asking the policy evaluator about the
//! table, each family and, where needed, each column. Access outcomes are
//! never reported as errors here; the caller decides what a partial or
//! empty grant means for its operation.

use crate::audit::AuditEvent;
use crate::bypass;
use crate::config::AuthzConfig;
use crate::error::{AuthzError, AuthzResult};
use crate::evaluator::PolicyEvaluator;
use crate::filter::{AccessFilter, FamilyAccess};
use crate::request::{AccessRequestShape, MatchingScope};
use crate::session::AuthorizationSession;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Aggregated outcome of one request.
#[derive(Debug, Default)]
pub struct ColumnFamilyAccessResult {
    /// Every requested family and column is granted.
    pub everything_accessible: bool,
    /// At least part of the request is granted.
    pub something_accessible: bool,
    /// Grant events for directly evaluated resources.
    pub granted_events: Vec<AuditEvent>,
    /// Grant events implied at family level.
    pub family_level_granted_events: Vec<AuditEvent>,
    /// The single retained denial event.
    pub denied_event: Option<AuditEvent>,
    /// Reason for the most recent denial.
    pub denial_reason: Option<String>,
    /// Settled status per requested family.
    pub families: BTreeMap<String, FamilyAccess>,
    /// Cell filter, present only for partial grants.
    pub filter: Option<AccessFilter>,
}

impl ColumnFamilyAccessResult {
    /// Everything granted without evaluation or audit.
    pub fn unconditional() -> Self {
        Self {
            everything_accessible: true,
            something_accessible: true,
            ..Self::default()
        }
    }

    /// Whether the request is only partly granted.
    pub fn is_partial(&self) -> bool {
        self.something_accessible && !self.everything_accessible
    }

    /// Family names grouped by status, for comparisons and reporting.
    pub fn partition(&self) -> BTreeMap<&'static str, BTreeSet<String>> {
        let mut partition: BTreeMap<&'static str, BTreeSet<String>> = BTreeMap::new();
        for (family, access) in &self.families {
            let key = match access {
                FamilyAccess::Denied => "denied",
                FamilyAccess::Allowed => "allowed",
                FamilyAccess::FullyAuthorized => "fully_authorized",
                FamilyAccess::Indeterminate => "indeterminate",
                FamilyAccess::Columns(_) => "columns",
            };
            partition.entry(key).or_default().insert(family.clone());
        }
        partition
    }
}

impl std::fmt::Display for ColumnFamilyAccessResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "everything={} something={} granted_events={} family_level_events={} denied_event={} reason={}",
            self.everything_accessible,
            self.something_accessible,
            self.granted_events.len(),
            self.family_level_granted_events.len(),
            self.denied_event.is_some(),
            self.denial_reason.as_deref().unwrap_or("-"),
        )
    }
}

/// Accumulates evidence while the families of one request are evaluated.
struct Aggregation {
    everything: bool,
    something: bool,
    granted_events: Vec<AuditEvent>,
    family_level_events: Vec<AuditEvent>,
    denied_event: Option<AuditEvent>,
    denial_reason: Option<String>,
    families: BTreeMap<String, FamilyAccess>,
}

impl Aggregation {
    fn new() -> Self {
        Self {
            everything: true,
            something: false,
            granted_events: Vec::new(),
            family_level_events: Vec::new(),
            denied_event: None,
            denial_reason: None,
            families: BTreeMap::new(),
        }
    }

    fn candidate_denial(&mut self, event: Option<AuditEvent>) {
        if event.is_some() {
            self.denied_event = event;
        }
    }

    fn family_level_grant(&mut self, event: Option<AuditEvent>) {
        self.family_level_events.extend(event);
    }
}

/// Evaluate every family and column of `shape`.
///
/// Errors are limited to malformed requests and evaluator failures.
#[tracing::instrument(
    level = "debug",
    skip_all,
    fields(operation = %shape.operation, action = %shape.action)
)]
pub fn evaluate_access(
    evaluator: &Arc<dyn PolicyEvaluator>,
    config: &AuthzConfig,
    shape: &AccessRequestShape,
) -> AuthzResult<ColumnFamilyAccessResult> {
    let operation = shape.operation.as_str();
    let action = shape.action;

    tracing::debug!(
        column_auth_optimization = config.column_auth_optimization_enabled(),
        families = %shape.families.as_ref().map(|f| f.to_string()).unwrap_or_default(),
        "evaluating access"
    );

    let table = match shape.region.table_name() {
        Some(table) => table,
        None => {
            tracing::debug!("no table on request, denied without audit");
            return Err(AuthzError::Malformed(format!(
                "Insufficient permissions for operation '{}',action: {}",
                operation, action
            )));
        }
    };

    let identity = shape.identity.as_ref();
    if bypass::can_skip_table(config, identity, operation, action, &table)?
        || bypass::can_skip_region(evaluator, identity, operation, action, &shape.region)?
    {
        tracing::debug!(table = %table, "known access pattern, allowed without audit");
        return Ok(ColumnFamilyAccessResult::unconditional());
    }
    // can_skip_table has already rejected a missing identity
    let identity = identity.ok_or_else(|| AuthzError::Malformed("no user".to_string()))?;

    let mut session =
        AuthorizationSession::new(Arc::clone(evaluator), identity.clone(), operation, action);
    session
        .other_info(shape.other_info.clone())
        .table(Some(&table));

    let families = match shape.families.as_ref().filter(|f| !f.is_empty()) {
        Some(families) => families,
        None => {
            let granted = session.authorize()?;
            let event = session.take_event();
            tracing::debug!(table = %table, granted, "table level access evaluated");

            let result = if granted {
                ColumnFamilyAccessResult {
                    everything_accessible: true,
                    something_accessible: true,
                    granted_events: event.into_iter().collect(),
                    ..ColumnFamilyAccessResult::default()
                }
            } else {
                ColumnFamilyAccessResult {
                    denied_event: event,
                    denial_reason: Some(format!(
                        "Insufficient permissions for user '{}',action: {}, tableName:{}, no column families found.",
                        identity.name, operation, table
                    )),
                    ..ColumnFamilyAccessResult::default()
                }
            };
            return Ok(result);
        }
    };

    let mut agg = Aggregation::new();

    for (family, columns) in families.iter() {
        session.family(Some(family)).column(None).reset_scope();

        if columns.is_empty() {
            let family_granted = session.authorize()?;
            let event = session.take_event();
            if family_granted {
                agg.family_level_grant(event);
            } else {
                agg.candidate_denial(event);
            }

            session
                .scope(MatchingScope::SelfOrDescendants)
                .ignore_descendant_deny(false);
            let reachable = session.authorize()?;
            let event = session.take_event();
            session.reset_scope();

            tracing::debug!(family, family_granted, reachable, "family level access evaluated");

            let family_reason = || {
                format!(
                    "Insufficient permissions for user '{}',action: {}, tableName:{}, family:{}.",
                    identity.name, operation, table, family
                )
            };
            let access = match (reachable, family_granted) {
                (true, true) => {
                    agg.something = true;
                    agg.family_level_grant(event);
                    FamilyAccess::Allowed
                }
                (true, false) | (false, true) => {
                    agg.everything = false;
                    agg.something = true;
                    agg.denial_reason = Some(family_reason());
                    agg.candidate_denial(event);
                    FamilyAccess::Indeterminate
                }
                (false, false) => {
                    agg.everything = false;
                    agg.denial_reason = Some(family_reason());
                    FamilyAccess::Denied
                }
            };
            agg.families.insert(family.to_string(), access);
            continue;
        }

        if config.column_auth_optimization_enabled() && session.authorize()? {
            session
                .scope(MatchingScope::SelfOrDescendants)
                .ignore_descendant_deny(false);
            let fully_authorized = session.authorize()?;
            let event = session.take_event();
            session.reset_scope();

            tracing::debug!(family, fully_authorized, "column auth optimization check");

            if fully_authorized {
                agg.something = true;
                agg.family_level_grant(event);
                agg.families
                    .insert(family.to_string(), FamilyAccess::FullyAuthorized);
                continue;
            }
        }
        let _ = session.take_event();

        // A denied column clears whatever earlier columns of this family granted.
        let mut family_something = false;
        let mut accessible = BTreeSet::new();

        for column in columns {
            session.column(Some(column.as_str()));
            let granted = session.authorize()?;
            let event = session.take_event();

            tracing::debug!(family, column = %column, granted, "column level access evaluated");

            if granted {
                family_something = true;
                accessible.insert(column.clone());
                agg.granted_events.extend(event);
            } else {
                family_something = false;
                agg.everything = false;
                agg.denial_reason = Some(format!(
                    "Insufficient permissions for user '{}',action: {}, tableName:{}, family:{}, column: {}",
                    identity.name, operation, table, family, column
                ));
                agg.candidate_denial(event);
            }
        }

        agg.something |= family_something;
        agg.families
            .insert(family.to_string(), FamilyAccess::Columns(accessible));
    }

    let filter = if agg.something && !agg.everything {
        Some(AccessFilter::new(agg.families.clone(), session))
    } else {
        None
    };

    let result = ColumnFamilyAccessResult {
        everything_accessible: agg.everything,
        something_accessible: agg.something,
        granted_events: agg.granted_events,
        family_level_granted_events: agg.family_level_events,
        denied_event: agg.denied_event,
        denial_reason: agg.denial_reason,
        families: agg.families,
        filter,
    };

    tracing::debug!(table = %table, verdict = %result, "access evaluated");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{AccessDecision, AccessRequest};
    use crate::identity::Identity;
    use crate::request::{Action, FamilyMap, RegionContext};
    use parking_lot::Mutex;

    /// Decides by a list of `(table/family/column, scope)` grants.
    struct Table {
        grants: Vec<(&'static str, MatchingScope)>,
        seen: Mutex<Vec<AccessRequest>>,
    }

    impl Table {
        fn new(grants: Vec<(&'static str, MatchingScope)>) -> Arc<Self> {
            Arc::new(Self {
                grants,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl PolicyEvaluator for Table {
        fn evaluate(&self, request: &AccessRequest) -> AuthzResult<AccessDecision> {
            self.seen.lock().push(request.clone());
            let key = request.resource.to_string();
            let allowed = self
                .grants
                .iter()
                .any(|(r, scope)| *r == key && *scope == request.scope);
            let decision = if allowed {
                AccessDecision::allow()
            } else {
                AccessDecision::deny()
            };
            Ok(decision.audited(request))
        }
    }

    fn shape(families: Option<FamilyMap>) -> AccessRequestShape {
        let shape = AccessRequestShape::new(
            Some(Identity::new("alice")),
            "get",
            Action::Read,
            RegionContext::for_table("t1"),
        );
        match families {
            Some(f) => shape.with_families(f),
            None => shape,
        }
    }

    fn run(
        evaluator: Arc<Table>,
        config: &AuthzConfig,
        shape: &AccessRequestShape,
    ) -> ColumnFamilyAccessResult {
        let evaluator: Arc<dyn PolicyEvaluator> = evaluator;
        evaluate_access(&evaluator, config, shape).unwrap()
    }

    use MatchingScope::{SelfOnly, SelfOrDescendants};

    #[test]
    fn test_table_level_grant() {
        let result = run(
            Table::new(vec![("t1", SelfOnly)]),
            &AuthzConfig::new(),
            &shape(None),
        );
        assert!(result.everything_accessible);
        assert_eq!(result.granted_events.len(), 1);
        assert!(result.filter.is_none());
    }

    #[test]
    fn test_table_level_deny() {
        let result = run(Table::new(vec![]), &AuthzConfig::new(), &shape(Some(FamilyMap::new())));
        assert!(!result.everything_accessible);
        assert!(!result.something_accessible);
        assert!(result.filter.is_none());
        assert!(result.denied_event.is_some());
        assert!(result.denial_reason.unwrap().contains("no column families found"));
    }

    #[test]
    fn test_missing_table_is_malformed() {
        let evaluator: Arc<dyn PolicyEvaluator> = Table::new(vec![]);
        let mut s = shape(None);
        s.region = RegionContext::default();
        let err = evaluate_access(&evaluator, &AuthzConfig::new(), &s).unwrap_err();
        assert!(matches!(err, AuthzError::Malformed(_)));
    }

    #[test]
    fn test_family_classification() {
        let evaluator = Table::new(vec![
            ("t1/a", SelfOnly),
            ("t1/a", SelfOrDescendants),
            ("t1/b", SelfOrDescendants),
            ("t1/c", SelfOnly),
        ]);
        let families = FamilyMap::from_families(["a", "b", "c", "d"]);
        let result = run(evaluator, &AuthzConfig::new(), &shape(Some(families)));

        assert!(!result.everything_accessible);
        assert!(result.something_accessible);
        assert_eq!(result.families["a"], FamilyAccess::Allowed);
        assert_eq!(result.families["b"], FamilyAccess::Indeterminate);
        assert_eq!(result.families["c"], FamilyAccess::Indeterminate);
        assert_eq!(result.families["d"], FamilyAccess::Denied);
        assert!(result.denial_reason.unwrap().ends_with("family:d."));
        // a: self + descendants, c: self
        assert_eq!(result.family_level_granted_events.len(), 3);
        assert!(result.filter.is_some());
    }

    #[test]
    fn test_indeterminate_family_carries_reason() {
        let evaluator = Table::new(vec![("t1/cf", SelfOnly)]);
        let families = FamilyMap::from_families(["cf"]);
        let result = run(evaluator, &AuthzConfig::new(), &shape(Some(families)));

        assert_eq!(result.families["cf"], FamilyAccess::Indeterminate);
        assert!(result.is_partial());
        assert!(result.denial_reason.unwrap().ends_with("tableName:t1, family:cf."));
    }

    #[test]
    fn test_column_denial_resets_family_something() {
        let evaluator = Table::new(vec![("t1/cf/c1", SelfOnly)]);
        let families = FamilyMap::new().with_columns("cf", ["c1", "c2"]);
        let result = run(evaluator, &AuthzConfig::new(), &shape(Some(families)));

        assert!(!result.something_accessible);
        assert!(result.filter.is_none());
        assert_eq!(result.granted_events.len(), 1);
        assert!(result.denial_reason.unwrap().ends_with("column: c2"));
    }

    #[test]
    fn test_column_denial_before_grant() {
        let evaluator = Table::new(vec![("t1/cf/c2", SelfOnly)]);
        let families = FamilyMap::new().with_columns("cf", ["c1", "c2"]);
        let result = run(evaluator, &AuthzConfig::new(), &shape(Some(families)));

        assert!(result.is_partial());
        let expected: BTreeSet<String> = ["c2".to_string()].into_iter().collect();
        assert_eq!(result.families["cf"], FamilyAccess::Columns(expected));
    }

    #[test]
    fn test_last_denial_event_wins() {
        let families = FamilyMap::new().with_columns("cf", ["c1", "c2"]);
        let result = run(Table::new(vec![]), &AuthzConfig::new(), &shape(Some(families)));
        assert_eq!(result.denied_event.unwrap().resource, "t1/cf/c2");
    }

    #[test]
    fn test_column_auth_optimization() {
        let grants = vec![("t1/cf", SelfOnly), ("t1/cf", SelfOrDescendants)];
        let families = FamilyMap::new().with_columns("cf", ["c1", "c2"]);
        let config = AuthzConfig::new().with_column_auth_optimization(true);

        let evaluator = Table::new(grants.clone());
        let result = run(evaluator.clone(), &config, &shape(Some(families.clone())));

        assert!(result.everything_accessible);
        assert_eq!(result.families["cf"], FamilyAccess::FullyAuthorized);
        assert_eq!(evaluator.seen.lock().len(), 2);
        assert_eq!(result.family_level_granted_events.len(), 1);

        // without the optimization each column is asked about and denied
        let evaluator = Table::new(grants);
        let result = run(evaluator.clone(), &AuthzConfig::new(), &shape(Some(families)));
        assert!(!result.something_accessible);
        assert_eq!(evaluator.seen.lock().len(), 2);
        assert!(evaluator
            .seen
            .lock()
            .iter()
            .all(|r| r.resource.column.is_some()));
    }

    #[test]
    fn test_descendant_check_honors_descendant_deny() {
        let evaluator = Table::new(vec![("t1/cf", SelfOnly), ("t1/cf", SelfOrDescendants)]);
        run(
            evaluator.clone(),
            &AuthzConfig::new(),
            &shape(Some(FamilyMap::from_families(["cf"]))),
        );

        let seen = evaluator.seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].scope, SelfOnly);
        assert!(seen[0].ignore_descendant_deny);
        assert_eq!(seen[1].scope, SelfOrDescendants);
        assert!(!seen[1].ignore_descendant_deny);
    }
}
