//! Outer decision dispatch.
//!
//! [`Authorizer`] owns the evaluator, configuration, audit sink and scanner
//! registry, and turns aggregated results into the two public verdict
//! shapes: a filter-returning read check and an all-or-nothing permission
//! check. Single-resource and list-filtering checks used by administrative
//! operations live here too.

use crate::access::{self, ColumnFamilyAccessResult};
use crate::audit::{AuditEvent, AuditLogger, TracingAuditLogger};
use crate::bypass;
use crate::config::AuthzConfig;
use crate::error::{AuthzError, AuthzResult};
use crate::evaluator::PolicyEvaluator;
use crate::filter::AccessFilter;
use crate::grant::{create_grant_data, create_revoke_data, PolicyAdmin, UserPermission};
use crate::identity::Identity;
use crate::request::{AccessRequestShape, Action, ResourcePath};
use crate::scanner::ScannerOwners;
use crate::session::AuthorizationSession;
use std::sync::Arc;

/// Authorization entry point shared by all request threads.
pub struct Authorizer {
    evaluator: Arc<dyn PolicyEvaluator>,
    config: Arc<AuthzConfig>,
    audit: Arc<dyn AuditLogger>,
    scanners: ScannerOwners,
    admin: Option<Arc<dyn PolicyAdmin>>,
}

impl Authorizer {
    /// Create an authorizer that audits through `tracing`.
    pub fn new(evaluator: Arc<dyn PolicyEvaluator>, config: Arc<AuthzConfig>) -> Self {
        Self {
            evaluator,
            config,
            audit: Arc::new(TracingAuditLogger),
            scanners: ScannerOwners::new(),
            admin: None,
        }
    }

    /// Replace the audit sink.
    pub fn with_audit_logger(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    /// Set the store grant/revoke requests are applied to.
    pub fn with_policy_admin(mut self, admin: Arc<dyn PolicyAdmin>) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Configuration in effect.
    pub fn config(&self) -> &AuthzConfig {
        &self.config
    }

    /// Scanner ownership registry.
    pub fn scanners(&self) -> &ScannerOwners {
        &self.scanners
    }

    /// Aggregate a request without logging or enforcing anything.
    pub fn evaluate_access(&self, shape: &AccessRequestShape) -> AuthzResult<ColumnFamilyAccessResult> {
        access::evaluate_access(&self.evaluator, &self.config, shape)
    }

    /// Authorize a read.
    ///
    /// Returns `None` when everything is granted, or the filter to attach
    /// when only part of the request is.
    #[tracing::instrument(level = "debug", skip_all, fields(operation = %shape.operation))]
    pub fn authorize_for_read(&self, shape: &AccessRequestShape) -> AuthzResult<Option<AccessFilter>> {
        let result = self.evaluate_access(shape)?;

        if result.everything_accessible {
            self.audit.log_all(result.granted_events);
            self.audit.log_all(result.family_level_granted_events);
            tracing::debug!("all access allowed, no filter");
            return Ok(None);
        }

        if result.something_accessible {
            self.audit.log_all(result.granted_events);
            let filter = result.filter.map(|f| {
                f.with_deferred_audit(result.family_level_granted_events, Arc::clone(&self.audit))
            });
            tracing::debug!("partial access, filter returned");
            return Ok(filter);
        }

        Err(self.deny(result.denied_event, result.denial_reason))
    }

    /// Require that every family and column of a request is granted.
    #[tracing::instrument(level = "debug", skip_all, fields(operation = %shape.operation))]
    pub fn require_permission(&self, shape: &AccessRequestShape) -> AuthzResult<()> {
        let result = self.evaluate_access(shape)?;

        if result.everything_accessible {
            self.audit.log_all(result.granted_events);
            self.audit.log_all(result.family_level_granted_events);
            return Ok(());
        }

        Err(self.deny(result.denied_event, result.denial_reason))
    }

    fn deny(&self, event: Option<AuditEvent>, reason: Option<String>) -> AuthzError {
        if let Some(event) = event {
            self.audit.log(event);
        }
        let reason = reason.unwrap_or_else(|| "access denied".to_string());
        tracing::debug!(reason = %reason, "access denied");
        AuthzError::AccessDenied(reason)
    }

    /// Check one resource: a table, family, column, namespace or the global scope.
    #[tracing::instrument(level = "debug", skip(self, identity, resource, other_info), fields(resource = %resource))]
    pub fn authorize_resource(
        &self,
        identity: Option<&Identity>,
        operation: &str,
        action: Action,
        resource: ResourcePath,
        other_info: Option<&str>,
    ) -> AuthzResult<()> {
        let table = resource.table.clone().unwrap_or_default();
        if bypass::can_skip_table(&self.config, identity, operation, action, &table)? {
            return Ok(());
        }
        let identity = identity
            .ok_or_else(|| AuthzError::Malformed(format!("No user associated with request ({})", operation)))?;

        let mut session =
            AuthorizationSession::new(Arc::clone(&self.evaluator), identity.clone(), operation, action);
        session
            .other_info(other_info.map(str::to_string))
            .resource(resource);

        let granted = session.authorize()?;
        if let Some(event) = session.take_event() {
            self.audit.log(event);
        }

        if granted {
            Ok(())
        } else {
            Err(AuthzError::AccessDenied(session.denial_reason()))
        }
    }

    /// Check an administrative action on the global scope or a namespace.
    ///
    /// Evaluator failures are reported as denials.
    pub fn require_global_permission(
        &self,
        identity: Option<&Identity>,
        operation: &str,
        namespace: Option<&str>,
        action: Action,
    ) -> AuthzResult<()> {
        let resource = match namespace {
            Some(ns) => ResourcePath::namespace(ns),
            None => ResourcePath::global(),
        };

        match self.authorize_resource(identity, operation, action, resource, namespace) {
            Err(AuthzError::Evaluator(cause)) => {
                tracing::warn!(operation, cause = %cause, "policy evaluator unavailable, denying");
                Err(AuthzError::AccessDenied(format!(
                    "Unable to authorize '{}': policy evaluator unavailable",
                    operation
                )))
            }
            other => other,
        }
    }

    /// Keep only the tables `identity` may access with `action`.
    ///
    /// Each removed table's denial is audited; grants are logged together
    /// when anything is kept.
    pub fn filter_tables(
        &self,
        identity: &Identity,
        operation: &str,
        tables: Vec<String>,
        action: Action,
        other_info: Option<&str>,
    ) -> AuthzResult<Vec<String>> {
        self.filter_names(identity, operation, action, tables, other_info, |t| {
            ResourcePath::table(t)
        })
    }

    /// Keep only the namespaces `identity` may administer.
    pub fn filter_namespaces(
        &self,
        identity: &Identity,
        operation: &str,
        namespaces: Vec<String>,
    ) -> AuthzResult<Vec<String>> {
        self.filter_names(identity, operation, Action::Admin, namespaces, None, |ns| {
            ResourcePath::namespace(ns)
        })
    }

    fn filter_names(
        &self,
        identity: &Identity,
        operation: &str,
        action: Action,
        names: Vec<String>,
        other_info: Option<&str>,
        to_resource: impl Fn(&str) -> ResourcePath,
    ) -> AuthzResult<Vec<String>> {
        if names.is_empty() {
            return Ok(names);
        }

        let mut session =
            AuthorizationSession::new(Arc::clone(&self.evaluator), identity.clone(), operation, action);
        session.other_info(other_info.map(str::to_string));

        let mut kept = Vec::with_capacity(names.len());
        let mut granted_events = Vec::new();

        for name in names {
            session.resource(to_resource(&name));
            let granted = session.authorize()?;
            let event = session.take_event();
            if granted {
                granted_events.extend(event);
                kept.push(name);
            } else {
                tracing::debug!(name = %name, operation, "removed from listing");
                if let Some(event) = event {
                    self.audit.log(event);
                }
            }
        }

        if !kept.is_empty() {
            self.audit.log_all(granted_events);
        }
        Ok(kept)
    }

    /// Apply a grant. Returns `false` when policy updates are disabled.
    pub fn grant(&self, grantor: &Identity, permission: &UserPermission) -> AuthzResult<bool> {
        if !self.config.update_policies_on_grant_revoke {
            tracing::debug!(grantor = %grantor.short_name, "grant ignored, policy updates disabled");
            return Ok(false);
        }

        let request = create_grant_data(permission, Some(grantor)).inspect_err(|e| {
            tracing::warn!(error = %e, "grant rejected");
        })?;
        self.policy_admin()?.grant_access(&request).inspect_err(|e| {
            tracing::warn!(error = %e, table = %request.table, "grant failed");
        })?;
        Ok(true)
    }

    /// Apply a revoke. Returns `false` when policy updates are disabled.
    pub fn revoke(&self, grantor: &Identity, permission: &UserPermission) -> AuthzResult<bool> {
        if !self.config.update_policies_on_grant_revoke {
            tracing::debug!(grantor = %grantor.short_name, "revoke ignored, policy updates disabled");
            return Ok(false);
        }

        let request = create_revoke_data(permission, Some(grantor)).inspect_err(|e| {
            tracing::warn!(error = %e, "revoke rejected");
        })?;
        self.policy_admin()?.revoke_access(&request).inspect_err(|e| {
            tracing::warn!(error = %e, table = %request.table, "revoke failed");
        })?;
        Ok(true)
    }

    fn policy_admin(&self) -> AuthzResult<&Arc<dyn PolicyAdmin>> {
        self.admin
            .as_ref()
            .ok_or_else(|| AuthzError::Config("no policy admin configured".to_string()))
    }
}

impl Drop for Authorizer {
    fn drop(&mut self) {
        if let Err(e) = self.audit.flush() {
            tracing::warn!(error = %e, "audit flush failed");
        }
    }
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("config", &self.config)
            .field("scanners", &self.scanners.len())
            .field("policy_admin", &self.admin.is_some())
            .finish()
    }
}
