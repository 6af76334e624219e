//! Translation of grant/revoke commands into policy-store mutations.

use crate::error::{AuthzError, AuthzResult};
use crate::identity::Identity;
use crate::request::{Action, NAMESPACE_SEPARATOR, WILDCARD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Principal prefix marking a group rather than a user.
pub const GROUP_PREFIX: &str = "@";

/// What a permission applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PermissionScope {
    /// Every table.
    Global,
    /// Every table in a namespace.
    Namespace {
        /// Namespace name.
        namespace: String,
    },
    /// A table, optionally narrowed to a family and qualifier.
    Table {
        /// Table name.
        table: String,
        /// Column family.
        #[serde(default)]
        family: Option<String>,
        /// Column qualifier.
        #[serde(default)]
        qualifier: Option<String>,
    },
}

/// A grant or revoke command as received from an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPermission {
    /// User name, or `@group`.
    pub user: String,
    /// Permission codes (`R`, `W`, `C`, `A`, `X`).
    #[serde(default)]
    pub actions: Vec<char>,
    /// Target of the permission; absent when the command carried none.
    #[serde(default)]
    pub scope: Option<PermissionScope>,
}

impl UserPermission {
    /// Create a permission for `user` on `scope`.
    pub fn new(user: impl Into<String>, scope: PermissionScope) -> Self {
        Self {
            user: user.into(),
            actions: Vec::new(),
            scope: Some(scope),
        }
    }

    /// Set the permission codes.
    pub fn with_actions(mut self, codes: &str) -> Self {
        self.actions = codes.chars().collect();
        self
    }
}

/// Policy-store mutation derived from a [`UserPermission`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRevokeRequest {
    /// Short name of the administrator issuing the command.
    pub grantor: Option<String>,
    /// Groups of the administrator.
    pub grantor_groups: BTreeSet<String>,
    /// Users the change applies to.
    pub users: BTreeSet<String>,
    /// Groups the change applies to.
    pub groups: BTreeSet<String>,
    /// Access types granted or revoked.
    pub access_types: Vec<Action>,
    /// Whether the delegate-admin privilege is granted or revoked.
    pub delegate_admin: bool,
    /// Whether resulting policies are audited.
    pub enable_audit: bool,
    /// Whether existing permissions of the principals are replaced.
    pub replace_existing_permissions: bool,
    /// Table, `ns:table`, or `*`.
    pub table: String,
    /// Column family or `*`.
    pub family: String,
    /// Column qualifier or `*`.
    pub column: String,
    /// Client address of the administrator.
    pub client_address: Option<String>,
    /// Description of the originating command.
    pub request_data: String,
}

impl GrantRevokeRequest {
    fn add_access(&mut self, action: Action) {
        if !self.access_types.contains(&action) {
            self.access_types.push(action);
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn build_request(
    command: &str,
    not_specified: &str,
    permission: &UserPermission,
    grantor: Option<&Identity>,
) -> AuthzResult<GrantRevokeRequest> {
    let scope = permission.scope.as_ref().ok_or_else(|| {
        AuthzError::InvalidGrant(format!("{}(): invalid data - permission is null", command))
    })?;

    if permission.user.is_empty() {
        return Err(AuthzError::InvalidGrant(format!(
            "{}(): invalid data - username empty",
            command
        )));
    }

    let (namespace, table, family, qualifier) = match scope {
        PermissionScope::Global => (None, Some(WILDCARD), Some(WILDCARD), Some(WILDCARD)),
        PermissionScope::Namespace { namespace } => (non_empty(Some(namespace.as_str())), None, None, None),
        PermissionScope::Table {
            table,
            family,
            qualifier,
        } => (
            None,
            non_empty(Some(table.as_str())),
            non_empty(family.as_deref()),
            non_empty(qualifier.as_deref()),
        ),
    };

    if namespace.is_none() && table.is_none() && family.is_none() && qualifier.is_none() {
        return Err(AuthzError::InvalidGrant(format!(
            "{}(): {} not specified",
            command, not_specified
        )));
    }

    let mut table = table.unwrap_or(WILDCARD).to_string();
    if let Some(ns) = namespace {
        table = format!("{}{}{}", ns, NAMESPACE_SEPARATOR, table);
    }

    let mut request = GrantRevokeRequest {
        grantor: grantor.map(|g| g.short_name.clone()),
        grantor_groups: grantor.map(|g| g.groups.clone()).unwrap_or_default(),
        users: BTreeSet::new(),
        groups: BTreeSet::new(),
        access_types: Vec::new(),
        delegate_admin: false,
        enable_audit: true,
        replace_existing_permissions: true,
        table,
        family: family.unwrap_or(WILDCARD).to_string(),
        column: qualifier.unwrap_or(WILDCARD).to_string(),
        client_address: grantor.and_then(|g| g.remote_address.clone()),
        request_data: serde_json::to_string(permission)?,
    };

    match permission.user.strip_prefix(GROUP_PREFIX) {
        Some(group) => request.groups.insert(group.to_string()),
        None => request.users.insert(permission.user.clone()),
    };

    Ok(request)
}

/// Translate a grant command.
pub fn create_grant_data(
    permission: &UserPermission,
    grantor: Option<&Identity>,
) -> AuthzResult<GrantRevokeRequest> {
    if permission.scope.is_some() && !permission.user.is_empty() && permission.actions.is_empty() {
        return Err(AuthzError::InvalidGrant(
            "grant(): invalid data - no action specified".to_string(),
        ));
    }

    let mut request = build_request(
        "grant",
        "namespace/table/columnFamily/columnQualifier",
        permission,
        grantor,
    )?;

    for &code in &permission.actions {
        match Action::from_code(code) {
            Some(action) => {
                request.add_access(action);
                if action == Action::Admin {
                    request.delegate_admin = true;
                }
            }
            None => {
                tracing::warn!(action = %code, user = %permission.user, "grant(): ignoring unknown action");
            }
        }
    }

    Ok(request)
}

/// Translate a revoke command. Every access type and delegate-admin are removed.
pub fn create_revoke_data(
    permission: &UserPermission,
    grantor: Option<&Identity>,
) -> AuthzResult<GrantRevokeRequest> {
    let mut request = build_request(
        "revoke",
        "table/columnFamily/columnQualifier",
        permission,
        grantor,
    )?;

    request.delegate_admin = true;
    for action in Action::ALL {
        request.add_access(action);
    }
    Ok(request)
}

/// Policy store able to apply grant/revoke requests.
pub trait PolicyAdmin: Send + Sync {
    /// Add the requested accesses.
    fn grant_access(&self, request: &GrantRevokeRequest) -> AuthzResult<()>;

    /// Remove the requested accesses.
    fn revoke_access(&self, request: &GrantRevokeRequest) -> AuthzResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(table: &str, family: Option<&str>, qualifier: Option<&str>) -> PermissionScope {
        PermissionScope::Table {
            table: table.to_string(),
            family: family.map(str::to_string),
            qualifier: qualifier.map(str::to_string),
        }
    }

    #[test]
    fn test_grant_table_family() {
        let perm = UserPermission::new("bob", table("t1", Some("cf"), None)).with_actions("RWA");
        let admin = Identity::new("admin").with_group("ops");
        let req = create_grant_data(&perm, Some(&admin)).unwrap();

        assert_eq!(req.table, "t1");
        assert_eq!(req.family, "cf");
        assert_eq!(req.column, "*");
        assert_eq!(req.access_types, vec![Action::Read, Action::Write, Action::Admin]);
        assert!(req.delegate_admin);
        assert!(req.users.contains("bob"));
        assert_eq!(req.grantor.as_deref(), Some("admin"));
        assert!(req.grantor_groups.contains("ops"));
    }

    #[test]
    fn test_grant_namespace_group() {
        let scope = PermissionScope::Namespace {
            namespace: "ns1".to_string(),
        };
        let perm = UserPermission::new("@analysts", scope).with_actions("R");
        let req = create_grant_data(&perm, None).unwrap();

        assert_eq!(req.table, "ns1:*");
        assert!(req.groups.contains("analysts"));
        assert!(req.users.is_empty());
        assert!(!req.delegate_admin);
    }

    #[test]
    fn test_grant_global_and_unknown_code() {
        let perm = UserPermission::new("bob", PermissionScope::Global).with_actions("RZ");
        let req = create_grant_data(&perm, None).unwrap();
        assert_eq!(req.table, "*");
        assert_eq!(req.access_types, vec![Action::Read]);
    }

    #[test]
    fn test_grant_validation() {
        let mut perm = UserPermission::new("bob", table("t1", None, None));
        let err = create_grant_data(&perm, None).unwrap_err();
        assert_eq!(err.to_string(), "grant(): invalid data - no action specified");

        perm.actions = vec!['R'];
        perm.user.clear();
        let err = create_grant_data(&perm, None).unwrap_err();
        assert_eq!(err.to_string(), "grant(): invalid data - username empty");

        let perm = UserPermission::new("bob", table("", None, None)).with_actions("R");
        let err = create_grant_data(&perm, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "grant(): namespace/table/columnFamily/columnQualifier not specified"
        );

        let mut perm = UserPermission::new("bob", PermissionScope::Global).with_actions("R");
        perm.scope = None;
        let err = create_grant_data(&perm, None).unwrap_err();
        assert_eq!(err.to_string(), "grant(): invalid data - permission is null");
    }

    #[test]
    fn test_revoke_removes_everything() {
        let perm = UserPermission::new("bob", table("t1", Some("cf"), Some("q")));
        let req = create_revoke_data(&perm, None).unwrap();

        assert_eq!(req.access_types, Action::ALL.to_vec());
        assert!(req.delegate_admin);
        assert_eq!(req.column, "q");

        let perm = UserPermission::new("bob", table("", None, None));
        let err = create_revoke_data(&perm, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "revoke(): table/columnFamily/columnQualifier not specified"
        );
    }
}
