//! Authorizer configuration.
//!
//! Built once at startup and shared by reference. The only field that may
//! change afterwards is the column-auth optimization flag, which is an
//! atomic so an administrative toggle becomes visible to other threads
//! eventually without locking.

use crate::error::{AuthzError, AuthzResult};
use crate::identity::Identity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Tables whose reads are never checked or audited.
pub const DEFAULT_SPECIAL_TABLES: [&str; 5] = [
    "hbase:meta",
    "-ROOT-",
    ".META.",
    "hbase:acl",
    "hbase:namespace",
];

/// Authorizer configuration.
#[derive(Debug)]
pub struct AuthzConfig {
    column_auth_optimization: AtomicBool,
    /// Apply grant/revoke requests to the policy store.
    pub update_policies_on_grant_revoke: bool,
    /// Check EXECUTE on endpoint invocations.
    pub exec_permission_checks: bool,
    /// System/metadata tables.
    pub special_tables: Vec<String>,
    /// Users allowed to open system regions.
    pub super_users: BTreeSet<String>,
    /// Groups whose members count as super users.
    pub super_groups: BTreeSet<String>,
    /// Short name of the service's own user.
    pub system_user: Option<String>,
}

impl AuthzConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            column_auth_optimization: AtomicBool::new(false),
            update_policies_on_grant_revoke: true,
            exec_permission_checks: false,
            special_tables: DEFAULT_SPECIAL_TABLES.iter().map(|s| s.to_string()).collect(),
            super_users: BTreeSet::new(),
            super_groups: BTreeSet::new(),
            system_user: None,
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> AuthzResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Parse configuration from JSON. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> AuthzResult<Self> {
        let file: ConfigFile = serde_json::from_str(json)?;
        file.validate()?;
        Ok(file.into())
    }

    /// Enable or disable the column-auth optimization at construction.
    pub fn with_column_auth_optimization(self, enabled: bool) -> Self {
        self.column_auth_optimization.store(enabled, Ordering::Relaxed);
        self
    }

    /// Enable or disable policy updates on grant/revoke.
    pub fn with_update_policies_on_grant_revoke(mut self, enabled: bool) -> Self {
        self.update_policies_on_grant_revoke = enabled;
        self
    }

    /// Enable or disable EXECUTE checks on endpoint invocations.
    pub fn with_exec_permission_checks(mut self, enabled: bool) -> Self {
        self.exec_permission_checks = enabled;
        self
    }

    /// Replace the special table list.
    pub fn with_special_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.special_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Add a super user.
    pub fn with_super_user(mut self, user: impl Into<String>) -> Self {
        self.super_users.insert(user.into());
        self
    }

    /// Add a super group.
    pub fn with_super_group(mut self, group: impl Into<String>) -> Self {
        self.super_groups.insert(group.into());
        self
    }

    /// Set the system user.
    pub fn with_system_user(mut self, user: impl Into<String>) -> Self {
        self.system_user = Some(user.into());
        self
    }

    /// Whether families with explicit columns are first checked as a whole.
    pub fn column_auth_optimization_enabled(&self) -> bool {
        self.column_auth_optimization.load(Ordering::Relaxed)
    }

    /// Administrative toggle for the column-auth optimization.
    pub fn set_column_auth_optimization(&self, enabled: bool) {
        self.column_auth_optimization.store(enabled, Ordering::Relaxed);
        tracing::info!(enabled, "column auth optimization toggled");
    }

    /// Check whether `table` is a system/metadata table.
    pub fn is_special_table(&self, table: &str) -> bool {
        self.special_tables.iter().any(|t| t == table)
    }

    /// Check whether `identity` is a super user or in a super group.
    pub fn is_super_user(&self, identity: &Identity) -> bool {
        self.super_users.contains(&identity.short_name)
            || identity.groups.iter().any(|g| self.super_groups.contains(g))
    }

    /// Check whether `identity` is the system user.
    pub fn is_system_user(&self, identity: &Identity) -> bool {
        self.system_user.as_deref() == Some(identity.short_name.as_str())
    }
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// On-disk form of [`AuthzConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// See [`AuthzConfig::column_auth_optimization_enabled`].
    pub column_auth_optimization: bool,
    /// See [`AuthzConfig::update_policies_on_grant_revoke`].
    pub update_policies_on_grant_revoke: bool,
    /// See [`AuthzConfig::exec_permission_checks`].
    pub exec_permission_checks: bool,
    /// See [`AuthzConfig::special_tables`].
    pub special_tables: Vec<String>,
    /// See [`AuthzConfig::super_users`].
    pub super_users: BTreeSet<String>,
    /// See [`AuthzConfig::super_groups`].
    pub super_groups: BTreeSet<String>,
    /// See [`AuthzConfig::system_user`].
    pub system_user: Option<String>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        let defaults = AuthzConfig::new();
        Self {
            column_auth_optimization: false,
            update_policies_on_grant_revoke: defaults.update_policies_on_grant_revoke,
            exec_permission_checks: defaults.exec_permission_checks,
            special_tables: defaults.special_tables,
            super_users: defaults.super_users,
            super_groups: defaults.super_groups,
            system_user: defaults.system_user,
        }
    }
}

impl ConfigFile {
    fn validate(&self) -> AuthzResult<()> {
        if self.special_tables.iter().any(|t| t.is_empty()) {
            return Err(AuthzError::Config(
                "special_tables must not contain empty names".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<ConfigFile> for AuthzConfig {
    fn from(file: ConfigFile) -> Self {
        Self {
            column_auth_optimization: AtomicBool::new(file.column_auth_optimization),
            update_policies_on_grant_revoke: file.update_policies_on_grant_revoke,
            exec_permission_checks: file.exec_permission_checks,
            special_tables: file.special_tables,
            super_users: file.super_users,
            super_groups: file.super_groups,
            system_user: file.system_user,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AuthzConfig::default();
        assert!(!config.column_auth_optimization_enabled());
        assert!(config.update_policies_on_grant_revoke);
        assert!(!config.exec_permission_checks);
        assert!(config.is_special_table("hbase:meta"));
        assert!(!config.is_special_table("t1"));
    }

    #[test]
    fn test_toggle_optimization() {
        let config = AuthzConfig::new();
        config.set_column_auth_optimization(true);
        assert!(config.column_auth_optimization_enabled());
        config.set_column_auth_optimization(false);
        assert!(!config.column_auth_optimization_enabled());
    }

    #[test]
    fn test_from_json_partial() {
        let config = AuthzConfig::from_json_str(
            r#"{"column_auth_optimization": true, "super_users": ["hbase"]}"#,
        )
        .unwrap();

        assert!(config.column_auth_optimization_enabled());
        assert!(config.is_super_user(&Identity::new("hbase")));
        assert!(config.is_special_table("hbase:acl"));
    }

    #[test]
    fn test_from_json_rejects_empty_special_table() {
        let err = AuthzConfig::from_json_str(r#"{"special_tables": [""]}"#).unwrap_err();
        assert!(matches!(err, AuthzError::Config(_)));
    }

    #[test]
    fn test_super_group() {
        let config = AuthzConfig::new().with_super_group("supergroup");
        assert!(config.is_super_user(&Identity::new("carol").with_group("supergroup")));
        assert!(!config.is_super_user(&Identity::new("carol")));
    }
}
