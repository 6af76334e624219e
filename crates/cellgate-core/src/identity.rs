//! Caller identity that flows through every authorization decision.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Authenticated principal attached to a data-plane operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Full principal name (e.g. `alice@EXAMPLE.COM`).
    pub name: String,
    /// Short name used for ownership checks and policy matching.
    pub short_name: String,
    /// Groups the principal belongs to.
    #[serde(default)]
    pub groups: BTreeSet<String>,
    /// Remote client address, when the call came over the wire.
    #[serde(default)]
    pub remote_address: Option<String>,
}

impl Identity {
    /// Create an identity whose short name is derived from the principal.
    ///
    /// The short name is the principal up to the first `/` or `@`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let short_name = name
            .split(|c| c == '/' || c == '@')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            name,
            short_name,
            groups: BTreeSet::new(),
            remote_address: None,
        }
    }

    /// Add a group.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    /// Add several groups.
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    /// Set the remote address.
    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = Some(address.into());
        self
    }

    /// Check group membership.
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }
}
