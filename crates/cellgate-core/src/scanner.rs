//! Scanner ownership registry.

use crate::error::{AuthzError, AuthzResult};
use crate::identity::Identity;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Opaque scanner handle issued by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScannerId(pub u64);

impl std::fmt::Display for ScannerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scanner-{}", self.0)
    }
}

/// Concurrent map from open scanners to the short name of their owner.
///
/// Entries live from `register` until `release`; nothing is reclaimed
/// implicitly.
#[derive(Debug, Default)]
pub struct ScannerOwners {
    owners: DashMap<ScannerId, String>,
}

impl ScannerOwners {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `identity` as the owner of `scanner`.
    pub fn register(&self, scanner: ScannerId, identity: &Identity) {
        tracing::debug!(%scanner, owner = %identity.short_name, "scanner registered");
        self.owners.insert(scanner, identity.short_name.clone());
    }

    /// Fail unless `identity` owns `scanner`.
    ///
    /// Internal calls made outside a client RPC are not checked, and neither
    /// are scanners the registry does not know.
    pub fn require_owner(
        &self,
        scanner: ScannerId,
        identity: &Identity,
        in_rpc: bool,
    ) -> AuthzResult<()> {
        if !in_rpc {
            return Ok(());
        }

        match self.owners.get(&scanner) {
            Some(owner) if *owner != identity.short_name => {
                tracing::warn!(%scanner, owner = %*owner, user = %identity.short_name, "scanner used by non-owner");
                Err(AuthzError::NotScannerOwner {
                    user: identity.short_name.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Forget `scanner`. Returns the previous owner.
    pub fn release(&self, scanner: ScannerId) -> Option<String> {
        let removed = self.owners.remove(&scanner).map(|(_, owner)| owner);
        tracing::debug!(%scanner, released = removed.is_some(), "scanner released");
        removed
    }

    /// Current owner of `scanner`.
    pub fn owner(&self, scanner: ScannerId) -> Option<String> {
        self.owners.get(&scanner).map(|o| o.value().clone())
    }

    /// Number of scanners currently registered.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// True when no scanner is registered.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_owner_checks() {
        let owners = ScannerOwners::new();
        let alice = Identity::new("alice@EXAMPLE.COM");
        let bob = Identity::new("bob");
        let id = ScannerId(1);

        owners.register(id, &alice);
        assert!(owners.require_owner(id, &alice, true).is_ok());

        let err = owners.require_owner(id, &bob, true).unwrap_err();
        assert_eq!(err.to_string(), "User 'bob' is not the scanner owner!");

        // internal calls are trusted
        assert!(owners.require_owner(id, &bob, false).is_ok());
    }

    #[test]
    fn test_release_forgets_owner() {
        let owners = ScannerOwners::new();
        let id = ScannerId(7);
        owners.register(id, &Identity::new("alice"));

        assert_eq!(owners.release(id).as_deref(), Some("alice"));
        assert!(owners.owner(id).is_none());
        assert!(owners.is_empty());
        assert!(owners.release(id).is_none());
    }

    #[test]
    fn test_concurrent_registration() {
        let owners = Arc::new(ScannerOwners::new());
        let handles: Vec<_> = (0..8u64)
            .map(|i| {
                let owners = Arc::clone(&owners);
                thread::spawn(move || {
                    let user = Identity::new(format!("user{}", i));
                    owners.register(ScannerId(i), &user);
                    owners.require_owner(ScannerId(i), &user, true).unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(owners.len(), 8);
        assert_eq!(owners.owner(ScannerId(3)).as_deref(), Some("user3"));
    }
}
