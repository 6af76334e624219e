//! Short-circuit rules applied before any per-family evaluation.

use crate::config::AuthzConfig;
use crate::error::{AuthzError, AuthzResult};
use crate::evaluator::PolicyEvaluator;
use crate::identity::Identity;
use crate::request::{Action, RegionContext};
use crate::session::AuthorizationSession;
use std::sync::Arc;

fn require_identity<'a>(
    identity: Option<&'a Identity>,
    operation: &str,
    action: Action,
    target: &str,
) -> AuthzResult<&'a Identity> {
    identity.ok_or_else(|| {
        tracing::warn!(operation, %action, target, "request carries no user");
        AuthzError::Malformed(format!(
            "No user associated with request ({}) for action: {} on table: {}",
            operation, action, target
        ))
    })
}

/// Whether a request against `table` needs no policy evaluation.
///
/// Reads of system/metadata tables are always allowed and never audited.
pub fn can_skip_table(
    config: &AuthzConfig,
    identity: Option<&Identity>,
    operation: &str,
    action: Action,
    table: &str,
) -> AuthzResult<bool> {
    require_identity(identity, operation, action, table)?;

    let skip = action == Action::Read && config.is_special_table(table);
    tracing::debug!(operation, %action, table, skip, "table bypass check");
    Ok(skip)
}

/// Whether a request against `region` needs no policy evaluation.
///
/// Metadata regions can always be read. Writing one is allowed without
/// further checks when the caller holds global CREATE; that check's audit
/// event is dropped.
pub fn can_skip_region(
    evaluator: &Arc<dyn PolicyEvaluator>,
    identity: Option<&Identity>,
    operation: &str,
    action: Action,
    region: &RegionContext,
) -> AuthzResult<bool> {
    let table = region.table_name().unwrap_or_default();
    let identity = require_identity(identity, operation, action, &table)?;

    if !region.meta_region {
        return Ok(false);
    }

    let skip = match action {
        Action::Read => true,
        Action::Write => {
            let mut session = AuthorizationSession::new(
                Arc::clone(evaluator),
                identity.clone(),
                operation,
                Action::Create,
            );
            let granted = session.authorize()?;
            let _ = session.take_event();
            granted
        }
        _ => false,
    };

    tracing::debug!(operation, %action, table = %table, skip, "metadata region bypass check");
    Ok(skip)
}
