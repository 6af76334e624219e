//! Printable summary of an access evaluation.

use cellgate_core::{AuditEvent, ColumnFamilyAccessResult, FamilyAccess};
use serde::Serialize;
use std::collections::BTreeMap;

/// Overall outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Granted,
    Partial,
    Denied,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Granted => write!(f, "granted"),
            Outcome::Partial => write!(f, "partial"),
            Outcome::Denied => write!(f, "denied"),
        }
    }
}

/// What `check` prints.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub outcome: Outcome,
    pub everything_accessible: bool,
    pub something_accessible: bool,
    pub families: BTreeMap<String, FamilyAccess>,
    pub denial_reason: Option<String>,
    pub granted_events: Vec<AuditEvent>,
    pub family_level_granted_events: Vec<AuditEvent>,
    pub denied_event: Option<AuditEvent>,
}

impl From<ColumnFamilyAccessResult> for Verdict {
    fn from(result: ColumnFamilyAccessResult) -> Self {
        let outcome = if result.everything_accessible {
            Outcome::Granted
        } else if result.something_accessible {
            Outcome::Partial
        } else {
            Outcome::Denied
        };

        Self {
            outcome,
            everything_accessible: result.everything_accessible,
            something_accessible: result.something_accessible,
            families: result.families,
            denial_reason: result.denial_reason,
            granted_events: result.granted_events,
            family_level_granted_events: result.family_level_granted_events,
            denied_event: result.denied_event,
        }
    }
}

/// Human-readable status of one family.
pub fn describe_family(access: &FamilyAccess) -> String {
    match access {
        FamilyAccess::Denied => "denied".to_string(),
        FamilyAccess::Allowed => "allowed".to_string(),
        FamilyAccess::FullyAuthorized => "fully authorized".to_string(),
        FamilyAccess::Indeterminate => "per cell".to_string(),
        FamilyAccess::Columns(columns) if columns.is_empty() => "no columns".to_string(),
        FamilyAccess::Columns(columns) => {
            let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
            format!("columns: {}", columns.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_result() {
        let verdict = Verdict::from(ColumnFamilyAccessResult::unconditional());
        assert_eq!(verdict.outcome, Outcome::Granted);

        let result = ColumnFamilyAccessResult {
            something_accessible: true,
            ..ColumnFamilyAccessResult::default()
        };
        assert_eq!(Verdict::from(result).outcome, Outcome::Partial);
        assert_eq!(
            Verdict::from(ColumnFamilyAccessResult::default()).outcome,
            Outcome::Denied
        );
    }

    #[test]
    fn test_describe_family() {
        let columns = FamilyAccess::Columns(["a".to_string(), "b".to_string()].into_iter().collect());
        assert_eq!(describe_family(&columns), "columns: a, b");
        assert_eq!(describe_family(&FamilyAccess::Indeterminate), "per cell");
    }
}
