//! Cell-level enforcement for partially granted reads.
//!
//! An [`AccessFilter`] is built from one access decision and attached to one
//! get or scan. Cells of families whose status was settled at decision time
//! are answered from the precomputed state; cells of indeterminate families
//! are resolved by a live column check through the retained session.

use crate::audit::{AuditEvent, AuditLogger};
use crate::error::AuthzResult;
use crate::session::AuthorizationSession;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// A cell handed to a filter by the read pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Row key.
    pub row: Vec<u8>,
    /// Column family.
    pub family: String,
    /// Column qualifier.
    pub qualifier: String,
    /// Cell timestamp.
    pub timestamp: u64,
    /// Cell value.
    pub value: Vec<u8>,
}

impl Cell {
    /// Create a cell with an empty value.
    pub fn new(row: impl Into<Vec<u8>>, family: impl Into<String>, qualifier: impl Into<String>) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            timestamp: 0,
            value: Vec::new(),
        }
    }

    /// Set the value.
    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = value.into();
        self
    }

    /// Set the timestamp.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Per-cell filter verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Return the cell.
    Include,
    /// Drop the cell.
    Skip,
}

/// A read-pipeline cell filter.
pub trait CellFilter: Send {
    /// Decide whether `cell` is returned to the caller.
    fn filter_cell(&mut self, cell: &Cell) -> AuthzResult<FilterDecision>;
}

/// Access status of one family, as settled at decision time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "columns")]
pub enum FamilyAccess {
    /// No cell of the family may be returned.
    Denied,
    /// The family and all its columns are granted.
    Allowed,
    /// Granted including every descendant, so columns were not evaluated.
    FullyAuthorized,
    /// Must be resolved per cell.
    Indeterminate,
    /// Only these columns may be returned.
    Columns(BTreeSet<String>),
}

/// Cell filter seeded from a partially granted access decision.
pub struct AccessFilter {
    families: BTreeMap<String, FamilyAccess>,
    session: AuthorizationSession,
    cache: HashMap<(String, String), bool>,
    deferred_events: Vec<AuditEvent>,
    logger: Option<Arc<dyn AuditLogger>>,
}

impl AccessFilter {
    /// Build a filter from settled family states and the session used to decide them.
    pub fn new(families: BTreeMap<String, FamilyAccess>, mut session: AuthorizationSession) -> Self {
        session.column(None).reset_scope();
        Self {
            families,
            session,
            cache: HashMap::new(),
            deferred_events: Vec::new(),
            logger: None,
        }
    }

    /// Hand over family-level grant events to be logged once a cell is returned.
    pub fn with_deferred_audit(mut self, events: Vec<AuditEvent>, logger: Arc<dyn AuditLogger>) -> Self {
        self.deferred_events = events;
        self.logger = Some(logger);
        self
    }

    /// Status of `family`, if the decision mentioned it.
    pub fn family_access(&self, family: &str) -> Option<&FamilyAccess> {
        self.families.get(family)
    }

    /// All settled family states.
    pub fn families(&self) -> &BTreeMap<String, FamilyAccess> {
        &self.families
    }

    /// Number of live column checks resolved so far.
    pub fn cached_checks(&self) -> usize {
        self.cache.len()
    }

    fn check_column(&mut self, family: &str, qualifier: &str) -> AuthzResult<bool> {
        let key = (family.to_string(), qualifier.to_string());
        if let Some(&granted) = self.cache.get(&key) {
            return Ok(granted);
        }

        self.session.family(Some(family)).column(Some(qualifier));
        let granted = self.session.authorize()?;
        let event = self.session.take_event();

        tracing::debug!(family, qualifier, granted, "resolved indeterminate cell");

        if let (Some(event), Some(logger)) = (event, &self.logger) {
            logger.log(event);
        }
        self.cache.insert(key, granted);
        Ok(granted)
    }

    fn flush_deferred(&mut self) {
        if self.deferred_events.is_empty() {
            return;
        }
        if let Some(logger) = &self.logger {
            logger.log_all(std::mem::take(&mut self.deferred_events));
        }
    }
}

impl CellFilter for AccessFilter {
    fn filter_cell(&mut self, cell: &Cell) -> AuthzResult<FilterDecision> {
        let included = match self.families.get(&cell.family) {
            None | Some(FamilyAccess::Denied) => false,
            Some(FamilyAccess::Allowed) | Some(FamilyAccess::FullyAuthorized) => true,
            Some(FamilyAccess::Columns(columns)) => columns.contains(&cell.qualifier),
            Some(FamilyAccess::Indeterminate) => self.check_column(&cell.family, &cell.qualifier)?,
        };

        if included {
            self.flush_deferred();
            Ok(FilterDecision::Include)
        } else {
            Ok(FilterDecision::Skip)
        }
    }
}

impl std::fmt::Debug for AccessFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessFilter")
            .field("families", &self.families)
            .field("session", &self.session)
            .field("cached_checks", &self.cache.len())
            .field("deferred_events", &self.deferred_events.len())
            .finish()
    }
}

/// Filters combined so that a cell must pass every member.
pub struct FilterList {
    filters: Vec<Box<dyn CellFilter>>,
}

impl FilterList {
    /// Combine `filters` with logical AND, evaluated in order.
    pub fn must_pass_all(filters: Vec<Box<dyn CellFilter>>) -> Self {
        Self { filters }
    }
}

impl CellFilter for FilterList {
    fn filter_cell(&mut self, cell: &Cell) -> AuthzResult<FilterDecision> {
        for filter in &mut self.filters {
            if filter.filter_cell(cell)? == FilterDecision::Skip {
                return Ok(FilterDecision::Skip);
            }
        }
        Ok(FilterDecision::Include)
    }
}

/// Attach `filter` in front of whatever filter the caller already set.
pub fn combine_filters(
    filter: Box<dyn CellFilter>,
    existing: Option<Box<dyn CellFilter>>,
) -> Box<dyn CellFilter> {
    match existing {
        Some(existing) => Box::new(FilterList::must_pass_all(vec![filter, existing])),
        None => filter,
    }
}
