//! Cellgate Core - column-family and column level authorization.
//!
//! Aggregates per-resource policy decisions for requests that name a table
//! and any number of column families and columns, produces a cell filter
//! when only part of a read is granted, and records one audit event per
//! decision that matters.

pub mod access;
pub mod audit;
pub mod authorizer;
pub mod bypass;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod filter;
pub mod grant;
pub mod hooks;
pub mod identity;
pub mod policy;
pub mod request;
pub mod scanner;
pub mod session;

pub use access::{evaluate_access, ColumnFamilyAccessResult};
pub use audit::{
    AuditEvent, AuditLogger, MemoryAuditLogger, NullAuditLogger, TracingAuditLogger,
};
pub use authorizer::Authorizer;
pub use config::AuthzConfig;
pub use error::{AuthzError, AuthzResult};
pub use evaluator::{AccessDecision, AccessRequest, PolicyEvaluator};
pub use filter::{AccessFilter, Cell, CellFilter, FamilyAccess, FilterDecision, FilterList};
pub use grant::{GrantRevokeRequest, PermissionScope, PolicyAdmin, UserPermission};
pub use hooks::{OperationContext, ReadRequest};
pub use identity::Identity;
pub use policy::{InMemoryPolicyEngine, PolicyRule};
pub use request::{AccessRequestShape, Action, FamilyMap, MatchingScope, RegionContext, ResourcePath};
pub use scanner::{ScannerId, ScannerOwners};
pub use session::AuthorizationSession;
