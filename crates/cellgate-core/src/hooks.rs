//! Host operation hooks.
//!
//! One method per intercepted operation. Each maps its parameters onto an
//! [`AccessRequestShape`] or a single-resource check and returns `Ok(())`
//! to let the operation proceed.

use crate::authorizer::Authorizer;
use crate::error::{AuthzError, AuthzResult};
use crate::filter::{combine_filters, CellFilter};
use crate::identity::Identity;
use crate::request::{AccessRequestShape, Action, FamilyMap, RegionContext, ResourcePath};
use crate::scanner::ScannerId;

/// Caller and region of an intercepted operation.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    /// Authenticated caller.
    pub identity: Option<Identity>,
    /// Region the operation runs against.
    pub region: RegionContext,
    /// Whether the call arrived over client RPC rather than from the host itself.
    pub in_rpc: bool,
}

impl OperationContext {
    /// Context for a client call against `region`.
    pub fn new(identity: Identity, region: RegionContext) -> Self {
        Self {
            identity: Some(identity),
            region,
            in_rpc: true,
        }
    }

    /// Context for an internal call made by the host itself.
    pub fn internal(identity: Identity, region: RegionContext) -> Self {
        Self {
            in_rpc: false,
            ..Self::new(identity, region)
        }
    }

    fn table(&self, operation: &str, action: Action) -> AuthzResult<String> {
        self.region.table_name().ok_or_else(|| {
            AuthzError::Malformed(format!(
                "Insufficient permissions for operation '{}',action: {}",
                operation, action
            ))
        })
    }
}

/// A get or scan about to be executed.
pub struct ReadRequest {
    /// Requested families and columns; empty reads the whole table.
    pub families: FamilyMap,
    /// Filter already set by the caller, replaced by the combined filter on partial grants.
    pub filter: Option<Box<dyn CellFilter>>,
}

impl ReadRequest {
    /// Create a read of `families` with no caller filter.
    pub fn new(families: FamilyMap) -> Self {
        Self {
            families,
            filter: None,
        }
    }

    /// Set the caller's filter.
    pub fn with_filter(mut self, filter: Box<dyn CellFilter>) -> Self {
        self.filter = Some(filter);
        self
    }
}

fn shape(
    ctx: &OperationContext,
    operation: &str,
    action: Action,
    families: Option<FamilyMap>,
) -> AccessRequestShape {
    let mut shape = AccessRequestShape::new(ctx.identity.clone(), operation, action, ctx.region.clone());
    if let Some(families) = families {
        shape = shape.with_families(families);
    }
    shape
}

fn command_string(ctx: &OperationContext, operation: &str, families: &FamilyMap) -> String {
    format!(
        "{} table={} families={}",
        operation,
        ctx.region.table_name().unwrap_or_else(|| "-".to_string()),
        families
    )
}

// Data-plane operations.
impl Authorizer {
    fn authorize_read(&self, ctx: &OperationContext, operation: &str, read: &mut ReadRequest) -> AuthzResult<()> {
        let shape = shape(ctx, operation, Action::Read, Some(read.families.clone()))
            .with_other_info(command_string(ctx, operation, &read.families));

        match self.authorize_for_read(&shape)? {
            None => tracing::debug!(operation, "all access allowed, no filter added"),
            Some(filter) => {
                read.filter = Some(combine_filters(Box::new(filter), read.filter.take()));
                tracing::debug!(operation, "partial access, filter added");
            }
        }
        Ok(())
    }

    /// Before a get.
    pub fn pre_get(&self, ctx: &OperationContext, read: &mut ReadRequest) -> AuthzResult<()> {
        self.authorize_read(ctx, "get", read)
    }

    /// Before a scanner is opened.
    pub fn pre_scanner_open(&self, ctx: &OperationContext, read: &mut ReadRequest) -> AuthzResult<()> {
        self.authorize_read(ctx, "scannerOpen", read)
    }

    /// Before an existence check.
    pub fn pre_exists(&self, ctx: &OperationContext, families: &[String]) -> AuthzResult<()> {
        let families = FamilyMap::from_families(families.iter().cloned());
        self.require_permission(&shape(ctx, "exists", Action::Read, Some(families)))
    }

    /// Before a put.
    pub fn pre_put(&self, ctx: &OperationContext, families: &FamilyMap) -> AuthzResult<()> {
        self.require_permission(&shape(ctx, "put", Action::Write, Some(families.clone())))
    }

    /// Before a delete.
    pub fn pre_delete(&self, ctx: &OperationContext, families: &FamilyMap) -> AuthzResult<()> {
        self.require_permission(&shape(ctx, "delete", Action::Write, Some(families.clone())))
    }

    /// Before an append.
    pub fn pre_append(&self, ctx: &OperationContext, families: &FamilyMap) -> AuthzResult<()> {
        self.require_permission(&shape(ctx, "append", Action::Write, Some(families.clone())))
    }

    /// Before an increment. Only the families are checked.
    pub fn pre_increment(&self, ctx: &OperationContext, families: &FamilyMap) -> AuthzResult<()> {
        self.require_permission(&shape(ctx, "increment", Action::Write, Some(families.families_only())))
    }

    fn check_and_mutate(&self, ctx: &OperationContext, operation: &str, family: &str) -> AuthzResult<()> {
        let families = FamilyMap::from_families([family]);
        self.require_permission(&shape(ctx, operation, Action::Read, Some(families.clone())))?;
        self.require_permission(&shape(ctx, operation, Action::Write, Some(families)))
    }

    /// Before a check-and-put on `family`.
    pub fn pre_check_and_put(&self, ctx: &OperationContext, family: &str) -> AuthzResult<()> {
        self.check_and_mutate(ctx, "checkAndPut", family)
    }

    /// Before a check-and-delete on `family`.
    pub fn pre_check_and_delete(&self, ctx: &OperationContext, family: &str) -> AuthzResult<()> {
        self.check_and_mutate(ctx, "checkAndDelete", family)
    }

    /// Before store files are bulk loaded into `families`.
    pub fn pre_bulk_load_hfile(&self, ctx: &OperationContext, families: &[String]) -> AuthzResult<()> {
        let families = FamilyMap::from_families(families.iter().cloned());
        self.require_permission(&shape(ctx, "bulkLoadHFile", Action::Write, Some(families)))
    }

    /// Before a bulk load is prepared.
    pub fn pre_prepare_bulk_load(&self, ctx: &OperationContext) -> AuthzResult<()> {
        self.require_permission(&shape(ctx, "prePrepareBulkLoad", Action::Write, None))
    }

    /// Before a bulk load is cleaned up.
    pub fn pre_cleanup_bulk_load(&self, ctx: &OperationContext) -> AuthzResult<()> {
        self.require_permission(&shape(ctx, "preCleanupBulkLoad", Action::Write, None))
    }
}

// Scanner lifecycle.
impl Authorizer {
    /// After a scanner is opened; records its owner.
    pub fn post_scanner_open(&self, ctx: &OperationContext, scanner: ScannerId) {
        if let Some(identity) = &ctx.identity {
            self.scanners().register(scanner, identity);
        }
    }

    fn require_scanner_owner(&self, ctx: &OperationContext, scanner: ScannerId) -> AuthzResult<()> {
        match &ctx.identity {
            Some(identity) => self.scanners().require_owner(scanner, identity, ctx.in_rpc),
            None if !ctx.in_rpc => Ok(()),
            None => Err(AuthzError::Malformed(format!(
                "No user associated with request for {}",
                scanner
            ))),
        }
    }

    /// Before the next batch is read from a scanner.
    pub fn pre_scanner_next(&self, ctx: &OperationContext, scanner: ScannerId) -> AuthzResult<()> {
        self.require_scanner_owner(ctx, scanner)
    }

    /// Before a scanner is closed.
    pub fn pre_scanner_close(&self, ctx: &OperationContext, scanner: ScannerId) -> AuthzResult<()> {
        self.require_scanner_owner(ctx, scanner)
    }

    /// After a scanner is closed; forgets its owner.
    pub fn post_scanner_close(&self, scanner: ScannerId) {
        self.scanners().release(scanner);
    }
}

// Table and region administration.
impl Authorizer {
    fn on_table(&self, ctx: &OperationContext, operation: &str, table: &str, action: Action) -> AuthzResult<()> {
        self.authorize_resource(
            ctx.identity.as_ref(),
            operation,
            action,
            ResourcePath::table(table),
            None,
        )
    }

    fn on_region_table(&self, ctx: &OperationContext, operation: &str, action: Action) -> AuthzResult<()> {
        let table = ctx.table(operation, action)?;
        self.on_table(ctx, operation, &table, action)
    }

    /// Before a table is created.
    pub fn pre_create_table(&self, ctx: &OperationContext, table: &str) -> AuthzResult<()> {
        self.on_table(ctx, "createTable", table, Action::Create)
    }

    /// Before a table is deleted.
    pub fn pre_delete_table(&self, ctx: &OperationContext, table: &str) -> AuthzResult<()> {
        self.on_table(ctx, "deleteTable", table, Action::Create)
    }

    /// Before a table's schema is modified.
    pub fn pre_modify_table(&self, ctx: &OperationContext, table: &str) -> AuthzResult<()> {
        self.on_table(ctx, "modifyTable", table, Action::Create)
    }

    /// Before a table is enabled.
    pub fn pre_enable_table(&self, ctx: &OperationContext, table: &str) -> AuthzResult<()> {
        self.on_table(ctx, "enableTable", table, Action::Create)
    }

    /// Before a table is disabled.
    pub fn pre_disable_table(&self, ctx: &OperationContext, table: &str) -> AuthzResult<()> {
        self.on_table(ctx, "disableTable", table, Action::Create)
    }

    /// Before a region is flushed.
    pub fn pre_flush(&self, ctx: &OperationContext) -> AuthzResult<()> {
        self.on_region_table(ctx, "flush", Action::Create)
    }

    /// Before a region is compacted.
    pub fn pre_compact(&self, ctx: &OperationContext) -> AuthzResult<()> {
        self.on_region_table(ctx, "compact", Action::Create)
    }

    /// Before a region is closed.
    pub fn pre_close(&self, ctx: &OperationContext) -> AuthzResult<()> {
        self.on_region_table(ctx, "close", Action::Admin)
    }

    /// Before a region of `table` is moved.
    pub fn pre_move(&self, ctx: &OperationContext, table: &str) -> AuthzResult<()> {
        self.on_table(ctx, "move", table, Action::Admin)
    }

    /// Before a region of `table` is assigned.
    pub fn pre_assign(&self, ctx: &OperationContext, table: &str) -> AuthzResult<()> {
        self.on_table(ctx, "assign", table, Action::Admin)
    }

    /// Before a region of `table` is unassigned.
    pub fn pre_unassign(&self, ctx: &OperationContext, table: &str) -> AuthzResult<()> {
        self.on_table(ctx, "unassign", table, Action::Admin)
    }

    /// Before a region of `table` is taken offline.
    pub fn pre_region_offline(&self, ctx: &OperationContext, table: &str) -> AuthzResult<()> {
        self.on_table(ctx, "regionOffline", table, Action::Admin)
    }

    /// Before `table` is snapshotted.
    pub fn pre_snapshot(&self, ctx: &OperationContext, table: &str) -> AuthzResult<()> {
        self.on_table(ctx, "snapshot", table, Action::Admin)
    }

    /// Before a snapshot is cloned into `table`.
    pub fn pre_clone_snapshot(&self, ctx: &OperationContext, table: &str) -> AuthzResult<()> {
        self.on_table(ctx, "cloneSnapshot", table, Action::Admin)
    }

    /// Before `table` is restored from a snapshot.
    pub fn pre_restore_snapshot(&self, ctx: &OperationContext, table: &str) -> AuthzResult<()> {
        self.on_table(ctx, "restoreSnapshot", table, Action::Admin)
    }

    /// Before a snapshot of `table` is deleted.
    pub fn pre_delete_snapshot(&self, ctx: &OperationContext, table: &str) -> AuthzResult<()> {
        self.on_table(ctx, "deleteSnapshot", table, Action::Admin)
    }

    /// Before a region is opened.
    ///
    /// System regions may only be opened by the system user or a super user.
    pub fn pre_open(&self, ctx: &OperationContext) -> AuthzResult<()> {
        let table = ctx.table("open", Action::Admin)?;
        if !self.config().is_special_table(&table) {
            return self.on_table(ctx, "open", &table, Action::Admin);
        }

        let identity = ctx
            .identity
            .as_ref()
            .ok_or_else(|| AuthzError::Malformed("No user associated with request (open)".to_string()))?;
        if self.config().is_system_user(identity) || self.config().is_super_user(identity) {
            Ok(())
        } else {
            Err(AuthzError::AccessDenied(format!(
                "User '{}' is not system or super user.",
                identity.short_name
            )))
        }
    }

    /// Before an endpoint method runs on a region.
    pub fn pre_endpoint_invocation(&self, ctx: &OperationContext, service: &str, method: &str) -> AuthzResult<()> {
        if !self.config().exec_permission_checks {
            return Ok(());
        }
        let operation = format!("invoke({}.{})", service, method);
        self.on_region_table(ctx, &operation, Action::Execute)
    }
}

// Cluster-wide and namespace administration.
impl Authorizer {
    fn on_global(&self, ctx: &OperationContext, operation: &str) -> AuthzResult<()> {
        self.require_global_permission(ctx.identity.as_ref(), operation, None, Action::Admin)
    }

    /// Before the balancer runs.
    pub fn pre_balance(&self, ctx: &OperationContext) -> AuthzResult<()> {
        self.on_global(ctx, "balance")
    }

    /// Before the balancer is switched on or off.
    pub fn pre_balance_switch(&self, ctx: &OperationContext) -> AuthzResult<()> {
        self.on_global(ctx, "balanceSwitch")
    }

    /// Before the cluster is shut down.
    pub fn pre_shutdown(&self, ctx: &OperationContext) -> AuthzResult<()> {
        self.on_global(ctx, "shutdown")
    }

    /// Before the master is stopped.
    pub fn pre_stop_master(&self, ctx: &OperationContext) -> AuthzResult<()> {
        self.on_global(ctx, "stopMaster")
    }

    /// Before a region server is stopped.
    pub fn pre_stop_region_server(&self, ctx: &OperationContext) -> AuthzResult<()> {
        self.on_global(ctx, "stop")
    }

    /// Before a procedure is aborted.
    pub fn pre_abort_procedure(&self, ctx: &OperationContext) -> AuthzResult<()> {
        self.on_global(ctx, "abortProcedure")
    }

    /// After procedures are listed.
    pub fn post_get_procedures(&self, ctx: &OperationContext) -> AuthzResult<()> {
        self.on_global(ctx, "getProcedures")
    }

    /// Before a namespace is created.
    pub fn pre_create_namespace(&self, ctx: &OperationContext, namespace: &str) -> AuthzResult<()> {
        self.require_global_permission(ctx.identity.as_ref(), "createNamespace", Some(namespace), Action::Admin)
    }

    /// Before a namespace is deleted.
    pub fn pre_delete_namespace(&self, ctx: &OperationContext, namespace: &str) -> AuthzResult<()> {
        self.require_global_permission(ctx.identity.as_ref(), "deleteNamespace", Some(namespace), Action::Admin)
    }

    /// Before a namespace is modified.
    pub fn pre_modify_namespace(&self, ctx: &OperationContext, namespace: &str) -> AuthzResult<()> {
        self.require_global_permission(ctx.identity.as_ref(), "modifyNamespace", Some(namespace), Action::Admin)
    }

    fn listing_identity<'a>(&self, ctx: &'a OperationContext, operation: &str) -> AuthzResult<&'a Identity> {
        ctx.identity
            .as_ref()
            .ok_or_else(|| AuthzError::Malformed(format!("No user associated with request ({})", operation)))
    }

    /// After table descriptors are listed; keeps those the caller may create on.
    pub fn post_get_table_descriptors(
        &self,
        ctx: &OperationContext,
        tables: Vec<String>,
        regex: Option<&str>,
    ) -> AuthzResult<Vec<String>> {
        let identity = self.listing_identity(ctx, "getTableDescriptors")?;
        let info = format!("regex={}", regex.unwrap_or_default());
        self.filter_tables(identity, "getTableDescriptors", tables, Action::Create, Some(&info))
    }

    /// After table names are listed; keeps those the caller may read.
    pub fn post_get_table_names(
        &self,
        ctx: &OperationContext,
        tables: Vec<String>,
        regex: Option<&str>,
    ) -> AuthzResult<Vec<String>> {
        let identity = self.listing_identity(ctx, "getTableNames")?;
        let info = format!("regex={}", regex.unwrap_or_default());
        self.filter_tables(identity, "getTableNames", tables, Action::Read, Some(&info))
    }

    /// After namespaces are listed; keeps those the caller may administer.
    pub fn post_list_namespace_descriptors(
        &self,
        ctx: &OperationContext,
        namespaces: Vec<String>,
    ) -> AuthzResult<Vec<String>> {
        let identity = self.listing_identity(ctx, "getNameSpaceDescriptors")?;
        self.filter_namespaces(identity, "getNameSpaceDescriptors", namespaces)
    }
}
