//! Audit events, the single-slot capture buffer, and audit sinks.
//!
//! The evaluator produces at most one [`AuditEvent`] per evaluated resource.
//! A session parks it in an [`AuditHandler`]; the aggregation code takes it
//! out immediately after each call and decides which list it belongs to.

use crate::request::{Action, ResourcePath};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Counter for generating unique event IDs.
static EVENT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Current time in microseconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Generate a unique event ID using timestamp and counter.
fn generate_event_id() -> [u8; 16] {
    let ts = current_timestamp();
    let counter = EVENT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut id = [0u8; 16];
    id[0..8].copy_from_slice(&ts.to_be_bytes());
    id[8..16].copy_from_slice(&counter.to_be_bytes());
    id
}

/// One authorization audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID.
    pub id: [u8; 16],
    /// Timestamp when the decision was made.
    pub timestamp: u64,
    /// Principal the decision was made for.
    pub user: String,
    /// Host operation name.
    pub operation: String,
    /// Access type evaluated.
    pub access_type: String,
    /// Resource path, rendered.
    pub resource: String,
    /// Whether access was granted.
    pub allowed: bool,
    /// Policy that decided, if any matched.
    pub policy_id: Option<u64>,
    /// Client address, if known.
    pub client_address: Option<String>,
    /// Free-form request description.
    pub request_data: Option<String>,
}

impl AuditEvent {
    /// Create a new event.
    pub fn new(
        user: impl Into<String>,
        operation: impl Into<String>,
        action: Action,
        resource: &ResourcePath,
        allowed: bool,
    ) -> Self {
        Self {
            id: generate_event_id(),
            timestamp: current_timestamp(),
            user: user.into(),
            operation: operation.into(),
            access_type: action.access_type().to_string(),
            resource: resource.to_string(),
            allowed,
            policy_id: None,
            client_address: None,
            request_data: None,
        }
    }

    /// Set the deciding policy.
    pub fn with_policy(mut self, policy_id: Option<u64>) -> Self {
        self.policy_id = policy_id;
        self
    }

    /// Set the client address.
    pub fn with_client_address(mut self, address: Option<String>) -> Self {
        self.client_address = address;
        self
    }

    /// Set the request description.
    pub fn with_request_data(mut self, data: Option<String>) -> Self {
        self.request_data = data;
        self
    }

    /// Format the event as a log line.
    pub fn to_log_line(&self) -> String {
        format!(
            "{} id={} user={} op={} access={} resource={} result={} policy={} client={}",
            self.timestamp,
            hex::encode(self.id),
            self.user,
            self.operation,
            self.access_type,
            self.resource,
            if self.allowed { "ALLOWED" } else { "DENIED" },
            self.policy_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.client_address.as_deref().unwrap_or("-"),
        )
    }
}

/// Single-event buffer tied to the most recent evaluator call.
#[derive(Debug, Default)]
pub struct AuditHandler {
    most_recent: Option<AuditEvent>,
}

impl AuditHandler {
    /// Create an empty handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the event of the latest evaluation, replacing any untaken one.
    pub fn capture(&mut self, event: Option<AuditEvent>) {
        self.most_recent = event;
    }

    /// Return the most recent event and clear the slot.
    pub fn take_most_recent(&mut self) -> Option<AuditEvent> {
        self.most_recent.take()
    }
}

/// Trait for audit log backends.
pub trait AuditLogger: Send + Sync {
    /// Log an audit event.
    fn log(&self, event: AuditEvent);

    /// Log a batch of events.
    fn log_all(&self, events: Vec<AuditEvent>) {
        for event in events {
            self.log(event);
        }
    }

    /// Flush any buffered events.
    fn flush(&self) -> Result<(), AuditError>;
}

/// Audit logging error.
#[derive(Debug, thiserror::Error)]
#[error("audit error: {0}")]
pub struct AuditError(pub String);

/// In-memory audit logger for testing.
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditLogger {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditLogger {
    /// Create a new memory logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all logged events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Events whose decision was a denial.
    pub fn denials(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().filter(|e| !e.allowed).cloned().collect()
    }

    /// Clear all events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Get event count.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AuditLogger for MemoryAuditLogger {
    fn log(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// No-op audit logger that discards all events.
#[derive(Debug, Default)]
pub struct NullAuditLogger;

impl AuditLogger for NullAuditLogger {
    fn log(&self, _event: AuditEvent) {}

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Audit logger that emits events on the `cellgate::audit` tracing target.
#[derive(Debug, Default)]
pub struct TracingAuditLogger;

impl AuditLogger for TracingAuditLogger {
    fn log(&self, event: AuditEvent) {
        tracing::info!(
            target: "cellgate::audit",
            user = %event.user,
            operation = %event.operation,
            allowed = event.allowed,
            "{}",
            event.to_log_line()
        );
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}
