//! Request context for correlation across integrity operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Correlation data carried through one logical operation.
///
/// Every public engine operation takes a `&RequestContext` and runs inside
/// [`RequestContext::span`], so a verification triggered by the monitor and
/// the repair it leads to can be followed through the logs by their shared
/// `correlation_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Unique request identifier.
    pub request_id: Uuid,
    /// Correlation ID shared by related requests.
    pub correlation_id: Uuid,
    /// Parent request ID if this is a sub-request.
    pub parent_id: Option<Uuid>,
    /// Audit log the operation targets, if any.
    pub log_id: Option<String>,
    /// Who asked for the operation (operator name, "monitor", ...).
    pub initiator: Option<String>,
    /// When the request started.
    pub started_at: DateTime<Utc>,
    /// Component that created this context.
    pub source: String,
    /// Operation being performed.
    pub operation: Option<String>,
    /// Additional metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RequestContext {
    /// Create a new root context.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            request_id: id,
            correlation_id: id,
            parent_id: None,
            log_id: None,
            initiator: None,
            started_at: Utc::now(),
            source: source.into(),
            operation: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Create a child context that inherits correlation, log and initiator.
    #[must_use]
    pub fn child(&self, source: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            correlation_id: self.correlation_id,
            parent_id: Some(self.request_id),
            log_id: self.log_id.clone(),
            initiator: self.initiator.clone(),
            started_at: Utc::now(),
            source: source.into(),
            operation: None,
            metadata: self.metadata.clone(),
        }
    }

    /// Set the correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = id;
        self
    }

    /// Set the target audit log.
    #[must_use]
    pub fn with_log_id(mut self, log_id: impl Into<String>) -> Self {
        self.log_id = Some(log_id.into());
        self
    }

    /// Set who initiated the operation.
    #[must_use]
    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = Some(initiator.into());
        self
    }

    /// Set the operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Add metadata.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Elapsed wall time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now()
            .signed_duration_since(self.started_at)
            .max(chrono::Duration::zero())
    }

    /// Elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        self.elapsed().num_milliseconds()
    }

    /// A tracing span carrying this context's identifiers.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "integrity",
            request_id = %self.request_id,
            correlation_id = %self.correlation_id,
            source = %self.source,
            log_id = self.log_id.as_deref(),
            operation = self.operation.as_deref(),
            initiator = self.initiator.as_deref(),
        )
    }

    /// First eight characters of the request ID.
    #[must_use]
    pub fn short_id(&self) -> String {
        self.request_id.simple().to_string().chars().take(8).collect()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_context_creation() {
        let ctx = RequestContext::new("cli");
        assert_eq!(ctx.source, "cli");
        assert_eq!(ctx.request_id, ctx.correlation_id);
        assert!(ctx.parent_id.is_none());
        assert!(ctx.log_id.is_none());
    }

    #[test]
    fn test_request_context_builder() {
        let correlation = Uuid::new_v4();
        let ctx = RequestContext::new("cli")
            .with_correlation_id(correlation)
            .with_log_id("payments")
            .with_initiator("alice")
            .with_operation("repair")
            .with_metadata("ticket", "INC-7");

        assert_eq!(ctx.correlation_id, correlation);
        assert_eq!(ctx.log_id.as_deref(), Some("payments"));
        assert_eq!(ctx.initiator.as_deref(), Some("alice"));
        assert_eq!(ctx.operation.as_deref(), Some("repair"));
        assert_eq!(ctx.metadata.get("ticket").map(String::as_str), Some("INC-7"));
    }

    #[test]
    fn test_child_context_inherits_correlation() {
        let parent = RequestContext::new("monitor")
            .with_log_id("payments")
            .with_initiator("monitor")
            .with_metadata("tick", "4");
        let child = parent.child("verifier").with_operation("verify");

        assert_ne!(child.request_id, parent.request_id);
        assert_eq!(child.correlation_id, parent.correlation_id);
        assert_eq!(child.parent_id, Some(parent.request_id));
        assert_eq!(child.log_id, parent.log_id);
        assert_eq!(child.initiator, parent.initiator);
        assert_eq!(child.metadata.get("tick").map(String::as_str), Some("4"));
        assert!(child.operation.is_some());
        assert!(parent.operation.is_none());
    }

    #[test]
    fn test_elapsed_is_non_negative() {
        let ctx = RequestContext::new("test");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(ctx.elapsed_ms() >= 5);
    }

    #[test]
    fn test_short_id() {
        assert_eq!(RequestContext::new("test").short_id().len(), 8);
    }

    #[test]
    fn test_serialization() {
        let ctx = RequestContext::new("cli")
            .with_log_id("payments")
            .with_operation("scan");

        let json = serde_json::to_string(&ctx).unwrap();
        assert!(json.contains("\"log_id\":\"payments\""));

        let parsed: RequestContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.request_id, ctx.request_id);
        assert_eq!(parsed.operation.as_deref(), Some("scan"));
    }
}
