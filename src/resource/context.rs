//! Request context for TMF resource operations.
//!
//! Every operation runs on behalf of exactly one tenant. The context also carries
//! the request id used in log lines, the optional `If-Match` tag, and an optional
//! correlation id propagated into published events.

use crate::resource::version::HttpVersion;
use uuid::Uuid;

/// Request context for TMF operations.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for this request
    pub request_id: String,
    /// Tenant the request is scoped to
    pub tenant_id: String,
    /// Parsed `If-Match` header, if the client sent one
    pub if_match: Option<HttpVersion>,
    /// Correlation id forwarded to event envelopes
    pub correlation_id: Option<String>,
}

impl RequestContext {
    /// Create a new request context with a specific request ID.
    pub fn new(request_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            tenant_id: tenant_id.into(),
            if_match: None,
            correlation_id: None,
        }
    }

    /// Create a new request context for a tenant with a generated request ID.
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), tenant_id)
    }

    /// Attach an `If-Match` tag.
    pub fn with_if_match(mut self, version: HttpVersion) -> Self {
        self.if_match = Some(version);
        self
    }

    /// Attach a correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Get the tenant ID.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}
