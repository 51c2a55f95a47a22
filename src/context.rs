//! Request Context
//!
//! Carries the correlation id through every orchestration and ledger call.
//! This is an explicit value threaded through call sites, never thread-local
//! storage, so detached tasks keep their trace identity.

use std::fmt;

/// Per-request context propagated to the ledger service as `X-Correlation-ID`
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: String,
}

impl RequestContext {
    /// Create a context with a caller-supplied correlation id
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
        }
    }

    /// Create a context with a freshly generated correlation id
    pub fn generate() -> Self {
        Self {
            correlation_id: ulid::Ulid::new().to_string(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.correlation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_supplied_id_is_kept() {
        let ctx = RequestContext::new("req-42");
        assert_eq!(ctx.correlation_id(), "req-42");
        assert_eq!(ctx.to_string(), "req-42");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = RequestContext::generate();
        let b = RequestContext::generate();
        assert_ne!(a.correlation_id(), b.correlation_id());
        assert!(!a.correlation_id().is_empty());
    }
}
