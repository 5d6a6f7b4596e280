//! Context attached to errors as they cross component boundaries.

use chrono::{DateTime, Utc};

/// Where and when an error was produced.
///
/// The request client tags every surfaced failure with the endpoint and the
/// number of attempts it made; the realtime manager tags failures with the
/// device they belong to.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    /// Operation that failed (`execute`, `connect`, `refresh`, ...).
    pub operation: String,

    /// Endpoint the operation talked to.
    pub endpoint: Option<String>,

    /// Logical device the operation was performed for.
    pub device_id: Option<String>,

    /// Number of attempts made, including the one that failed.
    pub attempts: u32,

    /// When the error was recorded.
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            endpoint: None,
            device_id: None,
            attempts: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Key/value rendering for log lines.
    pub fn to_log_string(&self) -> String {
        let mut parts = vec![format!("operation={}", self.operation)];

        if let Some(ref endpoint) = self.endpoint {
            parts.push(format!("endpoint={}", endpoint));
        }
        if let Some(ref device_id) = self.device_id {
            parts.push(format!("device_id={}", device_id));
        }
        if self.attempts > 0 {
            parts.push(format!("attempts={}", self.attempts));
        }
        parts.push(format!("timestamp={}", self.timestamp.to_rfc3339()));

        parts.join(" ")
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.operation)?;

        if let Some(ref endpoint) = self.endpoint {
            write!(f, " endpoint={}", endpoint)?;
        }
        if let Some(ref device_id) = self.device_id {
            write!(f, " device={}", device_id)?;
        }
        if self.attempts > 0 {
            write!(f, " attempts={}", self.attempts)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let ctx = ErrorContext::new("execute")
            .with_endpoint("https://api.example.com/graphql")
            .with_attempts(4);

        assert_eq!(ctx.operation, "execute");
        assert_eq!(ctx.endpoint.as_deref(), Some("https://api.example.com/graphql"));
        assert_eq!(ctx.attempts, 4);
        assert!(ctx.device_id.is_none());
    }

    #[test]
    fn test_context_display() {
        let ctx = ErrorContext::new("connect").with_device_id("dev-1");
        assert_eq!(ctx.to_string(), "[connect] device=dev-1");

        let ctx = ErrorContext::new("execute")
            .with_endpoint("/graphql")
            .with_attempts(2);
        assert_eq!(ctx.to_string(), "[execute] endpoint=/graphql attempts=2");
    }

    #[test]
    fn test_log_string_contains_fields() {
        let log = ErrorContext::new("refresh").with_attempts(1).to_log_string();
        assert!(log.contains("operation=refresh"));
        assert!(log.contains("attempts=1"));
        assert!(log.contains("timestamp="));
    }
}
