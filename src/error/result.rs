//! Result alias and context helpers.

use super::context::ErrorContext;
use super::hub_error::HubError;

/// Result type used across hublink.
pub type HubResult<T> = Result<T, HubError>;

/// Attach an [`ErrorContext`] to the error side of a result.
pub trait ResultExt<T> {
    fn context(self, ctx: ErrorContext) -> HubResult<T>;

    /// Like [`ResultExt::context`], building the context only on error.
    fn with_context<F>(self, f: F) -> HubResult<T>
    where
        F: FnOnce() -> ErrorContext;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<HubError>,
{
    fn context(self, ctx: ErrorContext) -> HubResult<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F>(self, f: F) -> HubResult<T>
    where
        F: FnOnce() -> ErrorContext,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthError, NetworkError};

    #[test]
    fn test_context_on_error() {
        let result: Result<(), NetworkError> = Err(NetworkError::Cancelled);
        let err = result
            .context(ErrorContext::new("execute").with_attempts(1))
            .unwrap_err();
        assert_eq!(err.context().map(|c| c.operation.as_str()), Some("execute"));
    }

    #[test]
    fn test_with_context_is_lazy() {
        let result: Result<u8, AuthError> = Ok(3);
        let value = result
            .with_context(|| panic!("context must not be built on success"))
            .unwrap();
        assert_eq!(value, 3);
    }
}
