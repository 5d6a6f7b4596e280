//! Error handling for hublink.
//!
//! - **Domain errors**: [`AuthError`] (login/refresh), [`NetworkError`] (HTTP),
//!   [`TransportError`] (realtime sockets)
//! - **Unified error**: [`HubError`] with categories, retry and re-auth checks
//! - **Context**: [`ErrorContext`] records the operation, endpoint, device and
//!   attempt count of a surfaced failure
//!
//! | Failure | Type | Retried locally |
//! |---------|------|-----------------|
//! | Bad credentials | `AuthError::AuthenticationFailed` | No |
//! | Interactive challenge | `AuthError::ChallengeRequired` | No |
//! | Refresh impossible/rejected | `AuthError::Refresh*` | No, session invalidated |
//! | HTTP failure after retries | `NetworkError::HttpStatus` | Yes, then surfaced |
//! | Socket failure | `TransportError` | Yes, reconnect with backoff |
//! | Errors inside a 2xx body | `HubError::Graphql` | No |

mod auth;
mod category;
mod context;
mod hub_error;
mod network;
mod result;
mod transport;

pub use auth::AuthError;
pub use category::ErrorCategory;
pub use context::ErrorContext;
pub use hub_error::HubError;
pub use network::{classify_http_error, is_retryable_status, NetworkError};
pub use result::{HubResult, ResultExt};
pub use transport::TransportError;
