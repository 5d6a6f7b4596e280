//! Trait seams between the session layer and the outside world.
//!
//! - [`HttpClient`] - outbound POST requests
//! - [`CredentialStore`] - durable copy of the credential triple
//! - [`IdentityProvider`] - login and token refresh
//! - [`RealtimeTransport`] / [`RealtimeSocket`] - push-subscription sockets
//!
//! Production implementations live in `crate::adapters`, test doubles in
//! `crate::adapters::mock`.

pub mod credentials;
pub mod http;
pub mod identity;
pub mod realtime;

pub use credentials::{CredentialStore, CredentialsError};
pub use http::{Headers, HttpClient, HttpError, Response};
pub use identity::{IdentityProvider, TokenSet};
pub use realtime::{RealtimeSocket, RealtimeTransport, SocketEvent};
