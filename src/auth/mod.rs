//! Authentication: the credential triple, the identity service client and
//! the session manager that owns the triple.

pub mod credentials;
pub mod identity_api;
pub mod session;

pub use credentials::{jwt_expiry, AuthHeaders, CredentialTriple, StoredCredentials};
pub use identity_api::IdentityApiClient;
pub use session::{AuthSessionManager, ObserverId, SessionEvent, SessionObserver};
