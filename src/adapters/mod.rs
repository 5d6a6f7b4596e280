//! Concrete implementations of the trait seams in `crate::traits`.
//!
//! - [`ReqwestHttpClient`] - HTTP client using reqwest
//! - [`TungsteniteTransport`] - realtime sockets using tokio-tungstenite
//! - [`FileCredentialStore`] - credential triple persisted as a JSON file
//!
//! The [`mock`] submodule provides test doubles for all of them.

pub mod file_credentials;
pub mod mock;
pub mod reqwest_http;
pub mod tungstenite_ws;

pub use file_credentials::FileCredentialStore;
pub use mock::{InMemoryCredentials, MockHttpClient, MockRealtimeTransport};
pub use reqwest_http::ReqwestHttpClient;
pub use tungstenite_ws::TungsteniteTransport;
