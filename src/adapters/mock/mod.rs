//! Test doubles for the trait seams.
//!
//! - [`MockHttpClient`] - scripted per-URL responses with request recording
//! - [`InMemoryCredentials`] - in-memory credential store with failure switches
//! - [`MockRealtimeTransport`] - scripted sockets with server-side handles

pub mod credentials;
pub mod http;
pub mod realtime;

pub use credentials::InMemoryCredentials;
pub use http::{MockHttpClient, MockResponse, RecordedRequest};
pub use realtime::{MockRealtimeTransport, MockSocketHandle};

