//! hublink - resilient cloud session, request and realtime layer for
//! smart-home hub device integrations.
//!
//! The pieces, leaves first:
//! - [`traits::CredentialStore`] persists the credential triple.
//! - [`auth::AuthSessionManager`] owns the triple and runs login and refresh.
//! - [`request::ResilientRequestClient`] sends API requests with retries.
//! - [`realtime::RealtimeConnectionManager`] keeps one subscription per device.
//! - [`polling::PollingCoordinator`] shares one listing poll between devices.
//! - [`hub::HubSession`] wires them together.

pub mod adapters;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod models;
pub mod polling;
pub mod realtime;
pub mod request;
pub mod traits;

mod util;

pub use config::HubConfig;
pub use error::{HubError, HubResult};
pub use hub::{HubComponents, HubSession};
