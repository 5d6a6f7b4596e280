//! Realtime device subscriptions over the `graphql-ws` protocol.

pub mod backoff;
pub mod connection;
pub mod handshake;
pub mod manager;
pub mod messages;
pub mod url;

pub use backoff::Backoff;
pub use connection::{ConnectOptions, SubscriptionState};
pub use manager::RealtimeConnectionManager;
pub use messages::{ClientFrame, ServerFrame};
pub use url::{api_host, build_realtime_url};
