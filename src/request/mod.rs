//! Structured requests to the JSON API with retries and forced refresh.

pub mod client;
pub mod graphql;

pub use client::ResilientRequestClient;
pub use graphql::{GraphqlError, GraphqlRequest, GraphqlResponse};
