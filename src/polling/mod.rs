//! Shared listing poll for many devices.

pub mod coordinator;
pub mod debouncer;
pub mod fetcher;

pub use coordinator::{EmptyHook, PollCompletion, PollOutcome, PollerEntry, PollingCoordinator, PollingStats};
pub use debouncer::Debouncer;
pub use fetcher::{GraphqlListingFetcher, ListingFetcher};
