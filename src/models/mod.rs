//! Data shared between the realtime and polling paths.

mod update;

pub use update::{DataUpdate, UpdateCallback, UpdateSource};
