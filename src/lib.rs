//! Live state synchronization for hands-on sessions.
//!
//! A coordinator publishes a task list; participants tick tasks off; both
//! sides keep a local projection of the session current through push
//! channels, with polling and bounded reconnection when push degrades.

pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod model;
pub mod services;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_helpers;
