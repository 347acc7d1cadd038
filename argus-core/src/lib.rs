//! Argus core: a monitoring and administration engine for distributed
//! key/value database clusters.
//!
//! The [`observer::Observer`] owns the set of monitored
//! [`cluster::Cluster`]s and drives their refresh pipelines; each cluster
//! fans out to its [`node::Node`]s, aggregates the results, and publishes
//! them atomically to readers. The HTTP layer in [`api`] exposes published
//! state only and never blocks on a refresh.

pub mod alerts;
pub mod api;
pub mod backup;
pub mod client;
pub mod cluster;
pub mod config;
pub mod driver;
pub mod error;
pub mod info;
pub mod mailer;
pub mod namespace;
pub mod node;
pub mod observer;
pub mod stats;
pub mod timeseries;

// Scriptable mock driver, exposed for integration tests.
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use error::{ArgusError, ArgusResult};
