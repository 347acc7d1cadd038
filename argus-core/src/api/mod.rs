//! HTTP API.
//!
//! Every endpoint resolves a cluster through the observer and calls one core
//! method, rendering the result as JSON. Route handlers live in [`rest`];
//! [`server`] assembles the router, basic auth, static file serving, and TLS.

pub mod rest;
pub mod server;

pub use server::ApiServer;
