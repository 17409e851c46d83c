//! Outfit diagnosis service
//!
//! Starts clothing diagnosis jobs on an external asynchronous processor,
//! receives their results through a webhook, and serves each result to the
//! client polling for its correlation token.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
