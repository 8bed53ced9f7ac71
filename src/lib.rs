//! guestkey: guest access codes for smart-lock properties.
//!
//! Library crate used by the `guestkey` binary and the integration tests in
//! `tests/`.

pub mod access;
pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod lock;
pub mod metrics;
pub mod models;
pub mod notification;
pub mod rate_limit;
pub mod revocation;
pub mod state;
pub mod store;

pub use app::{AccessControl, AccessControlSettings};
pub use errors::{AppError, AppResult};
