//! Mirror Director Library
//!
//! Redirects file downloads of a software-mirror network to the best mirror
//! for the requester's location, backed by mirror health tracking and a
//! persistent cache of prior probe outcomes.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
