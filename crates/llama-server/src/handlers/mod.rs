//! HTTP request handlers for API endpoints.

pub mod generation;
pub mod health;
pub mod sessions;

pub use health::handle_health;
