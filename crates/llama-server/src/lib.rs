//! # llama-server
//!
//! HTTP/JSON host for the llama-textgen session operations.
//!
//! Each route maps onto one `LlamaEngine` method. Engine calls block, so they
//! run on tokio's blocking pool behind a semaphore; a full pool answers 503.
//! Errors come back as `{"error": {"message", "type"}}` with the engine's
//! error kind as the type.

pub mod error;
pub mod handlers;
pub mod models;
pub mod server;
pub mod state;

pub use error::ServerError;
pub use server::{create_router, run_server};
pub use state::{AppState, ServerConfig};
