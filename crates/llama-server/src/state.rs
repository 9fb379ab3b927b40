//! Application state and configuration.

use std::path::PathBuf;
use std::sync::Arc;

use llama_engine::LlamaEngine;
use tokio::sync::Semaphore;

use crate::error::ServerError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Shared engine; every call on it blocks, so handlers run it off the runtime.
    pub engine: Arc<dyn LlamaEngine>,
    pub config: ServerConfig,
    /// Bounds the blocking engine calls in flight.
    pub limiter: Arc<Semaphore>,
}

/// Server configuration parameters.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Used when a create request names no model.
    pub default_model: Option<PathBuf>,
    pub default_context_size: usize,
    pub default_batch_size: usize,
    /// Maximum concurrent blocking engine calls; more get 503.
    pub max_concurrent_calls: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_model: None,
            default_context_size: 2048,
            default_batch_size: 4096,
            max_concurrent_calls: 64,
        }
    }
}

impl AppState {
    pub fn new(engine: Arc<dyn LlamaEngine>, config: ServerConfig) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_calls));
        Self {
            engine,
            config,
            limiter,
        }
    }

    /// Run `f` against the engine on the blocking pool.
    ///
    /// Fails fast with `ServiceUnavailable` when every slot is taken.
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T, ServerError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn LlamaEngine) -> llama_engine::Result<T> + Send + 'static,
    {
        let permit = Arc::clone(&self.limiter)
            .try_acquire_owned()
            .map_err(|_| ServerError::ServiceUnavailable)?;
        let engine = Arc::clone(&self.engine);
        let out = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f(engine.as_ref())
        })
        .await
        .map_err(|e| ServerError::Internal(format!("engine task failed: {e}")))?;
        Ok(out?)
    }
}
