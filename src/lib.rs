//! Native text generation over GGUF LLaMA-family models.
//!
//! Re-exports the session API from the workspace crates: create a
//! [`NativeEngine`], open sessions with [`SessionSpec`], then count tokens,
//! apply chat templates and generate through the [`LlamaEngine`] trait.

pub use llama_engine::{
    ChatMessage, ErrorKind, LlamaEngine, LlamaError, Result, SamplingConfig, SessionHandle,
    SessionSpec, TokenId,
};
pub use llama_models::{tiny, Model};
pub use llama_runtime::{
    CallKind, EngineConfig, GenerationLimits, InferenceMetrics, LogTelemetry, NativeEngine,
    NoopTelemetry, TelemetryHook, TracingTelemetry,
};
pub use llama_sampling::SamplerChain;
pub use llama_tokenizer::{ChatTemplate, Vocabulary};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
