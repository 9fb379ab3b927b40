//! # llama-runtime
//!
//! Sessions and generation for llama-textgen. A [`SessionTable`] maps handles
//! to [`Session`]s (a KV cache over a shared, reference-counted model), the
//! [`GenerationLoop`] drives decode → sample → detokenize for one call, and
//! [`NativeEngine`] ties them together behind the `LlamaEngine` trait.
//! Telemetry hooks report TTFT and tokens/sec per call.

pub mod chains;
pub mod config;
pub mod engine;
pub mod generate;
pub mod session;
pub mod table;
pub mod telemetry;

pub use chains::{chat_chain, completion_chain};
pub use config::{EngineConfig, GenerationLimits};
pub use engine::NativeEngine;
pub use generate::{GenerationLoop, LoopState, StopPolicy};
pub use session::Session;
pub use table::SessionTable;
pub use telemetry::{
    CallKind, InferenceMetrics, InferenceTimer, LogTelemetry, NoopTelemetry, TelemetryHook,
    TracingTelemetry,
};
