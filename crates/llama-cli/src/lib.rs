//! # llama-cli
//!
//! Command-line host for llama-textgen.
//!
//! Each command opens one session on a [`NativeEngine`], runs a single
//! operation and releases the session again, whether or not the operation
//! succeeded.

use std::path::{Path, PathBuf};

use clap::Args;
use llama_engine::{
    ChatMessage, LlamaEngine, LlamaError, SamplingConfig, SessionHandle, SessionSpec,
};
use llama_models::ModelError;
use llama_runtime::NativeEngine;

/// Errors from a CLI command.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] LlamaError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

/// Where the model lives and how large the session is.
#[derive(Debug, Clone, Args)]
pub struct SessionArgs {
    /// Path to a GGUF model file.
    #[arg(short, long)]
    pub model: PathBuf,

    /// Context window in tokens.
    #[arg(long, default_value_t = 2048)]
    pub ctx_size: usize,

    /// Maximum tokens per decode batch (clamped to the context size).
    #[arg(long, default_value_t = 4096)]
    pub batch_size: usize,
}

impl SessionArgs {
    pub fn spec(&self) -> SessionSpec {
        SessionSpec::new(&self.model, self.ctx_size, self.batch_size)
    }
}

/// Overrides on top of the command's sampling defaults.
#[derive(Debug, Clone, Default, Args)]
pub struct SamplingArgs {
    /// Sampling temperature (0 = most likely token only).
    #[arg(short, long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub top_p: Option<f32>,

    /// Chat only.
    #[arg(long)]
    pub top_k: Option<i32>,

    /// Completion only.
    #[arg(long)]
    pub min_p: Option<f32>,

    #[arg(long)]
    pub repeat_penalty: Option<f32>,

    /// Completion only.
    #[arg(long)]
    pub frequency_penalty: Option<f32>,

    /// Completion only.
    #[arg(long)]
    pub presence_penalty: Option<f32>,

    /// Seed for stochastic sampling; 0 or less samples greedily.
    #[arg(short, long)]
    pub seed: Option<i64>,
}

impl SamplingArgs {
    pub fn apply(&self, base: SamplingConfig) -> SamplingConfig {
        SamplingConfig {
            temperature: self.temperature.unwrap_or(base.temperature),
            top_p: self.top_p.unwrap_or(base.top_p),
            top_k: self.top_k.unwrap_or(base.top_k),
            min_p: self.min_p.unwrap_or(base.min_p),
            repetition_penalty: self.repeat_penalty.unwrap_or(base.repetition_penalty),
            frequency_penalty: self.frequency_penalty.unwrap_or(base.frequency_penalty),
            presence_penalty: self.presence_penalty.unwrap_or(base.presence_penalty),
            seed: self.seed.unwrap_or(base.seed),
        }
    }
}

/// Create a session, run `f` on it and release it.
pub fn with_session<T>(
    engine: &NativeEngine,
    spec: &SessionSpec,
    f: impl FnOnce(SessionHandle) -> llama_engine::Result<T>,
) -> Result<T, CliError> {
    let handle = engine.create_session(spec)?;
    let out = f(handle);
    let released = engine.release_session(handle);
    let out = out?;
    released?;
    Ok(out)
}

/// Messages for a single-turn chat.
pub fn chat_messages(system: Option<&str>, user: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(user));
    messages
}

pub fn generate(
    engine: &NativeEngine,
    session: &SessionArgs,
    prompt: &str,
    sampling: &SamplingArgs,
) -> Result<String, CliError> {
    let cfg = sampling.apply(SamplingConfig::completion_defaults());
    with_session(engine, &session.spec(), |h| {
        engine.generate_completion(h, prompt, &cfg)
    })
}

pub fn chat(
    engine: &NativeEngine,
    session: &SessionArgs,
    system: Option<&str>,
    message: &str,
    sampling: &SamplingArgs,
) -> Result<String, CliError> {
    let cfg = sampling.apply(SamplingConfig::chat_defaults());
    let messages = chat_messages(system, message);
    with_session(engine, &session.spec(), |h| {
        engine.generate_chat(h, &messages, &cfg)
    })
}

pub fn count(engine: &NativeEngine, session: &SessionArgs, text: &str) -> Result<usize, CliError> {
    with_session(engine, &session.spec(), |h| engine.count_tokens(h, text))
}

pub fn template(
    engine: &NativeEngine,
    session: &SessionArgs,
    system: Option<&str>,
    message: &str,
) -> Result<String, CliError> {
    let messages = chat_messages(system, message);
    with_session(engine, &session.spec(), |h| {
        engine.apply_template(h, &messages)
    })
}

/// Write the tiny deterministic demo model.
pub fn demo_model(path: &Path) -> Result<(), CliError> {
    llama_models::tiny::write_tiny_model(path)?;
    Ok(())
}
