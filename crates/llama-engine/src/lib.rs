//! # llama-engine
//!
//! The "narrow waist" of the llama-textgen stack. Defines the [`LlamaEngine`]
//! trait (the six session operations a host calls), the error taxonomy every
//! operation reports, and the plain records that cross the host boundary.
//! Implementations can swap model backends without changing host code.
//!
//! ## Design Notes
//!
//! ### Interior Mutability
//! `LlamaEngine` methods take `&self` (not `&mut self`) so one engine can be
//! shared by many host threads. Session state lives behind the engine's own
//! locks: a table-level reader-writer lock for structural changes and a
//! per-session exclusive lock for anything that touches a session's KV cache.
//!
//! ### Token Type
//! `TokenId` is aliased as `i32` for FFI compatibility, though token IDs are logically
//! non-negative.
//!
//! ### Errors
//! Every failure is reported synchronously as a single [`LlamaError`]; its
//! [`ErrorKind`] is the stable "kind" half of the kind + message pair hosts map
//! onto their own error channels. Nothing in the core retries.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, LlamaError>;

/// Token ID type (i32 for FFI compat; logically non-negative).
pub type TokenId = i32;

/// Opaque identifier of a live session.
///
/// Handles are allocated from a monotonically increasing counter and are never
/// reused, so a released handle can never alias a newer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(u64);

impl SessionHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for SessionHandle {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Stable classification of a [`LlamaError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    InvalidHandle,
    ModelLoad,
    SessionInit,
    Tokenization,
    Template,
    ContextOverflow,
    Detokenization,
    Generation,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::InvalidHandle => "invalid_handle",
            ErrorKind::ModelLoad => "model_load_error",
            ErrorKind::SessionInit => "session_init_error",
            ErrorKind::Tokenization => "tokenization_error",
            ErrorKind::Template => "template_error",
            ErrorKind::ContextOverflow => "context_overflow",
            ErrorKind::Detokenization => "detokenization_error",
            ErrorKind::Generation => "generation_error",
        }
    }

    /// Caller misuse rather than damaged state; the session (if any) is still usable.
    pub fn is_caller_error(self) -> bool {
        matches!(self, ErrorKind::InvalidArgument | ErrorKind::InvalidHandle)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for all engine operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlamaError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid session handle: {0}")]
    InvalidHandle(SessionHandle),
    #[error("Model loading failed: {0}")]
    ModelLoad(String),
    #[error("Session initialization failed: {0}")]
    SessionInit(String),
    #[error("Tokenization failed: {0}")]
    Tokenization(String),
    #[error("Chat template failed: {0}")]
    Template(String),
    /// The KV cache cannot hold the pending batch. The cache keeps whatever was
    /// decoded before the check failed; the session must be released to recover.
    #[error("Context size exceeded: {used} cells used + {pending} pending > {capacity}")]
    ContextOverflow {
        used: usize,
        pending: usize,
        capacity: usize,
    },
    #[error("Failed to convert token {token} to piece: {reason}")]
    Detokenization { token: TokenId, reason: String },
    #[error("Generation failed: {0}")]
    Generation(String),
}

impl LlamaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlamaError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            LlamaError::InvalidHandle(_) => ErrorKind::InvalidHandle,
            LlamaError::ModelLoad(_) => ErrorKind::ModelLoad,
            LlamaError::SessionInit(_) => ErrorKind::SessionInit,
            LlamaError::Tokenization(_) => ErrorKind::Tokenization,
            LlamaError::Template(_) => ErrorKind::Template,
            LlamaError::ContextOverflow { .. } => ErrorKind::ContextOverflow,
            LlamaError::Detokenization { .. } => ErrorKind::Detokenization,
            LlamaError::Generation(_) => ErrorKind::Generation,
        }
    }
}

/// One turn of a conversation. Order within a message list is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Per-call sampling parameters. Never stored on a session.
///
/// Both generation kinds take the same record; each kind's chain reads only the
/// fields it composes (see `llama-runtime`'s chain templates). `seed <= 0`
/// selects greedy selection, `seed > 0` a seeded stochastic draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Logit divisor. `<= 0` keeps only the most likely candidate.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus mass. `>= 1.0` disables the stage.
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Rank cutoff. `<= 0` disables the stage.
    #[serde(default = "default_top_k")]
    pub top_k: i32,

    /// Relative-probability floor. `<= 0` disables the stage.
    #[serde(default)]
    pub min_p: f32,

    /// 1.0 = none.
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,

    #[serde(default)]
    pub frequency_penalty: f32,

    #[serde(default)]
    pub presence_penalty: f32,

    #[serde(default)]
    pub seed: i64,
}

fn default_temperature() -> f32 {
    0.98
}
fn default_top_p() -> f32 {
    0.37
}
fn default_top_k() -> i32 {
    100
}
fn default_repetition_penalty() -> f32 {
    1.18
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self::chat_defaults()
    }
}

impl SamplingConfig {
    /// Defaults used by chat hosts.
    pub fn chat_defaults() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            min_p: 0.0,
            repetition_penalty: default_repetition_penalty(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            seed: 0,
        }
    }

    /// Defaults used by completion hosts: every transform neutral.
    pub fn completion_defaults() -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            top_k: 0,
            min_p: 0.0,
            repetition_penalty: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            seed: 0,
        }
    }

    /// Temperature 0 and greedy selection.
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            ..Self::completion_defaults()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    pub fn with_top_k(mut self, top_k: i32) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_min_p(mut self, min_p: f32) -> Self {
        self.min_p = min_p;
        self
    }

    pub fn with_penalties(mut self, repetition: f32, frequency: f32, presence: f32) -> Self {
        self.repetition_penalty = repetition;
        self.frequency_penalty = frequency;
        self.presence_penalty = presence;
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    pub fn is_greedy(&self) -> bool {
        self.seed <= 0
    }

    /// Reject parameters no stage can work with. Every float must be finite;
    /// out-of-range finite values fall back to each stage's no-op rule.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("temperature", self.temperature),
            ("top_p", self.top_p),
            ("min_p", self.min_p),
            ("repetition_penalty", self.repetition_penalty),
            ("frequency_penalty", self.frequency_penalty),
            ("presence_penalty", self.presence_penalty),
        ];
        match fields.iter().find(|(_, v)| !v.is_finite()) {
            Some((name, v)) => Err(LlamaError::InvalidArgument(format!(
                "Sampling parameter {name} must be finite, got {v}"
            ))),
            None => Ok(()),
        }
    }
}

/// Inputs of `createSession`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSpec {
    pub model_path: PathBuf,
    #[serde(default = "default_context_size")]
    pub context_size: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_context_size() -> usize {
    2048
}
fn default_batch_size() -> usize {
    4096
}

impl SessionSpec {
    pub fn new(model_path: impl Into<PathBuf>, context_size: usize, batch_size: usize) -> Self {
        Self {
            model_path: model_path.into(),
            context_size,
            batch_size,
        }
    }

    /// Default context (2048) and batch (4096) sizes.
    pub fn with_defaults(model_path: impl Into<PathBuf>) -> Self {
        Self::new(model_path, default_context_size(), default_batch_size())
    }

    /// Boundary checks shared by every engine: non-empty path, positive sizes.
    pub fn validate(&self) -> Result<()> {
        if self.model_path.as_os_str().is_empty() {
            return Err(LlamaError::InvalidArgument(
                "Model path should not be empty".to_string(),
            ));
        }
        if self.context_size == 0 {
            return Err(LlamaError::InvalidArgument(
                "Context size must be positive".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(LlamaError::InvalidArgument(
                "Batch size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// The core engine trait, the full operation surface a host binds to.
///
/// Every call is synchronous and blocking: it runs to completion on the calling
/// thread. Calls against different handles may run in parallel; calls against
/// the same handle are serialized, and `release_session` waits for any in-flight
/// call on that handle before removing it.
pub trait LlamaEngine: Send + Sync {
    /// Load (or share) the model at `spec.model_path` and create a session over it.
    fn create_session(&self, spec: &SessionSpec) -> Result<SessionHandle>;

    /// Number of tokens `text` tokenizes to in this session's current state.
    /// A beginning-of-sequence marker is counted only while the session's KV
    /// cache is empty.
    fn count_tokens(&self, handle: SessionHandle, text: &str) -> Result<usize>;

    /// Render `messages` through the session model's chat template, ending
    /// where the assistant's reply should begin.
    fn apply_template(&self, handle: SessionHandle, messages: &[ChatMessage]) -> Result<String>;

    /// Template, tokenize and generate until the model emits an
    /// end-of-generation token.
    fn generate_chat(
        &self,
        handle: SessionHandle,
        messages: &[ChatMessage],
        sampling: &SamplingConfig,
    ) -> Result<String>;

    /// Tokenize raw text and generate until end-of-generation or the fixed
    /// completion token budget.
    fn generate_completion(
        &self,
        handle: SessionHandle,
        prompt: &str,
        sampling: &SamplingConfig,
    ) -> Result<String>;

    /// Remove the session and free its resources. Irreversible.
    fn release_session(&self, handle: SessionHandle) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_display_and_raw() {
        let h = SessionHandle::new(7);
        assert_eq!(h.raw(), 7);
        assert_eq!(h.to_string(), "#7");
        assert_eq!(SessionHandle::from(7), h);
    }

    #[test]
    fn error_kinds_map_one_to_one() {
        let cases = [
            (LlamaError::InvalidArgument("x".into()), ErrorKind::InvalidArgument),
            (LlamaError::InvalidHandle(SessionHandle::new(1)), ErrorKind::InvalidHandle),
            (LlamaError::ModelLoad("x".into()), ErrorKind::ModelLoad),
            (LlamaError::SessionInit("x".into()), ErrorKind::SessionInit),
            (LlamaError::Tokenization("x".into()), ErrorKind::Tokenization),
            (LlamaError::Template("x".into()), ErrorKind::Template),
            (
                LlamaError::ContextOverflow {
                    used: 1,
                    pending: 2,
                    capacity: 2,
                },
                ErrorKind::ContextOverflow,
            ),
            (
                LlamaError::Detokenization {
                    token: 3,
                    reason: "x".into(),
                },
                ErrorKind::Detokenization,
            ),
            (LlamaError::Generation("x".into()), ErrorKind::Generation),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn only_argument_and_handle_errors_are_caller_errors() {
        assert!(ErrorKind::InvalidArgument.is_caller_error());
        assert!(ErrorKind::InvalidHandle.is_caller_error());
        assert!(!ErrorKind::ContextOverflow.is_caller_error());
        assert!(!ErrorKind::Generation.is_caller_error());
    }

    #[test]
    fn context_overflow_message_carries_counts() {
        let err = LlamaError::ContextOverflow {
            used: 510,
            pending: 4,
            capacity: 512,
        };
        let msg = err.to_string();
        assert!(msg.contains("510"));
        assert!(msg.contains("512"));
    }

    #[test]
    fn chat_defaults_match_default() {
        let cfg = SamplingConfig::default();
        assert_eq!(cfg, SamplingConfig::chat_defaults());
        assert_eq!(cfg.top_k, 100);
        assert!((cfg.temperature - 0.98).abs() < 1e-6);
        assert!(cfg.is_greedy());
    }

    #[test]
    fn completion_defaults_are_neutral() {
        let cfg = SamplingConfig::completion_defaults();
        assert_eq!(cfg.top_p, 1.0);
        assert_eq!(cfg.min_p, 0.0);
        assert_eq!(cfg.repetition_penalty, 1.0);
        assert_eq!(cfg.frequency_penalty, 0.0);
        assert_eq!(cfg.presence_penalty, 0.0);
    }

    #[test]
    fn positive_seed_is_stochastic() {
        assert!(!SamplingConfig::greedy().with_seed(3).is_greedy());
        assert!(SamplingConfig::greedy().with_seed(-1).is_greedy());
    }

    #[test]
    fn sampling_validation_rejects_non_finite_fields() {
        assert!(SamplingConfig::chat_defaults().validate().is_ok());
        assert!(SamplingConfig::greedy().with_penalties(0.0, 0.0, 0.0).validate().is_ok());
        let bad = [
            SamplingConfig::greedy().with_temperature(f32::NAN),
            SamplingConfig::greedy().with_top_p(f32::INFINITY),
            SamplingConfig::greedy().with_min_p(f32::NEG_INFINITY),
            SamplingConfig::greedy().with_penalties(f32::NAN, 0.0, 0.0),
            SamplingConfig::greedy().with_penalties(1.0, 0.0, f32::NAN),
        ];
        for cfg in bad {
            let err = cfg.validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{cfg:?}");
        }
        let err = SamplingConfig::greedy()
            .with_temperature(f32::NAN)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn session_spec_rejects_empty_path() {
        let err = SessionSpec::new("", 512, 512).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn session_spec_rejects_zero_sizes() {
        assert!(SessionSpec::new("m.gguf", 0, 512).validate().is_err());
        assert!(SessionSpec::new("m.gguf", 512, 0).validate().is_err());
        assert!(SessionSpec::new("m.gguf", 512, 512).validate().is_ok());
    }

    #[test]
    fn session_spec_defaults() {
        let spec = SessionSpec::with_defaults("m.gguf");
        assert_eq!(spec.context_size, 2048);
        assert_eq!(spec.batch_size, 4096);
    }
}
