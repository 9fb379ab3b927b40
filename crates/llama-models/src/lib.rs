//! # llama-models
//!
//! LLaMA-family model support for llama-textgen.
//!
//! Provides:
//! - **GGUF**: reading (memory mapped) and writing of llama.cpp model files
//! - **ModelConfig**: hyperparameters from GGUF metadata
//! - **Ops**: RMSNorm, RoPE, grouped-query attention, SwiGLU
//! - **Model**: weights + vocabulary + chat template, decoding into a KV cache
//! - **tiny**: a deterministic demo model writer for tests and smoke runs

pub mod config;
pub mod gguf;
pub mod model;
pub mod ops;
pub mod tiny;

use llama_engine::TokenId;
use llama_kv::KVError;
use llama_tokenizer::TokenizerError;

pub use config::ModelConfig;
pub use gguf::{GgmlType, GgufFile, GgufValue, GgufWriter};
pub use model::Model;
pub use ops::{Matrix, RmsNorm, Rope};

/// Errors from model loading and the forward pass.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid GGUF magic: expected 0x{expected:08X}, got 0x{got:08X}")]
    InvalidMagic { expected: u32, got: u32 },

    #[error("Unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),

    #[error("Malformed model file: {0}")]
    Malformed(String),

    #[error("Missing metadata key: {0}")]
    MissingMetadata(String),

    #[error("Unsupported model: {0}")]
    Unsupported(String),

    #[error("Tensor {name} has unsupported type {ggml_type}")]
    UnsupportedTensorType { name: String, ggml_type: u32 },

    #[error("Missing tensor: {0}")]
    MissingTensor(String),

    #[error("Tensor {name} has shape {got:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Vocabulary error: {0}")]
    Vocabulary(#[from] TokenizerError),

    #[error("KV cache error: {0}")]
    Cache(#[from] KVError),

    #[error("Token {0} is outside the vocabulary")]
    InvalidToken(TokenId),

    #[error("Nothing to decode")]
    EmptyBatch,
}

pub type ModelResult<T> = std::result::Result<T, ModelError>;
