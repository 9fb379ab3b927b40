//! Request/response bodies.

use std::path::PathBuf;

use llama_engine::{ChatMessage, SamplingConfig, SessionHandle};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub model_path: Option<PathBuf>,
    pub context_size: Option<usize>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub handle: SessionHandle,
    pub context_size: usize,
    pub batch_size: usize,
}

#[derive(Debug, Deserialize)]
pub struct CountTokensRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountTokensResponse {
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct TemplateRequest {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TemplateResponse {
    pub prompt: String,
}

/// Optional overrides of a generation kind's sampling defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SamplingParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<i32>,
    pub min_p: Option<f32>,
    pub repetition_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub seed: Option<i64>,
}

impl SamplingParams {
    pub fn apply(&self, base: SamplingConfig) -> SamplingConfig {
        SamplingConfig {
            temperature: self.temperature.unwrap_or(base.temperature),
            top_p: self.top_p.unwrap_or(base.top_p),
            top_k: self.top_k.unwrap_or(base.top_k),
            min_p: self.min_p.unwrap_or(base.min_p),
            repetition_penalty: self.repetition_penalty.unwrap_or(base.repetition_penalty),
            frequency_penalty: self.frequency_penalty.unwrap_or(base.frequency_penalty),
            presence_penalty: self.presence_penalty.unwrap_or(base.presence_penalty),
            seed: self.seed.unwrap_or(base.seed),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(flatten)]
    pub sampling: SamplingParams,
}

#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(flatten)]
    pub sampling: SamplingParams,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
}
