//! A session: one KV cache over a shared model.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use llama_engine::{ChatMessage, LlamaError, Result, SessionHandle, SessionSpec, TokenId};
use llama_kv::SessionKVCache;
use llama_models::Model;
use llama_tokenizer::{ChatTemplate, Tokenizer};
use uuid::Uuid;

/// Mutable decoding state bound to one model.
///
/// The KV cache only grows: every decode appends cells and nothing in this
/// crate rewinds it. Sessions are reached through the
/// [`SessionTable`](crate::SessionTable), which serializes access per handle.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    handle: SessionHandle,
    model: Arc<Model>,
    model_path: PathBuf,
    cache: SessionKVCache,
    n_ctx: usize,
    n_batch: usize,
}

impl Session {
    /// Allocate the KV cache for `spec.context_size` cells.
    ///
    /// A batch size above the context size is clamped to it.
    pub fn new(
        handle: SessionHandle,
        model: Arc<Model>,
        model_path: PathBuf,
        spec: &SessionSpec,
    ) -> Result<Self> {
        let n_ctx = spec.context_size;
        let n_batch = spec.batch_size.min(n_ctx);
        let n_ctx_train = model.config().n_ctx_train;
        if n_ctx > n_ctx_train {
            tracing::warn!(
                %handle,
                n_ctx,
                n_ctx_train,
                "context size exceeds the model's training context"
            );
        }
        let cache = model
            .new_cache(n_ctx)
            .map_err(|e| LlamaError::SessionInit(format!("Failed to allocate KV cache: {e}")))?;
        Ok(Self {
            id: Uuid::new_v4(),
            handle,
            model,
            model_path,
            cache,
            n_ctx,
            n_batch,
        })
    }

    /// Unique id for log correlation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn n_ctx(&self) -> usize {
        self.n_ctx
    }

    pub fn n_batch(&self) -> usize {
        self.n_batch
    }

    pub fn used_cells(&self) -> usize {
        self.cache.used_cells()
    }

    pub fn cache(&self) -> &SessionKVCache {
        &self.cache
    }

    /// A beginning-of-sequence marker is prepended only to a fresh conversation.
    pub fn add_bos(&self) -> bool {
        self.cache.is_empty()
    }

    /// Tokenize `text` for this session's current state.
    pub fn tokenize(&self, text: &str) -> Result<Vec<TokenId>> {
        self.model
            .tokenizer()
            .tokenize(text, self.add_bos())
            .map_err(|e| LlamaError::Tokenization(format!("Failed to tokenize the prompt: {e}")))
    }

    /// The measure phase of [`tokenize`](Self::tokenize). Zero tokens is an error.
    pub fn count_tokens(&self, text: &str) -> Result<usize> {
        let n = self
            .model
            .tokenizer()
            .count_tokens(text, self.add_bos())
            .map_err(|e| LlamaError::Tokenization(format!("Failed to tokenize the prompt: {e}")))?;
        if n == 0 {
            return Err(LlamaError::Tokenization(
                "Prompt produced no tokens".to_string(),
            ));
        }
        Ok(n)
    }

    /// Render `messages` through the model's chat template, starting from a
    /// buffer the size of the context window.
    pub fn apply_template(&self, messages: &[ChatMessage]) -> Result<String> {
        let source = self.model.chat_template().ok_or_else(|| {
            LlamaError::Template("Model does not provide a chat template".to_string())
        })?;
        let template =
            ChatTemplate::detect(source).map_err(|e| LlamaError::Template(e.to_string()))?;
        template
            .apply(messages, self.n_ctx)
            .map_err(|e| LlamaError::Template(e.to_string()))
    }

    /// Decode `tokens` at the next cache positions and return the last logits.
    ///
    /// Fails with `ContextOverflow` before touching the cache when the batch
    /// does not fit.
    pub(crate) fn decode(&mut self, tokens: &[TokenId]) -> Result<Vec<f32>> {
        let used = self.cache.used_cells();
        if used + tokens.len() > self.n_ctx {
            tracing::warn!(
                handle = %self.handle,
                session = %self.id,
                used,
                pending = tokens.len(),
                n_ctx = self.n_ctx,
                "context size exceeded"
            );
            return Err(LlamaError::ContextOverflow {
                used,
                pending: tokens.len(),
                capacity: self.n_ctx,
            });
        }
        self.model
            .decode(tokens, &mut self.cache)
            .map_err(|e| LlamaError::Generation(format!("Failed to decode: {e}")))
    }
}
