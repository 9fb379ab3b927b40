//! The decode → sample → detokenize loop.

use std::sync::Arc;

use llama_engine::{LlamaError, Result, TokenId};
use llama_sampling::SamplerChain;
use llama_tokenizer::{DecodingState, Tokenizer, TokenizerError};

use crate::config::GenerationLimits;
use crate::session::Session;
use crate::telemetry::{CallKind, InferenceTimer, TelemetryHook};

/// When a call stops, besides failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPolicy {
    /// Only on an end-of-generation token.
    EndOfGeneration,
    /// On an end-of-generation token or after this many emitted tokens.
    Budget(usize),
}

impl StopPolicy {
    pub fn for_kind(kind: CallKind, limits: &GenerationLimits) -> Self {
        match kind {
            CallKind::Chat => StopPolicy::EndOfGeneration,
            CallKind::Completion => StopPolicy::Budget(limits.completion_extra_tokens),
        }
    }

    fn exhausted(self, emitted: usize) -> bool {
        matches!(self, StopPolicy::Budget(n) if emitted >= n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Priming,
    Decoding,
    Done,
    Failed,
}

/// One generation call against one session.
///
/// Owns the call's sampler chain; it is dropped with the loop on every exit
/// path. A failed call leaves the KV cache holding whatever was decoded
/// before the failure. After [`run`](Self::run) the loop reports `Done` or
/// `Failed` and refuses to run again.
pub struct GenerationLoop<'s> {
    session: &'s mut Session,
    chain: SamplerChain,
    kind: CallKind,
    stop: StopPolicy,
    max_piece_bytes: usize,
    state: LoopState,
    emitted: usize,
}

impl<'s> GenerationLoop<'s> {
    pub fn new(
        session: &'s mut Session,
        chain: SamplerChain,
        kind: CallKind,
        limits: &GenerationLimits,
    ) -> Self {
        Self {
            session,
            chain,
            kind,
            stop: StopPolicy::for_kind(kind, limits),
            max_piece_bytes: limits.max_piece_bytes,
            state: LoopState::Priming,
            emitted: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Tokens emitted so far, including those of a failed run.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Run to `Done` or `Failed` and return the emitted text.
    pub fn run(&mut self, prompt: &[TokenId], telemetry: Arc<dyn TelemetryHook>) -> Result<String> {
        if self.state != LoopState::Priming {
            return Err(LlamaError::Generation(format!(
                "generation already ran to {:?}",
                self.state
            )));
        }
        let span = tracing::debug_span!(
            "generate",
            handle = %self.session.handle(),
            session = %self.session.id(),
            kind = %self.kind,
        );
        let _enter = span.enter();

        let mut timer = InferenceTimer::new(self.kind, prompt.len(), telemetry);
        match self.drive(prompt, &mut timer) {
            Ok(text) => {
                self.state = LoopState::Done;
                tracing::debug!(
                    emitted = self.emitted,
                    used = self.session.used_cells(),
                    "generation done"
                );
                timer.finish();
                Ok(text)
            }
            Err(e) => {
                self.state = LoopState::Failed;
                tracing::warn!(
                    error = %e,
                    emitted = self.emitted,
                    used = self.session.used_cells(),
                    "generation failed"
                );
                Err(e)
            }
        }
    }

    fn drive(&mut self, prompt: &[TokenId], timer: &mut InferenceTimer) -> Result<String> {
        if prompt.is_empty() {
            return Err(LlamaError::Tokenization(
                "Prompt produced no tokens".to_string(),
            ));
        }

        let n_batch = self.session.n_batch();
        tracing::debug!(prompt_tokens = prompt.len(), n_batch, "priming");
        let mut logits = Vec::new();
        for chunk in prompt.chunks(n_batch) {
            logits = self.session.decode(chunk)?;
        }
        timer.mark_primed();

        self.state = LoopState::Decoding;
        tracing::debug!(used = self.session.used_cells(), "decoding");

        let model = Arc::clone(self.session.model());
        let tokenizer = model.tokenizer();
        let mut text = DecodingState::new();
        loop {
            let token = self
                .chain
                .sample(&logits)
                .map_err(|e| LlamaError::Generation(format!("Failed to sample: {e}")))?;
            if tokenizer.is_eog(token) {
                break;
            }
            tokenizer
                .decode_token(token, self.max_piece_bytes, &mut text)
                .map_err(|e| detokenization_error(token, e))?;
            self.emitted += 1;
            timer.mark_emitted();
            if self.stop.exhausted(self.emitted) {
                break;
            }
            logits = self.session.decode(&[token])?;
        }

        let out = text.finish();
        if out.is_empty() {
            return Err(LlamaError::Generation(
                "Unable to generate response".to_string(),
            ));
        }
        Ok(out)
    }
}

fn detokenization_error(token: TokenId, e: TokenizerError) -> LlamaError {
    let reason = match e {
        TokenizerError::PieceTooLong { len, max, .. } => {
            format!("piece is {len} bytes, limit is {max}")
        }
        other => other.to_string(),
    };
    LlamaError::Detokenization { token, reason }
}
