//! [`NativeEngine`]: the in-process [`LlamaEngine`].

use llama_engine::{
    ChatMessage, LlamaEngine, Result, SamplingConfig, SessionHandle, SessionSpec, TokenId,
};

use crate::chains::chain_for;
use crate::config::EngineConfig;
use crate::generate::GenerationLoop;
use crate::session::Session;
use crate::table::SessionTable;
use crate::telemetry::CallKind;

/// Runs every operation on the calling thread against a [`SessionTable`].
#[derive(Debug, Default)]
pub struct NativeEngine {
    table: SessionTable,
    config: EngineConfig,
}

impl NativeEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            table: SessionTable::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn table(&self) -> &SessionTable {
        &self.table
    }

    /// Tokenize `text` exactly as a generation call on `handle` would.
    pub fn tokenize(&self, handle: SessionHandle, text: &str) -> Result<Vec<TokenId>> {
        self.table.with_session(handle, |s| s.tokenize(text))
    }

    /// KV cells the session has filled so far.
    pub fn used_cells(&self, handle: SessionHandle) -> Result<usize> {
        self.table.with_session(handle, |s| Ok(s.used_cells()))
    }

    fn generate(
        &self,
        session: &mut Session,
        kind: CallKind,
        prompt: &[TokenId],
        sampling: &SamplingConfig,
    ) -> Result<String> {
        let chain = chain_for(kind, sampling);
        let mut generation = GenerationLoop::new(session, chain, kind, &self.config.limits);
        generation.run(prompt, self.config.telemetry.clone())
    }
}

impl LlamaEngine for NativeEngine {
    fn create_session(&self, spec: &SessionSpec) -> Result<SessionHandle> {
        self.table.create(spec)
    }

    fn count_tokens(&self, handle: SessionHandle, text: &str) -> Result<usize> {
        self.table.with_session(handle, |s| s.count_tokens(text))
    }

    fn apply_template(&self, handle: SessionHandle, messages: &[ChatMessage]) -> Result<String> {
        self.table.with_session(handle, |s| s.apply_template(messages))
    }

    fn generate_chat(
        &self,
        handle: SessionHandle,
        messages: &[ChatMessage],
        sampling: &SamplingConfig,
    ) -> Result<String> {
        sampling.validate()?;
        self.table.with_session(handle, |s| {
            let prompt = s.apply_template(messages)?;
            let tokens = s.tokenize(&prompt)?;
            self.generate(s, CallKind::Chat, &tokens, sampling)
        })
    }

    fn generate_completion(
        &self,
        handle: SessionHandle,
        prompt: &str,
        sampling: &SamplingConfig,
    ) -> Result<String> {
        sampling.validate()?;
        self.table.with_session(handle, |s| {
            let tokens = s.tokenize(prompt)?;
            self.generate(s, CallKind::Completion, &tokens, sampling)
        })
    }

    fn release_session(&self, handle: SessionHandle) -> Result<()> {
        self.table.release(handle)
    }
}
