//! Ordered sampler chains.

use llama_engine::TokenId;

use crate::candidates::Candidates;
use crate::stages::SamplerStage;
use crate::{SamplingError, SamplingResult};

/// An ordered list of stages ending in a selecting stage.
///
/// A chain is built for one generation call and dropped with it; the
/// penalty history it accumulates is that call's accepted tokens.
#[derive(Default)]
pub struct SamplerChain {
    stages: Vec<Box<dyn SamplerStage>>,
}

impl std::fmt::Debug for SamplerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.stage_names()).finish()
    }
}

impl SamplerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: impl SamplerStage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn push(&mut self, stage: Box<dyn SamplerStage>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Whether the last stage selects a token.
    pub fn is_complete(&self) -> bool {
        self.stages.last().is_some_and(|s| s.is_terminal())
    }

    /// Pick the next token from `logits` and record it as accepted.
    pub fn sample(&mut self, logits: &[f32]) -> SamplingResult<TokenId> {
        let mut candidates = Candidates::from_logits(logits)?;
        for stage in &mut self.stages {
            stage.apply(&mut candidates);
            if candidates.is_empty() {
                return Err(SamplingError::NoValidTokens);
            }
        }
        let token = candidates.selected().ok_or(SamplingError::NoSelection)?;
        self.accept(token);
        Ok(token)
    }

    /// Feed a token to every stage's history without sampling.
    pub fn accept(&mut self, token: TokenId) {
        for stage in &mut self.stages {
            stage.accept(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{Greedy, Penalties, Temperature, TopK};

    #[test]
    fn greedy_chain_picks_argmax() {
        let mut chain = SamplerChain::new().with(Greedy);
        assert_eq!(chain.sample(&[1.0, 10.0, 2.0]).unwrap(), 1);
    }

    #[test]
    fn chain_without_terminal_stage_fails() {
        let mut chain = SamplerChain::new().with(TopK::new(2));
        assert!(!chain.is_complete());
        assert_eq!(
            chain.sample(&[1.0, 2.0]).unwrap_err(),
            SamplingError::NoSelection
        );
    }

    #[test]
    fn accepted_tokens_feed_penalties() {
        let mut chain = SamplerChain::new()
            .with(Penalties::new(10.0, 0.0, 0.0))
            .with(Greedy);
        let logits = [2.0, 1.5];
        assert_eq!(chain.sample(&logits).unwrap(), 0);
        // Token 0 is now penalized: 2.0 / 10 < 1.5.
        assert_eq!(chain.sample(&logits).unwrap(), 1);
    }

    #[test]
    fn stage_names_in_order() {
        let chain = SamplerChain::new()
            .with(TopK::new(5))
            .with(Temperature::new(0.7))
            .with(Greedy);
        assert_eq!(chain.stage_names(), vec!["top-k", "temperature", "greedy"]);
        assert!(chain.is_complete());
        assert_eq!(format!("{chain:?}"), r#"["top-k", "temperature", "greedy"]"#);
    }

    #[test]
    fn empty_logits_error() {
        let mut chain = SamplerChain::new().with(Greedy);
        assert_eq!(chain.sample(&[]).unwrap_err(), SamplingError::InvalidLogits);
    }
}
