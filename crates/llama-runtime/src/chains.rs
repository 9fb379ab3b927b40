//! The fixed sampler chain of each generation kind.
//!
//! Chat: penalties(repeat) → top-k → top-p → temperature → select.
//! Completion: penalties(repeat, freq, presence) → top-p → min-p → temperature → select.
//!
//! Selection is always last, so every transform shapes the pick. A positive
//! seed selects a seeded draw, anything else greedy.

use llama_engine::SamplingConfig;
use llama_sampling::{
    Distribution, Greedy, MinP, Penalties, SamplerChain, SamplerStage, Temperature, TopK, TopP,
};

use crate::telemetry::CallKind;

const MIN_KEEP: usize = 1;

pub fn chat_chain(cfg: &SamplingConfig) -> SamplerChain {
    let mut chain = SamplerChain::new()
        .with(Penalties::new(cfg.repetition_penalty, 0.0, 0.0))
        .with(TopK::new(cfg.top_k))
        .with(TopP::new(cfg.top_p, MIN_KEEP))
        .with(Temperature::new(cfg.temperature));
    chain.push(selector(cfg));
    chain
}

pub fn completion_chain(cfg: &SamplingConfig) -> SamplerChain {
    let mut chain = SamplerChain::new()
        .with(Penalties::new(
            cfg.repetition_penalty,
            cfg.frequency_penalty,
            cfg.presence_penalty,
        ))
        .with(TopP::new(cfg.top_p, MIN_KEEP))
        .with(MinP::new(cfg.min_p, MIN_KEEP))
        .with(Temperature::new(cfg.temperature));
    chain.push(selector(cfg));
    chain
}

pub fn chain_for(kind: CallKind, cfg: &SamplingConfig) -> SamplerChain {
    match kind {
        CallKind::Chat => chat_chain(cfg),
        CallKind::Completion => completion_chain(cfg),
    }
}

fn selector(cfg: &SamplingConfig) -> Box<dyn SamplerStage> {
    if cfg.is_greedy() {
        Box::new(Greedy)
    } else {
        Box::new(Distribution::new(cfg.seed.unsigned_abs()))
    }
}
