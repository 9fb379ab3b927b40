//! The candidate set a sampler chain works on.

use llama_engine::TokenId;

use crate::{SamplingError, SamplingResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenData {
    pub id: TokenId,
    pub logit: f32,
    /// Probability, valid after [`Candidates::softmax`].
    pub p: f32,
}

/// Candidate tokens for one sampling step.
///
/// Starts as one entry per vocabulary id in id order. Filtering stages shrink
/// it; once sorted it stays sorted by descending logit.
#[derive(Debug, Clone)]
pub struct Candidates {
    data: Vec<TokenData>,
    sorted: bool,
    selected: Option<usize>,
}

impl Candidates {
    pub fn from_logits(logits: &[f32]) -> SamplingResult<Self> {
        if logits.is_empty() {
            return Err(SamplingError::InvalidLogits);
        }
        let data = logits
            .iter()
            .enumerate()
            .map(|(i, &logit)| TokenData {
                id: i as TokenId,
                logit,
                p: 0.0,
            })
            .collect();
        Ok(Self {
            data,
            sorted: false,
            selected: None,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[TokenData] {
        &self.data
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Stable descending sort by logit; ties keep id order.
    pub fn sort_descending(&mut self) {
        if !self.sorted {
            self.data.sort_by(|a, b| b.logit.total_cmp(&a.logit));
            self.sorted = true;
        }
    }

    /// Sort, then fill `p` with softmax over the logits.
    pub fn softmax(&mut self) {
        self.sort_descending();
        let Some(max) = self.data.first().map(|d| d.logit) else {
            return;
        };
        let mut sum = 0.0;
        for d in &mut self.data {
            d.p = (d.logit - max).exp();
            sum += d.p;
        }
        if sum > 0.0 {
            for d in &mut self.data {
                d.p /= sum;
            }
        }
    }

    /// Keep the first `n` candidates.
    pub fn truncate(&mut self, n: usize) {
        self.data.truncate(n);
    }

    pub(crate) fn data_mut(&mut self) -> &mut [TokenData] {
        &mut self.data
    }

    /// Logits changed in place; any earlier ordering no longer holds.
    pub(crate) fn mark_unsorted(&mut self) {
        self.sorted = false;
    }

    pub fn select(&mut self, index: usize) {
        self.selected = Some(index);
    }

    /// The selected token, if a terminal stage ran.
    pub fn selected(&self) -> Option<TokenId> {
        self.selected
            .and_then(|i| self.data.get(i))
            .map(|d| d.id)
    }
}
