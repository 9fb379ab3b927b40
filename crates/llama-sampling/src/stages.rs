//! Sampler stages.
//!
//! Each stage rewrites the candidate set in place. Stages configured with a
//! neutral parameter leave the candidates untouched.

use std::collections::HashMap;

use llama_engine::TokenId;

use crate::candidates::Candidates;
use crate::SeededRng;

/// One step of a [`crate::SamplerChain`].
pub trait SamplerStage: Send {
    fn name(&self) -> &'static str;

    fn apply(&mut self, candidates: &mut Candidates);

    /// Observe the token the chain finally selected.
    fn accept(&mut self, _token: TokenId) {}

    /// Terminal stages select a token instead of transforming the set.
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Keep the `k` highest logits. `k <= 0` disables the stage.
#[derive(Debug, Clone)]
pub struct TopK {
    pub k: i32,
}

impl TopK {
    pub fn new(k: i32) -> Self {
        Self { k }
    }
}

impl SamplerStage for TopK {
    fn name(&self) -> &'static str {
        "top-k"
    }

    fn apply(&mut self, candidates: &mut Candidates) {
        if self.k <= 0 {
            return;
        }
        candidates.sort_descending();
        candidates.truncate(self.k as usize);
    }
}

/// Nucleus filtering: keep the smallest prefix whose probability mass
/// reaches `p`, and at least `min_keep` tokens. `p >= 1` disables the stage.
#[derive(Debug, Clone)]
pub struct TopP {
    pub p: f32,
    pub min_keep: usize,
}

impl TopP {
    pub fn new(p: f32, min_keep: usize) -> Self {
        Self { p, min_keep }
    }
}

impl SamplerStage for TopP {
    fn name(&self) -> &'static str {
        "top-p"
    }

    fn apply(&mut self, candidates: &mut Candidates) {
        if self.p >= 1.0 {
            return;
        }
        candidates.softmax();
        let mut cum = 0.0;
        let mut keep = candidates.len();
        for (i, d) in candidates.as_slice().iter().enumerate() {
            cum += d.p;
            if cum >= self.p && i + 1 >= self.min_keep {
                keep = i + 1;
                break;
            }
        }
        candidates.truncate(keep);
    }
}

/// Keep tokens whose probability is at least `p` times the top probability.
/// `p <= 0` disables the stage.
#[derive(Debug, Clone)]
pub struct MinP {
    pub p: f32,
    pub min_keep: usize,
}

impl MinP {
    pub fn new(p: f32, min_keep: usize) -> Self {
        Self { p, min_keep }
    }
}

impl SamplerStage for MinP {
    fn name(&self) -> &'static str {
        "min-p"
    }

    fn apply(&mut self, candidates: &mut Candidates) {
        if self.p <= 0.0 || candidates.is_empty() {
            return;
        }
        candidates.sort_descending();
        // p_i >= p * p_max  <=>  logit_i >= logit_max + ln(p)
        let threshold = candidates.as_slice()[0].logit + self.p.ln();
        let keep = candidates
            .as_slice()
            .iter()
            .take_while(|d| d.logit >= threshold)
            .count();
        candidates.truncate(keep.max(self.min_keep));
    }
}

/// Divide logits by `t`. `t <= 0` keeps only the highest logit live.
#[derive(Debug, Clone)]
pub struct Temperature {
    pub t: f32,
}

impl Temperature {
    pub fn new(t: f32) -> Self {
        Self { t }
    }
}

impl SamplerStage for Temperature {
    fn name(&self) -> &'static str {
        "temperature"
    }

    fn apply(&mut self, candidates: &mut Candidates) {
        let data = candidates.data_mut();
        if self.t <= 0.0 {
            let mut best = 0;
            for (i, d) in data.iter().enumerate() {
                if d.logit > data[best].logit {
                    best = i;
                }
            }
            for (i, d) in data.iter_mut().enumerate() {
                if i != best {
                    d.logit = f32::NEG_INFINITY;
                }
            }
            return;
        }
        for d in data.iter_mut() {
            d.logit /= self.t;
        }
    }
}

/// Repetition, frequency and presence penalties over accepted tokens.
///
/// For a token seen `n > 0` times: a positive logit is divided by `repeat`,
/// a non-positive one multiplied by it, then `n * frequency + presence` is
/// subtracted. `repeat == 1` with both other penalties zero disables the stage.
#[derive(Debug, Clone)]
pub struct Penalties {
    pub repeat: f32,
    pub frequency: f32,
    pub presence: f32,
    counts: HashMap<TokenId, u32>,
}

impl Penalties {
    pub fn new(repeat: f32, frequency: f32, presence: f32) -> Self {
        Self {
            repeat,
            frequency,
            presence,
            counts: HashMap::new(),
        }
    }

    pub fn count(&self, token: TokenId) -> u32 {
        self.counts.get(&token).copied().unwrap_or(0)
    }

    /// Repetition scaling only applies to a finite factor above zero; any
    /// other value (0 included) disables it rather than boosting past tokens.
    fn scales(&self) -> bool {
        self.repeat.is_finite() && self.repeat > 0.0 && self.repeat != 1.0
    }

    fn offset(&self, n: u32) -> f32 {
        let frequency = if self.frequency.is_finite() { self.frequency } else { 0.0 };
        let presence = if self.presence.is_finite() { self.presence } else { 0.0 };
        n as f32 * frequency + presence
    }

    fn is_neutral(&self) -> bool {
        !self.scales() && self.offset(1) == 0.0 && self.offset(2) == 0.0
    }
}

impl SamplerStage for Penalties {
    fn name(&self) -> &'static str {
        "penalties"
    }

    fn apply(&mut self, candidates: &mut Candidates) {
        if self.is_neutral() || self.counts.is_empty() {
            return;
        }
        for d in candidates.data_mut() {
            let Some(&n) = self.counts.get(&d.id) else {
                continue;
            };
            if self.scales() {
                if d.logit <= 0.0 {
                    d.logit *= self.repeat;
                } else {
                    d.logit /= self.repeat;
                }
            }
            d.logit -= self.offset(n);
        }
        candidates.mark_unsorted();
    }

    fn accept(&mut self, token: TokenId) {
        *self.counts.entry(token).or_insert(0) += 1;
    }
}

/// Select the highest logit; the first one on ties.
#[derive(Debug, Clone, Default)]
pub struct Greedy;

impl SamplerStage for Greedy {
    fn name(&self) -> &'static str {
        "greedy"
    }

    fn apply(&mut self, candidates: &mut Candidates) {
        let data = candidates.as_slice();
        if data.is_empty() {
            return;
        }
        let mut best = 0;
        for (i, d) in data.iter().enumerate().skip(1) {
            if d.logit > data[best].logit {
                best = i;
            }
        }
        candidates.select(best);
    }

    fn is_terminal(&self) -> bool {
        true
    }
}

/// Draw from the softmax distribution with a seeded RNG.
#[derive(Debug, Clone)]
pub struct Distribution {
    rng: SeededRng,
}

impl Distribution {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SeededRng::new(seed),
        }
    }
}

impl SamplerStage for Distribution {
    fn name(&self) -> &'static str {
        "dist"
    }

    fn apply(&mut self, candidates: &mut Candidates) {
        if candidates.is_empty() {
            return;
        }
        candidates.softmax();
        let r = self.rng.next_f32();
        let mut cum = 0.0;
        let mut chosen = None;
        for (i, d) in candidates.as_slice().iter().enumerate() {
            cum += d.p;
            if r < cum {
                chosen = Some(i);
                break;
            }
        }
        // Rounding can leave the cumulative mass just under r.
        let fallback = || {
            candidates
                .as_slice()
                .iter()
                .rposition(|d| d.p > 0.0)
                .unwrap_or(0)
        };
        let index = chosen.unwrap_or_else(fallback);
        candidates.select(index);
    }

    fn is_terminal(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(c: &Candidates) -> Vec<TokenId> {
        c.as_slice().iter().map(|d| d.id).collect()
    }

    fn logits_of(c: &Candidates) -> Vec<f32> {
        let mut by_id: Vec<(TokenId, f32)> = c.as_slice().iter().map(|d| (d.id, d.logit)).collect();
        by_id.sort_by_key(|(id, _)| *id);
        by_id.into_iter().map(|(_, l)| l).collect()
    }

    #[test]
    fn top_k_keeps_highest() {
        let mut c = Candidates::from_logits(&[1.0, 10.0, 2.0, 0.5, 3.0]).unwrap();
        TopK::new(2).apply(&mut c);
        assert_eq!(ids(&c), vec![1, 4]);
    }

    #[test]
    fn top_k_non_positive_is_noop() {
        for k in [0, -1] {
            let mut c = Candidates::from_logits(&[1.0, 2.0, 3.0]).unwrap();
            TopK::new(k).apply(&mut c);
            assert_eq!(ids(&c), vec![0, 1, 2]);
            assert!(!c.is_sorted());
        }
    }

    #[test]
    fn top_p_cuts_at_mass() {
        // probs ~ [0.5, 0.3, 0.15, 0.05]
        let logits: Vec<f32> = [0.5f32, 0.3, 0.15, 0.05].iter().map(|p| p.ln()).collect();
        let mut c = Candidates::from_logits(&logits).unwrap();
        TopP::new(0.75, 1).apply(&mut c);
        assert_eq!(ids(&c), vec![0, 1]);
    }

    #[test]
    fn top_p_respects_min_keep() {
        let logits: Vec<f32> = [0.9f32, 0.05, 0.05].iter().map(|p| p.ln()).collect();
        let mut c = Candidates::from_logits(&logits).unwrap();
        TopP::new(0.5, 2).apply(&mut c);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn top_p_one_is_noop() {
        let mut c = Candidates::from_logits(&[1.0, 2.0]).unwrap();
        TopP::new(1.0, 1).apply(&mut c);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn min_p_drops_unlikely_tokens() {
        // probs relative to max: 1.0, 0.5, 0.04
        let logits = [0.0f32, 0.5f32.ln(), 0.04f32.ln()];
        let mut c = Candidates::from_logits(&logits).unwrap();
        MinP::new(0.1, 1).apply(&mut c);
        assert_eq!(ids(&c), vec![0, 1]);
    }

    #[test]
    fn min_p_zero_is_noop() {
        let mut c = Candidates::from_logits(&[0.0, -100.0]).unwrap();
        MinP::new(0.0, 1).apply(&mut c);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn temperature_scales_logits() {
        let mut c = Candidates::from_logits(&[1.0, 2.0]).unwrap();
        Temperature::new(0.5).apply(&mut c);
        assert_eq!(logits_of(&c), vec![2.0, 4.0]);
    }

    #[test]
    fn zero_temperature_keeps_only_max() {
        let mut c = Candidates::from_logits(&[1.0, 3.0, 2.0]).unwrap();
        Temperature::new(0.0).apply(&mut c);
        let l = logits_of(&c);
        assert_eq!(l[1], 3.0);
        assert!(l[0].is_infinite() && l[2].is_infinite());
    }

    #[test]
    fn penalties_follow_sign_rules() {
        let mut p = Penalties::new(2.0, 0.5, 0.25);
        p.accept(0);
        p.accept(1);
        p.accept(1);
        let mut c = Candidates::from_logits(&[4.0, -1.0, 3.0]).unwrap();
        p.apply(&mut c);
        let l = logits_of(&c);
        // 4 / 2 - (1 * 0.5 + 0.25)
        assert!((l[0] - 1.25).abs() < 1e-6);
        // -1 * 2 - (2 * 0.5 + 0.25)
        assert!((l[1] + 3.25).abs() < 1e-6);
        assert_eq!(l[2], 3.0);
        assert_eq!(p.count(1), 2);
    }

    #[test]
    fn neutral_penalties_are_noop() {
        let mut p = Penalties::new(1.0, 0.0, 0.0);
        p.accept(0);
        let mut c = Candidates::from_logits(&[4.0, 1.0]).unwrap();
        p.apply(&mut c);
        assert_eq!(logits_of(&c), vec![4.0, 1.0]);
    }

    #[test]
    fn non_positive_repeat_penalty_leaves_logits_alone() {
        for repeat in [0.0, -1.5, f32::NAN, f32::INFINITY] {
            let mut p = Penalties::new(repeat, 0.0, 0.0);
            p.accept(0);
            p.accept(1);
            let mut c = Candidates::from_logits(&[0.5, -2.0, 9.0]).unwrap();
            p.apply(&mut c);
            assert_eq!(logits_of(&c), vec![0.5, -2.0, 9.0], "repeat = {repeat}");
        }
    }

    #[test]
    fn disabled_repeat_keeps_frequency_offset() {
        let mut p = Penalties::new(0.0, 1.0, 0.0);
        p.accept(0);
        let mut c = Candidates::from_logits(&[4.0, 1.0]).unwrap();
        p.apply(&mut c);
        assert_eq!(logits_of(&c), vec![3.0, 1.0]);
    }

    #[test]
    fn greedy_picks_first_max() {
        let mut c = Candidates::from_logits(&[1.0, 5.0, 5.0, 2.0]).unwrap();
        Greedy.apply(&mut c);
        assert_eq!(c.selected(), Some(1));
    }

    #[test]
    fn distribution_is_reproducible() {
        let logits = [0.1, 0.2, 0.3, 0.4];
        let draw = |seed| {
            let mut d = Distribution::new(seed);
            (0..20)
                .map(|_| {
                    let mut c = Candidates::from_logits(&logits).unwrap();
                    d.apply(&mut c);
                    c.selected().unwrap()
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(42), draw(42));
        let distinct: std::collections::HashSet<_> = draw(7).into_iter().collect();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn distribution_with_single_live_token() {
        let mut c = Candidates::from_logits(&[f32::NEG_INFINITY, 0.0, f32::NEG_INFINITY]).unwrap();
        Distribution::new(3).apply(&mut c);
        assert_eq!(c.selected(), Some(1));
    }
}
