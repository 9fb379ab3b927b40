//! Transformer building blocks for single-token decoding.

use crate::{ModelError, ModelResult};

/// Row-major weight matrix. `rows` is the output dimension (GGUF `ne1`),
/// `cols` the input dimension (GGUF `ne0`).
#[derive(Debug, Clone)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> ModelResult<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(ModelError::Malformed(format!(
                "matrix {rows}x{cols} built from {} values",
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn row(&self, r: usize) -> &[f32] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// `W · x`.
    pub fn matvec(&self, x: &[f32]) -> Vec<f32> {
        debug_assert_eq!(x.len(), self.cols);
        self.data
            .chunks_exact(self.cols)
            .map(|row| row.iter().zip(x).map(|(w, v)| w * v).sum())
            .collect()
    }
}

/// Root Mean Square Layer Normalization.
///
/// Formula: `y = x / RMS(x) * weight`, where RMS(x) = sqrt(mean(x^2) + eps)
///
/// # References
/// - Huang et al. (2021): "Root Mean Square Layer Normalization"
#[derive(Debug, Clone)]
pub struct RmsNorm {
    /// Learnable scale parameter, shape: [n_embd]
    pub weight: Vec<f32>,
    pub eps: f32,
}

impl RmsNorm {
    pub fn new(weight: Vec<f32>, eps: f32) -> Self {
        Self { weight, eps }
    }

    pub fn forward(&self, x: &[f32]) -> Vec<f32> {
        let mean_sq: f32 = x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32;
        let scale = 1.0 / (mean_sq + self.eps).sqrt();
        x.iter()
            .zip(&self.weight)
            .map(|(v, w)| v * scale * w)
            .collect()
    }
}

/// Rotary Position Embeddings (RoPE), rotating adjacent `(2i, 2i+1)` pairs.
///
/// # References
/// - Su et al. (2021): "RoFormer: Enhanced Transformer with Rotary Position Embedding"
#[derive(Debug, Clone)]
pub struct Rope {
    pub head_dim: usize,
    /// Inverse frequencies: [1/base^(2i/dim) for i in 0..dim/2]
    pub inv_freq: Vec<f32>,
}

impl Rope {
    pub fn new(head_dim: usize, base: f32) -> Self {
        let inv_freq = (0..head_dim / 2)
            .map(|i| 1.0 / base.powf(2.0 * i as f32 / head_dim as f32))
            .collect();
        Self { head_dim, inv_freq }
    }

    /// Rotate every head of `x` (`[n_heads, head_dim]`) for position `pos`.
    pub fn apply(&self, x: &mut [f32], pos: usize) {
        for head in x.chunks_exact_mut(self.head_dim) {
            for (i, &freq) in self.inv_freq.iter().enumerate() {
                let (sin, cos) = (pos as f32 * freq).sin_cos();
                let a = head[2 * i];
                let b = head[2 * i + 1];
                head[2 * i] = a * cos - b * sin;
                head[2 * i + 1] = a * sin + b * cos;
            }
        }
    }
}

pub fn softmax_in_place(x: &mut [f32]) {
    let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in x.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in x.iter_mut() {
            *v /= sum;
        }
    }
}

/// Causal attention of one query over `n_past` cached positions.
///
/// `keys`/`values` are `[n_past, n_head_kv, head_dim]`; each group of
/// `n_head / n_head_kv` query heads shares one KV head.
pub fn attention(
    q: &[f32],
    keys: &[f32],
    values: &[f32],
    n_head: usize,
    n_head_kv: usize,
    head_dim: usize,
) -> Vec<f32> {
    let kv_stride = n_head_kv * head_dim;
    let n_past = keys.len() / kv_stride;
    let group = n_head / n_head_kv;
    let scale = 1.0 / (head_dim as f32).sqrt();

    let mut out = vec![0.0; n_head * head_dim];
    let mut scores = vec![0.0; n_past];
    for h in 0..n_head {
        let kv_h = h / group;
        let qh = &q[h * head_dim..(h + 1) * head_dim];
        for (t, score) in scores.iter_mut().enumerate() {
            let k = &keys[t * kv_stride + kv_h * head_dim..][..head_dim];
            *score = qh.iter().zip(k).map(|(a, b)| a * b).sum::<f32>() * scale;
        }
        softmax_in_place(&mut scores);
        let oh = &mut out[h * head_dim..(h + 1) * head_dim];
        for (t, &p) in scores.iter().enumerate() {
            let v = &values[t * kv_stride + kv_h * head_dim..][..head_dim];
            for (o, &vv) in oh.iter_mut().zip(v) {
                *o += p * vv;
            }
        }
    }
    out
}

#[inline]
pub fn silu(x: f32) -> f32 {
    x / (1.0 + (-x).exp())
}

/// SwiGLU feed-forward: `down(silu(gate(x)) * up(x))`.
pub fn swiglu(x: &[f32], gate: &Matrix, up: &Matrix, down: &Matrix) -> Vec<f32> {
    let g = gate.matvec(x);
    let u = up.matvec(x);
    let h: Vec<f32> = g.iter().zip(&u).map(|(&g, &u)| silu(g) * u).collect();
    down.matvec(&h)
}

pub fn add_in_place(acc: &mut [f32], x: &[f32]) {
    for (a, b) in acc.iter_mut().zip(x) {
        *a += b;
    }
}
