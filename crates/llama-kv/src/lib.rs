//! # llama-kv
//!
//! Per-session KV cache for llama-textgen.
//!
//! Supports:
//! - **Append-only cells**: one cell per decoded position; the used-cell count
//!   only grows for the lifetime of the cache
//! - **Multi-layer**: [`SessionKVCache`] owns K/V for all transformer layers and a
//!   single synchronized used-cell counter
//! - **Fallible allocation**: construction reports oversized requests instead of aborting
//! - **Memory tracking**: byte accounting for both allocated and active memory
//! - **Type safety**: [`KVShape`] enforces valid dimensions
//!
//! Decoding a token writes that token's K/V into the pending cell of every layer
//! (layer by layer, since each layer's K/V depends on the previous layer's
//! output), then commits the cell once the whole forward pass succeeded.

use std::fmt;

/// Represents tensor shape: `[seq_len, n_kv_heads, head_dim]`.
///
/// Used for shape validation and memory calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KVShape {
    pub seq_len: usize,
    pub n_kv_heads: usize,
    pub head_dim: usize,
}

impl KVShape {
    pub fn new(seq_len: usize, n_kv_heads: usize, head_dim: usize) -> Self {
        Self {
            seq_len,
            n_kv_heads,
            head_dim,
        }
    }

    /// Elements per K (or V) buffer; `None` on overflow.
    pub fn total_elements(&self) -> Option<usize> {
        self.seq_len
            .checked_mul(self.n_kv_heads)?
            .checked_mul(self.head_dim)
    }

    pub fn cell_elements(&self) -> usize {
        self.n_kv_heads * self.head_dim
    }

    pub fn capacity_bytes(&self, bytes_per_element: usize) -> Option<usize> {
        self.total_elements()?.checked_mul(bytes_per_element)
    }
}

impl fmt::Display for KVShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[seq:{}, kv_heads:{}, dim:{}]",
            self.seq_len, self.n_kv_heads, self.head_dim
        )
    }
}

/// Error type for KV cache operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KVError {
    #[error("KV cache capacity exceeded: {seq_len} > {max}")]
    CapacityExceeded { seq_len: usize, max: usize },

    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("Layer index {index} out of range for {n_layers} layers")]
    LayerOutOfRange { index: usize, n_layers: usize },

    #[error("Cannot allocate KV cache {shape} x {n_layers} layers: {reason}")]
    Allocation {
        shape: KVShape,
        n_layers: usize,
        reason: String,
    },
}

pub type KVResult<T> = Result<T, KVError>;

/// Single transformer layer's K and V cells.
///
/// # Invariants
/// - K and V buffers always hold `capacity * n_kv_heads * head_dim` elements
/// - Cells are addressed by position; the owning [`SessionKVCache`] tracks how many are in use
#[derive(Debug, Clone)]
pub struct LayerKVCache {
    /// K cells, flattened `[capacity, n_kv_heads, head_dim]`.
    k: Vec<f32>,
    /// V cells, same layout as `k`.
    v: Vec<f32>,
    capacity: usize,
    n_kv_heads: usize,
    head_dim: usize,
}

impl LayerKVCache {
    /// Allocate one layer, reporting (rather than aborting on) allocation failure.
    pub fn try_new(capacity: usize, n_kv_heads: usize, head_dim: usize) -> KVResult<Self> {
        let shape = KVShape::new(capacity, n_kv_heads, head_dim);
        let alloc_err = |reason: String| KVError::Allocation {
            shape,
            n_layers: 1,
            reason,
        };
        let len = shape
            .total_elements()
            .ok_or_else(|| alloc_err("element count overflows usize".to_string()))?;

        let mut k = Vec::new();
        k.try_reserve_exact(len)
            .map_err(|e| alloc_err(e.to_string()))?;
        k.resize(len, 0.0);
        let mut v = Vec::new();
        v.try_reserve_exact(len)
            .map_err(|e| alloc_err(e.to_string()))?;
        v.resize(len, 0.0);

        Ok(Self {
            k,
            v,
            capacity,
            n_kv_heads,
            head_dim,
        })
    }

    pub fn cell_elements(&self) -> usize {
        self.n_kv_heads * self.head_dim
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write K and V for the token at `pos`.
    ///
    /// # Errors
    /// - `CapacityExceeded`: if `pos` is outside the cache
    /// - `ShapeMismatch`: if either slice is not `n_kv_heads * head_dim` long
    pub fn write_cell(&mut self, pos: usize, k_token: &[f32], v_token: &[f32]) -> KVResult<()> {
        let expected = self.cell_elements();
        if k_token.len() != expected || v_token.len() != expected {
            let got = if k_token.len() != expected {
                k_token.len()
            } else {
                v_token.len()
            };
            return Err(KVError::ShapeMismatch { expected, got });
        }
        if pos >= self.capacity {
            return Err(KVError::CapacityExceeded {
                seq_len: pos + 1,
                max: self.capacity,
            });
        }

        let offset = pos * expected;
        self.k[offset..offset + expected].copy_from_slice(k_token);
        self.v[offset..offset + expected].copy_from_slice(v_token);
        Ok(())
    }

    /// K for the first `len` cells (clamped to capacity).
    pub fn keys(&self, len: usize) -> &[f32] {
        &self.k[..len.min(self.capacity) * self.cell_elements()]
    }

    /// V for the first `len` cells (clamped to capacity).
    pub fn values(&self, len: usize) -> &[f32] {
        &self.v[..len.min(self.capacity) * self.cell_elements()]
    }

    /// Total memory allocated for K and V (in bytes).
    pub fn memory_bytes(&self) -> usize {
        (self.k.len() + self.v.len()) * std::mem::size_of::<f32>()
    }

    /// Memory of the first `used` cells of K and V.
    pub fn active_memory_bytes(&self, used: usize) -> usize {
        used.min(self.capacity) * self.cell_elements() * 2 * std::mem::size_of::<f32>()
    }
}

/// Session-level KV cache managing all transformer layers.
///
/// All layers share one used-cell counter. There is no rewind: cells are only
/// ever committed, never released, until the cache itself is dropped.
#[derive(Debug, Clone)]
pub struct SessionKVCache {
    layers: Vec<LayerKVCache>,
    used: usize,
    capacity: usize,
}

impl SessionKVCache {
    /// Allocate a cache of `capacity` cells for `n_layers` layers.
    pub fn try_new(
        n_layers: usize,
        capacity: usize,
        n_kv_heads: usize,
        head_dim: usize,
    ) -> KVResult<Self> {
        let shape = KVShape::new(capacity, n_kv_heads, head_dim);
        if n_layers == 0 {
            return Err(KVError::Allocation {
                shape,
                n_layers,
                reason: "cache needs at least one layer".to_string(),
            });
        }
        let mut layers = Vec::new();
        layers
            .try_reserve_exact(n_layers)
            .map_err(|e| KVError::Allocation {
                shape,
                n_layers,
                reason: e.to_string(),
            })?;
        for _ in 0..n_layers {
            let layer = LayerKVCache::try_new(capacity, n_kv_heads, head_dim).map_err(|e| {
                match e {
                    KVError::Allocation { reason, .. } => KVError::Allocation {
                        shape,
                        n_layers,
                        reason,
                    },
                    other => other,
                }
            })?;
            layers.push(layer);
        }

        Ok(Self {
            layers,
            used: 0,
            capacity,
        })
    }

    /// Number of committed cells.
    pub fn used_cells(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Whether `pending` more cells fit.
    pub fn fits(&self, pending: usize) -> bool {
        pending <= self.remaining()
    }

    /// Position the next decoded token will occupy.
    pub fn next_position(&self) -> usize {
        self.used
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, index: usize) -> Option<&LayerKVCache> {
        self.layers.get(index)
    }

    /// Write the pending cell of one layer.
    pub fn write_pending(&mut self, layer: usize, k_token: &[f32], v_token: &[f32]) -> KVResult<()> {
        let n_layers = self.layers.len();
        let pos = self.used;
        self.layers
            .get_mut(layer)
            .ok_or(KVError::LayerOutOfRange {
                index: layer,
                n_layers,
            })?
            .write_cell(pos, k_token, v_token)
    }

    /// Mark the pending cell used in every layer.
    pub fn commit(&mut self) -> KVResult<()> {
        if self.used >= self.capacity {
            return Err(KVError::CapacityExceeded {
                seq_len: self.used + 1,
                max: self.capacity,
            });
        }
        self.used += 1;
        Ok(())
    }

    /// Total memory across all layers.
    pub fn memory_bytes(&self) -> usize {
        self.layers.iter().map(|l| l.memory_bytes()).sum()
    }

    /// Active memory across all layers (based on used cells).
    pub fn active_memory_bytes(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.active_memory_bytes(self.used))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_shape_total_elements() {
        let shape = KVShape::new(128, 8, 64);
        assert_eq!(shape.total_elements(), Some(128 * 8 * 64));
        assert_eq!(shape.cell_elements(), 8 * 64);
        assert_eq!(KVShape::new(usize::MAX, 2, 2).total_elements(), None);
    }

    #[test]
    fn kv_shape_display() {
        assert_eq!(KVShape::new(4, 2, 8).to_string(), "[seq:4, kv_heads:2, dim:8]");
    }

    #[test]
    fn layer_write_and_read_back() {
        let mut layer = LayerKVCache::try_new(4, 2, 2).unwrap();
        layer.write_cell(0, &[1.0, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0]).unwrap();
        layer.write_cell(1, &[9.0; 4], &[10.0; 4]).unwrap();
        assert_eq!(layer.keys(1), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(layer.values(2)[4..], [10.0; 4]);
    }

    #[test]
    fn layer_rejects_wrong_shape() {
        let mut layer = LayerKVCache::try_new(4, 2, 2).unwrap();
        let err = layer.write_cell(0, &[1.0; 3], &[1.0; 4]).unwrap_err();
        assert_eq!(err, KVError::ShapeMismatch { expected: 4, got: 3 });
    }

    #[test]
    fn layer_rejects_out_of_capacity_position() {
        let mut layer = LayerKVCache::try_new(2, 1, 2).unwrap();
        let err = layer.write_cell(2, &[0.0; 2], &[0.0; 2]).unwrap_err();
        assert_eq!(err, KVError::CapacityExceeded { seq_len: 3, max: 2 });
    }

    #[test]
    fn session_commit_advances_all_layers() {
        let mut cache = SessionKVCache::try_new(3, 4, 1, 2).unwrap();
        assert!(cache.is_empty());
        for layer in 0..3 {
            cache.write_pending(layer, &[1.0, 1.0], &[2.0, 2.0]).unwrap();
        }
        cache.commit().unwrap();
        assert_eq!(cache.used_cells(), 1);
        assert_eq!(cache.next_position(), 1);
        assert_eq!(cache.remaining(), 3);
        for layer in 0..3 {
            assert_eq!(cache.layer(layer).unwrap().keys(1), &[1.0, 1.0]);
        }
    }

    #[test]
    fn session_commit_past_capacity_fails() {
        let mut cache = SessionKVCache::try_new(1, 1, 1, 2).unwrap();
        cache.commit().unwrap();
        assert!(!cache.fits(1));
        assert_eq!(
            cache.commit().unwrap_err(),
            KVError::CapacityExceeded { seq_len: 2, max: 1 }
        );
        assert_eq!(cache.used_cells(), 1);
    }

    #[test]
    fn session_write_pending_bad_layer() {
        let mut cache = SessionKVCache::try_new(2, 4, 1, 2).unwrap();
        let err = cache.write_pending(5, &[0.0; 2], &[0.0; 2]).unwrap_err();
        assert_eq!(err, KVError::LayerOutOfRange { index: 5, n_layers: 2 });
    }

    #[test]
    fn zero_layers_rejected() {
        assert!(matches!(
            SessionKVCache::try_new(0, 4, 1, 2),
            Err(KVError::Allocation { .. })
        ));
    }

    #[test]
    fn oversized_cache_is_an_error_not_an_abort() {
        let err = SessionKVCache::try_new(2, usize::MAX / 2, 4, 64).unwrap_err();
        assert!(matches!(err, KVError::Allocation { n_layers: 2, .. }));
    }

    #[test]
    fn memory_accounting() {
        let mut cache = SessionKVCache::try_new(2, 8, 2, 4).unwrap();
        let per_layer = 8 * 2 * 4 * 2 * 4;
        assert_eq!(cache.memory_bytes(), 2 * per_layer);
        assert_eq!(cache.active_memory_bytes(), 0);
        cache.commit().unwrap();
        assert_eq!(cache.active_memory_bytes(), 2 * (2 * 4 * 2 * 4));
    }
}
