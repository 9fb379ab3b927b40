//! Model hyperparameters read from GGUF metadata.

use crate::gguf::GgufFile;
use crate::{ModelError, ModelResult};

/// Configuration of a LLaMA-family model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub n_vocab: usize,
    /// Hidden dimension.
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    /// KV heads (grouped-query attention when fewer than `n_head`).
    pub n_head_kv: usize,
    /// Feed-forward (intermediate) dimension.
    pub n_ff: usize,
    /// Context length the model was trained with.
    pub n_ctx_train: usize,
    pub rope_freq_base: f32,
    pub rms_norm_eps: f32,
}

pub const ARCHITECTURE: &str = "llama";

impl ModelConfig {
    pub fn from_gguf(file: &GgufFile) -> ModelResult<Self> {
        let arch = file
            .metadata("general.architecture")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ModelError::MissingMetadata("general.architecture".to_string()))?;
        if arch != ARCHITECTURE {
            return Err(ModelError::Unsupported(format!(
                "architecture {arch:?} (only {ARCHITECTURE:?} is supported)"
            )));
        }

        let usize_key = |key: &str| -> ModelResult<usize> {
            let full = format!("{ARCHITECTURE}.{key}");
            file.metadata(&full)
                .and_then(|v| v.as_u64())
                .map(|v| v as usize)
                .ok_or(ModelError::MissingMetadata(full))
        };

        let n_head = usize_key("attention.head_count")?;
        let n_head_kv = match usize_key("attention.head_count_kv") {
            Ok(n) => n,
            Err(ModelError::MissingMetadata(_)) => n_head,
            Err(e) => return Err(e),
        };
        let n_vocab = file
            .metadata("tokenizer.ggml.tokens")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .ok_or_else(|| ModelError::MissingMetadata("tokenizer.ggml.tokens".to_string()))?;
        let rms_key = format!("{ARCHITECTURE}.attention.layer_norm_rms_epsilon");
        let rms_norm_eps = file
            .metadata(&rms_key)
            .and_then(|v| v.as_f32())
            .ok_or(ModelError::MissingMetadata(rms_key))?;
        let rope_freq_base = file
            .metadata(&format!("{ARCHITECTURE}.rope.freq_base"))
            .and_then(|v| v.as_f32())
            .unwrap_or(10_000.0);

        let config = Self {
            n_vocab,
            n_embd: usize_key("embedding_length")?,
            n_layer: usize_key("block_count")?,
            n_head,
            n_head_kv,
            n_ff: usize_key("feed_forward_length")?,
            n_ctx_train: usize_key("context_length")?,
            rope_freq_base,
            rms_norm_eps,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ModelResult<()> {
        let bad = |msg: String| Err(ModelError::Malformed(msg));
        if self.n_vocab == 0 || self.n_embd == 0 || self.n_layer == 0 || self.n_ff == 0 {
            return bad(format!("degenerate dimensions in {self:?}"));
        }
        if self.n_head == 0 || self.n_embd % self.n_head != 0 {
            return bad(format!(
                "embedding length {} is not divisible by {} heads",
                self.n_embd, self.n_head
            ));
        }
        if self.n_head_kv == 0 || self.n_head % self.n_head_kv != 0 {
            return bad(format!(
                "{} heads cannot be grouped over {} KV heads",
                self.n_head, self.n_head_kv
            ));
        }
        if self.head_dim() % 2 != 0 {
            return bad(format!("head dimension {} must be even for RoPE", self.head_dim()));
        }
        Ok(())
    }

    /// Derived property: dimension per head
    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    /// Width of one K (or V) row across all KV heads.
    pub fn n_embd_kv(&self) -> usize {
        self.n_head_kv * self.head_dim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gguf::{GgufValue, GgufWriter};

    fn writer(arch: &str) -> GgufWriter {
        let mut w = GgufWriter::new();
        w.add_metadata("general.architecture", GgufValue::String(arch.into()))
            .add_metadata("llama.context_length", GgufValue::U32(4096))
            .add_metadata("llama.embedding_length", GgufValue::U32(64))
            .add_metadata("llama.block_count", GgufValue::U32(2))
            .add_metadata("llama.feed_forward_length", GgufValue::U32(128))
            .add_metadata("llama.attention.head_count", GgufValue::U32(8))
            .add_metadata("llama.attention.layer_norm_rms_epsilon", GgufValue::F32(1e-5))
            .add_metadata(
                "tokenizer.ggml.tokens",
                GgufValue::Array(vec![GgufValue::String("x".into()); 10]),
            );
        w
    }

    #[test]
    fn reads_llama_metadata_with_defaults() {
        let file = GgufFile::from_bytes(writer("llama").to_bytes()).unwrap();
        let config = ModelConfig::from_gguf(&file).unwrap();
        assert_eq!(config.n_vocab, 10);
        assert_eq!(config.n_head_kv, 8);
        assert_eq!(config.head_dim(), 8);
        assert_eq!(config.n_embd_kv(), 64);
        assert_eq!(config.rope_freq_base, 10_000.0);
        assert_eq!(config.n_ctx_train, 4096);
    }

    #[test]
    fn other_architectures_rejected() {
        let file = GgufFile::from_bytes(writer("gpt2").to_bytes()).unwrap();
        assert!(matches!(
            ModelConfig::from_gguf(&file),
            Err(ModelError::Unsupported(_))
        ));
    }

    #[test]
    fn missing_key_is_named() {
        let mut w = GgufWriter::new();
        w.add_metadata("general.architecture", GgufValue::String("llama".into()));
        let file = GgufFile::from_bytes(w.to_bytes()).unwrap();
        match ModelConfig::from_gguf(&file) {
            Err(ModelError::MissingMetadata(key)) => assert!(key.starts_with("llama.")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn gqa_must_divide_heads() {
        let mut w = writer("llama");
        w.add_metadata("llama.attention.head_count_kv", GgufValue::U32(3));
        let file = GgufFile::from_bytes(w.to_bytes()).unwrap();
        assert!(matches!(
            ModelConfig::from_gguf(&file),
            Err(ModelError::Malformed(_))
        ));
    }
}
