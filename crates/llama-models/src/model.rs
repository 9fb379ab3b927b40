//! A loaded LLaMA-family model.
//!
//! Holds the dequantized weights, the vocabulary and the embedded chat
//! template. The model is immutable after loading; all per-conversation
//! state lives in the caller's [`SessionKVCache`].

use std::path::Path;
use std::time::Instant;

use llama_engine::TokenId;
use llama_kv::{KVError, SessionKVCache};
use llama_tokenizer::{SpecialTokens, SpmTokenizer, TokenEntry, TokenType, Vocabulary};

use crate::config::ModelConfig;
use crate::gguf::{GgufFile, GgufValue};
use crate::ops::{self, Matrix, RmsNorm, Rope};
use crate::{ModelError, ModelResult};

/// Tokenizer model name for SentencePiece-style vocabularies.
pub const TOKENIZER_MODEL: &str = "llama";

#[derive(Debug, Clone)]
struct Layer {
    attn_norm: RmsNorm,
    wq: Matrix,
    wk: Matrix,
    wv: Matrix,
    wo: Matrix,
    ffn_norm: RmsNorm,
    w_gate: Matrix,
    w_up: Matrix,
    w_down: Matrix,
}

#[derive(Debug, Clone)]
pub struct Model {
    config: ModelConfig,
    vocab: Vocabulary,
    chat_template: Option<String>,
    /// `[n_vocab, n_embd]`: row `t` is the embedding of token `t`.
    token_embd: Matrix,
    layers: Vec<Layer>,
    output_norm: RmsNorm,
    /// `None` when the output projection is tied to the embedding.
    output: Option<Matrix>,
    rope: Rope,
}

impl Model {
    /// Load a GGUF model file.
    pub fn load(path: impl AsRef<Path>) -> ModelResult<Self> {
        let path = path.as_ref();
        let start = Instant::now();
        let file = GgufFile::open(path)?;
        let model = Self::from_gguf(&file)?;
        tracing::info!(
            path = %path.display(),
            n_vocab = model.config.n_vocab,
            n_embd = model.config.n_embd,
            n_layer = model.config.n_layer,
            load_ms = start.elapsed().as_millis() as u64,
            "model loaded"
        );
        Ok(model)
    }

    pub fn from_gguf(file: &GgufFile) -> ModelResult<Self> {
        let config = ModelConfig::from_gguf(file)?;
        let vocab = load_vocabulary(file)?;
        let chat_template = file
            .metadata("tokenizer.chat_template")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let c = &config;
        let token_embd = load_matrix(file, "token_embd.weight", c.n_vocab, c.n_embd)?;
        let mut layers = Vec::with_capacity(c.n_layer);
        for i in 0..c.n_layer {
            let name = |t: &str| format!("blk.{i}.{t}.weight");
            layers.push(Layer {
                attn_norm: RmsNorm::new(load_vector(file, &name("attn_norm"), c.n_embd)?, c.rms_norm_eps),
                wq: load_matrix(file, &name("attn_q"), c.n_embd, c.n_embd)?,
                wk: load_matrix(file, &name("attn_k"), c.n_embd_kv(), c.n_embd)?,
                wv: load_matrix(file, &name("attn_v"), c.n_embd_kv(), c.n_embd)?,
                wo: load_matrix(file, &name("attn_output"), c.n_embd, c.n_embd)?,
                ffn_norm: RmsNorm::new(load_vector(file, &name("ffn_norm"), c.n_embd)?, c.rms_norm_eps),
                w_gate: load_matrix(file, &name("ffn_gate"), c.n_ff, c.n_embd)?,
                w_up: load_matrix(file, &name("ffn_up"), c.n_ff, c.n_embd)?,
                w_down: load_matrix(file, &name("ffn_down"), c.n_embd, c.n_ff)?,
            });
        }
        let output_norm = RmsNorm::new(
            load_vector(file, "output_norm.weight", c.n_embd)?,
            c.rms_norm_eps,
        );
        let output = match file.tensor_info("output.weight") {
            Some(_) => Some(load_matrix(file, "output.weight", c.n_vocab, c.n_embd)?),
            None => None,
        };
        let rope = Rope::new(c.head_dim(), c.rope_freq_base);

        Ok(Self {
            config,
            vocab,
            chat_template,
            token_embd,
            layers,
            output_norm,
            output,
            rope,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// The `tokenizer.chat_template` string, if the file carries one.
    pub fn chat_template(&self) -> Option<&str> {
        self.chat_template.as_deref()
    }

    pub fn tokenizer(&self) -> SpmTokenizer<'_> {
        SpmTokenizer::new(&self.vocab)
    }

    /// Allocate a KV cache of `n_ctx` cells shaped for this model.
    pub fn new_cache(&self, n_ctx: usize) -> Result<SessionKVCache, KVError> {
        let c = &self.config;
        SessionKVCache::try_new(c.n_layer, n_ctx, c.n_head_kv, c.head_dim())
    }

    /// Run `tokens` through the model at the cache's next positions and
    /// return the logits of the last one.
    ///
    /// The batch is checked up front, so on error the cache is unchanged.
    pub fn decode(&self, tokens: &[TokenId], cache: &mut SessionKVCache) -> ModelResult<Vec<f32>> {
        let Some((&last, prefix)) = tokens.split_last() else {
            return Err(ModelError::EmptyBatch);
        };
        if let Some(&bad) = tokens
            .iter()
            .find(|&&t| t < 0 || t as usize >= self.config.n_vocab)
        {
            return Err(ModelError::InvalidToken(bad));
        }
        if !cache.fits(tokens.len()) {
            return Err(KVError::CapacityExceeded {
                seq_len: cache.used_cells() + tokens.len(),
                max: cache.capacity(),
            }
            .into());
        }

        for &t in prefix {
            self.forward(t, cache)?;
        }
        let hidden = self.forward(last, cache)?;
        Ok(self.logits(&hidden))
    }

    /// One token through every layer; returns the final hidden state.
    fn forward(&self, token: TokenId, cache: &mut SessionKVCache) -> ModelResult<Vec<f32>> {
        let c = &self.config;
        let pos = cache.next_position();
        let mut x = self.token_embd.row(token as usize).to_vec();

        for (il, layer) in self.layers.iter().enumerate() {
            let xn = layer.attn_norm.forward(&x);
            let mut q = layer.wq.matvec(&xn);
            let mut k = layer.wk.matvec(&xn);
            let v = layer.wv.matvec(&xn);
            self.rope.apply(&mut q, pos);
            self.rope.apply(&mut k, pos);

            cache.write_pending(il, &k, &v)?;
            let kv = cache
                .layer(il)
                .ok_or(KVError::LayerOutOfRange {
                    index: il,
                    n_layers: cache.n_layers(),
                })?;
            let attn = ops::attention(
                &q,
                kv.keys(pos + 1),
                kv.values(pos + 1),
                c.n_head,
                c.n_head_kv,
                c.head_dim(),
            );
            ops::add_in_place(&mut x, &layer.wo.matvec(&attn));

            let xn = layer.ffn_norm.forward(&x);
            let ffn = ops::swiglu(&xn, &layer.w_gate, &layer.w_up, &layer.w_down);
            ops::add_in_place(&mut x, &ffn);
        }

        cache.commit()?;
        Ok(x)
    }

    fn logits(&self, hidden: &[f32]) -> Vec<f32> {
        let h = self.output_norm.forward(hidden);
        self.output.as_ref().unwrap_or(&self.token_embd).matvec(&h)
    }
}

/// `dims` must equal `[cols, rows]` (GGUF lists `ne0` first).
fn load_matrix(file: &GgufFile, name: &str, rows: usize, cols: usize) -> ModelResult<Matrix> {
    let (dims, data) = file.tensor_f32(name)?;
    if dims != [cols, rows] {
        return Err(ModelError::ShapeMismatch {
            name: name.to_string(),
            expected: vec![cols, rows],
            got: dims,
        });
    }
    Matrix::new(rows, cols, data)
}

fn load_vector(file: &GgufFile, name: &str, len: usize) -> ModelResult<Vec<f32>> {
    let (dims, data) = file.tensor_f32(name)?;
    if dims != [len] {
        return Err(ModelError::ShapeMismatch {
            name: name.to_string(),
            expected: vec![len],
            got: dims,
        });
    }
    Ok(data)
}

fn token_id(file: &GgufFile, key: &str) -> ModelResult<Option<TokenId>> {
    match file.metadata(key) {
        None => Ok(None),
        Some(v) => v
            .as_i64()
            .and_then(|id| TokenId::try_from(id).ok())
            .map(Some)
            .ok_or_else(|| ModelError::Malformed(format!("{key} is not a token id: {v:?}"))),
    }
}

fn flag(file: &GgufFile, key: &str, default: bool) -> bool {
    file.metadata(key)
        .and_then(GgufValue::as_bool)
        .unwrap_or(default)
}

fn load_vocabulary(file: &GgufFile) -> ModelResult<Vocabulary> {
    let model = file
        .metadata("tokenizer.ggml.model")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ModelError::MissingMetadata("tokenizer.ggml.model".to_string()))?;
    if model != TOKENIZER_MODEL {
        return Err(ModelError::Unsupported(format!(
            "tokenizer model {model:?} (only {TOKENIZER_MODEL:?} is supported)"
        )));
    }

    let tokens = file
        .metadata("tokenizer.ggml.tokens")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ModelError::MissingMetadata("tokenizer.ggml.tokens".to_string()))?;
    let scores = file
        .metadata("tokenizer.ggml.scores")
        .and_then(|v| v.as_array());
    let types = file
        .metadata("tokenizer.ggml.token_type")
        .and_then(|v| v.as_array());
    for (key, arr) in [("scores", scores), ("token_type", types)] {
        if let Some(arr) = arr {
            if arr.len() != tokens.len() {
                return Err(ModelError::Malformed(format!(
                    "tokenizer.ggml.{key} has {} entries for {} tokens",
                    arr.len(),
                    tokens.len()
                )));
            }
        }
    }

    let mut entries = Vec::with_capacity(tokens.len());
    for (i, t) in tokens.iter().enumerate() {
        let text = t
            .as_str()
            .ok_or_else(|| ModelError::Malformed(format!("token {i} is not a string")))?;
        let score = scores
            .and_then(|s| s[i].as_f32())
            .unwrap_or(0.0);
        let kind = types
            .and_then(|s| s[i].as_i64())
            .map(|code| TokenType::from_gguf(code as i32))
            .unwrap_or(TokenType::Normal);
        entries.push(TokenEntry::new(text, score, kind));
    }

    let special = SpecialTokens {
        bos: token_id(file, "tokenizer.ggml.bos_token_id")?,
        eos: token_id(file, "tokenizer.ggml.eos_token_id")?,
        eot: token_id(file, "tokenizer.ggml.eot_token_id")?,
        unk: token_id(file, "tokenizer.ggml.unknown_token_id")?,
        add_bos: flag(file, "tokenizer.ggml.add_bos_token", true),
        add_space_prefix: flag(file, "tokenizer.ggml.add_space_prefix", true),
    };
    Ok(Vocabulary::new(entries, special)?)
}
