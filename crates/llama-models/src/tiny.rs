//! Deterministic demo model.
//!
//! A one-layer LLaMA GGUF whose greedy output is scripted: embeddings are
//! one-hot, the attention and feed-forward branches write zeros into the
//! residual stream, and the output matrix maps each token to exactly one
//! successor. The attention and gate/up projections still carry seeded
//! random weights so the whole forward pass runs.
//!
//! Scripted continuations:
//! - `▁Hello` → `▁world` → `!` → `</s>`
//! - `\n` → `Hi` → `▁there` → `!` → `</s>` (so a ChatML prompt answers "Hi there!")
//! - `▁la` → `▁la` (never ends on its own)
//! - anything else → `</s>`

use std::collections::{HashMap, HashSet};
use std::path::Path;

use llama_tokenizer::vocab::byte_token_text;
use llama_tokenizer::TokenType;

use crate::gguf::{GgmlType, GgufValue, GgufWriter};
use crate::ModelResult;

pub const TINY_CONTEXT_LENGTH: u32 = 2048;
pub const TINY_N_HEAD: usize = 4;
pub const TINY_N_HEAD_KV: usize = 2;
pub const TINY_N_FF: usize = 32;

pub const TINY_CHAT_TEMPLATE: &str = "{% for message in messages %}\
{{'<|im_start|>' + message['role'] + '\\n' + message['content'] + '<|im_end|>' + '\\n'}}\
{% endfor %}{% if add_generation_prompt %}{{ '<|im_start|>assistant\\n' }}{% endif %}";

const WORDS: &[&str] = &[
    "Hello",
    "world",
    "Hi",
    "there",
    "user",
    "assistant",
    "system",
    "la",
];

const SCRIPT: &[(&str, &str)] = &[
    ("▁Hello", "▁world"),
    ("▁world", "!"),
    ("<0x0A>", "Hi"),
    ("Hi", "▁there"),
    ("▁there", "!"),
    ("▁la", "▁la"),
];

const EOS_TEXT: &str = "</s>";

/// Simple seeded RNG for weight initialization (xorshift64).
struct WeightRng {
    state: u64,
}

impl WeightRng {
    fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    fn next_f32(&mut self) -> f32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        ((self.state >> 40) as f32 / (1u64 << 24) as f32 - 0.5) * 0.2
    }

    fn fill(&mut self, n: usize) -> Vec<f32> {
        (0..n).map(|_| self.next_f32()).collect()
    }
}

fn vocabulary() -> Vec<(String, f32, TokenType)> {
    let mut tokens = vec![
        ("<unk>".to_string(), 0.0, TokenType::Unknown),
        ("<s>".to_string(), 0.0, TokenType::Control),
        (EOS_TEXT.to_string(), 0.0, TokenType::Control),
        ("<|im_start|>".to_string(), 0.0, TokenType::Control),
        ("<|im_end|>".to_string(), 0.0, TokenType::Control),
    ];
    for b in 0..=255u8 {
        tokens.push((byte_token_text(b), 0.0, TokenType::Byte));
    }
    tokens.push(("▁".to_string(), 0.0, TokenType::Normal));
    tokens.push(("!".to_string(), 0.0, TokenType::Normal));

    let mut seen: HashSet<String> = tokens.iter().map(|t| t.0.clone()).collect();
    for word in WORDS {
        for full in [format!("▁{word}"), word.to_string()] {
            let chars: Vec<char> = full.chars().collect();
            for end in 2..=chars.len() {
                let piece: String = chars[..end].iter().collect();
                if seen.insert(piece.clone()) {
                    tokens.push((piece, end as f32, TokenType::Normal));
                }
            }
        }
    }
    tokens
}

/// Encode the demo model as a GGUF image.
pub fn tiny_model_bytes() -> ModelResult<Vec<u8>> {
    let vocab = vocabulary();
    let n_vocab = vocab.len();
    let n_embd = n_vocab.div_ceil(32) * 32;
    let n_embd_kv = n_embd / TINY_N_HEAD * TINY_N_HEAD_KV;

    let ids: HashMap<&str, usize> = vocab
        .iter()
        .enumerate()
        .map(|(i, t)| (t.0.as_str(), i))
        .collect();
    let eos = ids.get(EOS_TEXT).copied().unwrap_or(2);
    let mut next = vec![eos; n_vocab];
    for (from, to) in SCRIPT {
        if let (Some(&f), Some(&t)) = (ids.get(from), ids.get(to)) {
            next[f] = t;
        }
    }

    // Row t of the embedding, column t of the output: ne0 = n_embd for both.
    let mut embd = vec![0.0f32; n_vocab * n_embd];
    let mut output = vec![0.0f32; n_vocab * n_embd];
    for t in 0..n_vocab {
        embd[t * n_embd + t] = 1.0;
        output[next[t] * n_embd + t] = 1.0;
    }

    let mut rng = WeightRng::new(12345);
    let mut w = GgufWriter::new();
    w.add_metadata("general.architecture", GgufValue::String("llama".into()))
        .add_metadata("general.name", GgufValue::String("tiny-demo".into()))
        .add_metadata("llama.context_length", GgufValue::U32(TINY_CONTEXT_LENGTH))
        .add_metadata("llama.embedding_length", GgufValue::U32(n_embd as u32))
        .add_metadata("llama.block_count", GgufValue::U32(1))
        .add_metadata("llama.feed_forward_length", GgufValue::U32(TINY_N_FF as u32))
        .add_metadata("llama.attention.head_count", GgufValue::U32(TINY_N_HEAD as u32))
        .add_metadata("llama.attention.head_count_kv", GgufValue::U32(TINY_N_HEAD_KV as u32))
        .add_metadata("llama.attention.layer_norm_rms_epsilon", GgufValue::F32(1e-5))
        .add_metadata("llama.rope.freq_base", GgufValue::F32(10_000.0))
        .add_metadata("tokenizer.ggml.model", GgufValue::String("llama".into()))
        .add_metadata(
            "tokenizer.ggml.tokens",
            GgufValue::Array(vocab.iter().map(|t| GgufValue::String(t.0.clone())).collect()),
        )
        .add_metadata(
            "tokenizer.ggml.scores",
            GgufValue::Array(vocab.iter().map(|t| GgufValue::F32(t.1)).collect()),
        )
        .add_metadata(
            "tokenizer.ggml.token_type",
            GgufValue::Array(vocab.iter().map(|t| GgufValue::I32(t.2.to_gguf())).collect()),
        )
        .add_metadata("tokenizer.ggml.bos_token_id", GgufValue::U32(1))
        .add_metadata("tokenizer.ggml.eos_token_id", GgufValue::U32(eos as u32))
        .add_metadata("tokenizer.ggml.unknown_token_id", GgufValue::U32(0))
        .add_metadata("tokenizer.ggml.add_bos_token", GgufValue::Bool(true))
        .add_metadata("tokenizer.ggml.add_space_prefix", GgufValue::Bool(true))
        .add_metadata(
            "tokenizer.chat_template",
            GgufValue::String(TINY_CHAT_TEMPLATE.into()),
        );

    let ones = vec![1.0f32; n_embd];
    w.add_tensor("token_embd.weight", &[n_embd, n_vocab], GgmlType::F16, &embd)?
        .add_tensor("blk.0.attn_norm.weight", &[n_embd], GgmlType::F32, &ones)?
        .add_tensor("blk.0.attn_q.weight", &[n_embd, n_embd], GgmlType::F32, &rng.fill(n_embd * n_embd))?
        .add_tensor("blk.0.attn_k.weight", &[n_embd, n_embd_kv], GgmlType::F32, &rng.fill(n_embd * n_embd_kv))?
        .add_tensor("blk.0.attn_v.weight", &[n_embd, n_embd_kv], GgmlType::F32, &rng.fill(n_embd * n_embd_kv))?
        .add_tensor("blk.0.attn_output.weight", &[n_embd, n_embd], GgmlType::Q8_0, &vec![0.0; n_embd * n_embd])?
        .add_tensor("blk.0.ffn_norm.weight", &[n_embd], GgmlType::F32, &ones)?
        .add_tensor("blk.0.ffn_gate.weight", &[n_embd, TINY_N_FF], GgmlType::Q4_0, &rng.fill(n_embd * TINY_N_FF))?
        .add_tensor("blk.0.ffn_up.weight", &[n_embd, TINY_N_FF], GgmlType::F32, &rng.fill(n_embd * TINY_N_FF))?
        .add_tensor("blk.0.ffn_down.weight", &[TINY_N_FF, n_embd], GgmlType::Q8_0, &vec![0.0; TINY_N_FF * n_embd])?
        .add_tensor("output_norm.weight", &[n_embd], GgmlType::F32, &ones)?
        .add_tensor("output.weight", &[n_embd, n_vocab], GgmlType::F16, &output)?;

    Ok(w.to_bytes())
}

/// Write the demo model to `path`.
pub fn write_tiny_model(path: impl AsRef<Path>) -> ModelResult<()> {
    std::fs::write(path, tiny_model_bytes()?)?;
    Ok(())
}
