//! # llama-tokenizer
//!
//! Deterministic tokenization for llama-textgen.
//!
//! This crate provides:
//! - A `Tokenizer` trait with llama.cpp-style measure/fill calls
//! - [`Vocabulary`]: the read-only token table of a loaded model
//! - [`SpmTokenizer`]: SentencePiece-style merging with byte fallback
//! - Streaming decoding with UTF-8 handling
//! - [`ChatTemplate`]: chat prompt formatting for the common template families

pub mod sizing;
pub mod spm;
pub mod template;
pub mod vocab;

use llama_engine::TokenId;

pub use sizing::measure_then_fill;
pub use spm::SpmTokenizer;
pub use template::ChatTemplate;
pub use vocab::{SpecialTokens, TokenEntry, TokenType, Vocabulary};

/// Error type for tokenization operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizerError {
    #[error("Invalid token ID: {0}")]
    InvalidToken(TokenId),
    #[error("Encoding error: {0}")]
    EncodingError(String),
    #[error("Decoding error: {0}")]
    DecodingError(String),
    #[error("Invalid vocabulary: {0}")]
    InvalidVocabulary(String),
    #[error("Template error: {0}")]
    Template(String),
    #[error("Output size changed between measure and fill: {measured} then {filled}")]
    SizeMismatch { measured: usize, filled: usize },
    #[error("Piece for token {token} is {len} bytes, limit is {max}")]
    PieceTooLong { token: TokenId, len: usize, max: usize },
}

pub type TokenizerResult<T> = std::result::Result<T, TokenizerError>;

/// Core tokenizer trait. Implementations can be swapped without changing app code.
///
/// The two required conversion calls follow a measure/fill protocol: they write
/// as much output as fits and always return the full size they need, so
/// passing an empty buffer measures.
pub trait Tokenizer: Send + Sync {
    /// Tokenize `text` into `out`; returns the full token count.
    fn tokenize_into(&self, text: &str, add_bos: bool, out: &mut [TokenId])
        -> TokenizerResult<usize>;

    /// Write the UTF-8 bytes of `token` into `buf`; returns the full piece length.
    fn token_to_piece(&self, token: TokenId, buf: &mut [u8]) -> TokenizerResult<usize>;

    /// Get vocabulary size.
    fn vocab_size(&self) -> usize;

    /// Whether `token` ends generation.
    fn is_eog(&self, token: TokenId) -> bool;

    /// Measure, allocate exactly, fill.
    fn tokenize(&self, text: &str, add_bos: bool) -> TokenizerResult<Vec<TokenId>> {
        measure_then_fill(0, |buf: &mut [TokenId]| self.tokenize_into(text, add_bos, buf))
    }

    /// The measure phase alone.
    fn count_tokens(&self, text: &str, add_bos: bool) -> TokenizerResult<usize> {
        self.tokenize_into(text, add_bos, &mut [])
    }

    /// Decode a single token through a `max_piece_bytes` buffer and accumulate
    /// with partial UTF-8 state. A piece that does not fit is an error.
    fn decode_token(
        &self,
        token: TokenId,
        max_piece_bytes: usize,
        state: &mut DecodingState,
    ) -> TokenizerResult<String> {
        state.scratch.resize(max_piece_bytes, 0);
        let n = self.token_to_piece(token, &mut state.scratch)?;
        if n > max_piece_bytes {
            return Err(TokenizerError::PieceTooLong {
                token,
                len: n,
                max: max_piece_bytes,
            });
        }
        let piece = std::mem::take(&mut state.scratch);
        let emitted = state.push_bytes(&piece[..n]);
        state.scratch = piece;
        Ok(emitted)
    }

    /// Decode a complete sequence of tokens into text.
    fn decode(&self, tokens: &[TokenId], max_piece_bytes: usize) -> TokenizerResult<String> {
        let mut state = DecodingState::new();
        for &t in tokens {
            self.decode_token(t, max_piece_bytes, &mut state)?;
        }
        Ok(state.finish())
    }
}

/// Streaming decoding state for handling partial UTF-8 sequences.
///
/// Byte tokens can split a multi-byte character across several tokens; bytes
/// are held back until they complete a character.
#[derive(Debug, Clone, Default)]
pub struct DecodingState {
    buffer: String,
    pending_utf8: Vec<u8>,
    emitted_any: bool,
    scratch: Vec<u8>,
}

impl DecodingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// True once any piece has been pushed, even one still waiting for more bytes.
    pub fn emitted_any(&self) -> bool {
        self.emitted_any
    }

    /// Append piece bytes; returns the text that became complete.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> String {
        if !bytes.is_empty() {
            self.emitted_any = true;
        }
        self.pending_utf8.extend_from_slice(bytes);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending_utf8) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending_utf8.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending_utf8[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending_utf8.drain(..valid + bad);
                        }
                        // Incomplete tail: wait for the next piece.
                        None => {
                            self.pending_utf8.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        self.buffer.push_str(&out);
        out
    }

    /// Flush any dangling partial character and return the accumulated text.
    pub fn finish(&mut self) -> String {
        if !self.pending_utf8.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending_utf8).into_owned();
            self.buffer.push_str(&tail);
            self.pending_utf8.clear();
        }
        std::mem::take(&mut self.buffer)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending_utf8.clear();
        self.emitted_any = false;
    }
}
