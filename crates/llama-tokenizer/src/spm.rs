//! SentencePiece-style tokenizer driven by a GGUF vocabulary.
//!
//! Encoding:
//! 1. Split the text on literal special-token texts (longest match first).
//! 2. For each raw fragment, escape spaces as `▁`, prefixing one at the start
//!    of the sequence and after every special token.
//! 3. Start from single characters and repeatedly merge the adjacent pair whose
//!    concatenation is in the vocabulary with the highest score (leftmost wins
//!    ties).
//! 4. Symbols that never reached a vocabulary entry fall back to `<0xXX>` byte
//!    tokens.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use llama_engine::TokenId;

use crate::sizing::copy_truncated;
use crate::vocab::{parse_byte_token, TokenType, Vocabulary};
use crate::{Tokenizer, TokenizerError, TokenizerResult};

const SPACE_ESCAPE: char = '\u{2581}';
const UNKNOWN_PIECE: &str = "\u{2585}";

#[derive(Debug, Clone, Copy)]
pub struct SpmTokenizer<'v> {
    vocab: &'v Vocabulary,
}

#[derive(Debug, PartialEq)]
enum Fragment<'t> {
    Special(TokenId),
    Raw(&'t str),
}

#[derive(Debug, Clone, Copy)]
struct Symbol {
    prev: Option<usize>,
    next: Option<usize>,
    start: usize,
    len: usize,
}

#[derive(Debug)]
struct Bigram {
    left: usize,
    right: usize,
    score: f32,
    size: usize,
}

impl PartialEq for Bigram {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Bigram {}

impl PartialOrd for Bigram {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Bigram {
    // Max-heap: highest score first, then the leftmost pair.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.left.cmp(&self.left))
    }
}

impl<'v> SpmTokenizer<'v> {
    pub fn new(vocab: &'v Vocabulary) -> Self {
        Self { vocab }
    }

    pub fn vocab(&self) -> &'v Vocabulary {
        self.vocab
    }

    /// Full token sequence for `text`. Measure and fill both run through here,
    /// so the two phases always agree.
    pub fn encode(&self, text: &str, add_bos: bool) -> TokenizerResult<Vec<TokenId>> {
        let mut out = Vec::new();
        if add_bos && self.vocab.add_bos() {
            if let Some(bos) = self.vocab.bos() {
                out.push(bos);
            }
        }

        let add_space_prefix = self.vocab.special_tokens().add_space_prefix;
        let mut prev_special = true;
        let mut escaped = String::new();
        for fragment in self.partition(text) {
            match fragment {
                Fragment::Special(id) => {
                    out.push(id);
                    prev_special = true;
                }
                Fragment::Raw(raw) => {
                    escaped.clear();
                    if add_space_prefix && prev_special {
                        escaped.push(SPACE_ESCAPE);
                    }
                    escaped.extend(raw.chars().map(|c| if c == ' ' { SPACE_ESCAPE } else { c }));
                    self.encode_escaped(&escaped, &mut out)?;
                    prev_special = false;
                }
            }
        }
        Ok(out)
    }

    fn partition<'t>(&self, text: &'t str) -> Vec<Fragment<'t>> {
        let mut fragments = Vec::new();
        let mut start = 0;
        let mut i = 0;
        while i < text.len() {
            let rest = &text[i..];
            let hit = self.vocab.specials().iter().find_map(|&id| {
                let t = self.vocab.text(id)?;
                rest.starts_with(t).then_some((id, t.len()))
            });
            match hit {
                Some((id, len)) => {
                    if start < i {
                        fragments.push(Fragment::Raw(&text[start..i]));
                    }
                    fragments.push(Fragment::Special(id));
                    i += len;
                    start = i;
                }
                None => i += rest.chars().next().map_or(1, char::len_utf8),
            }
        }
        if start < text.len() {
            fragments.push(Fragment::Raw(&text[start..]));
        }
        fragments
    }

    fn encode_escaped(&self, text: &str, out: &mut Vec<TokenId>) -> TokenizerResult<()> {
        if text.is_empty() {
            return Ok(());
        }

        let mut symbols: Vec<Symbol> = Vec::with_capacity(text.len());
        for (start, c) in text.char_indices() {
            let idx = symbols.len();
            symbols.push(Symbol {
                prev: idx.checked_sub(1),
                next: None,
                start,
                len: c.len_utf8(),
            });
            if idx > 0 {
                symbols[idx - 1].next = Some(idx);
            }
        }

        let mut queue = BinaryHeap::new();
        for right in 1..symbols.len() {
            self.try_add_bigram(text, &symbols, right - 1, right, &mut queue);
        }

        while let Some(bigram) = queue.pop() {
            let (l, r) = (bigram.left, bigram.right);
            let (left, right) = (symbols[l], symbols[r]);
            // Stale entry: one side already merged elsewhere.
            if left.len == 0 || right.len == 0 || left.len + right.len != bigram.size {
                continue;
            }

            symbols[l].len += right.len;
            symbols[r].len = 0;
            symbols[l].next = right.next;
            if let Some(n) = right.next {
                symbols[n].prev = Some(l);
            }

            if let Some(p) = symbols[l].prev {
                self.try_add_bigram(text, &symbols, p, l, &mut queue);
            }
            if let Some(n) = symbols[l].next {
                self.try_add_bigram(text, &symbols, l, n, &mut queue);
            }
        }

        let mut cursor = Some(0);
        while let Some(i) = cursor {
            let sym = symbols[i];
            self.resegment(&text[sym.start..sym.start + sym.len], out)?;
            cursor = sym.next;
        }
        Ok(())
    }

    fn try_add_bigram(
        &self,
        text: &str,
        symbols: &[Symbol],
        left: usize,
        right: usize,
        queue: &mut BinaryHeap<Bigram>,
    ) {
        let start = symbols[left].start;
        let end = symbols[right].start + symbols[right].len;
        if let Some(score) = self.vocab.score_of(&text[start..end]) {
            queue.push(Bigram {
                left,
                right,
                score,
                size: end - start,
            });
        }
    }

    fn resegment(&self, piece: &str, out: &mut Vec<TokenId>) -> TokenizerResult<()> {
        if let Some(id) = self.vocab.find(piece) {
            out.push(id);
            return Ok(());
        }
        for b in piece.bytes() {
            let id = self
                .vocab
                .byte_token(b)
                .or(self.vocab.special_tokens().unk)
                .ok_or_else(|| {
                    TokenizerError::EncodingError(format!(
                        "no byte fallback or unknown token for byte 0x{b:02X}"
                    ))
                })?;
            out.push(id);
        }
        Ok(())
    }

    /// Bytes a token renders to. Control and user-defined tokens render their
    /// literal text.
    pub fn piece(&self, token: TokenId) -> TokenizerResult<Vec<u8>> {
        let entry = self
            .vocab
            .entry(token)
            .ok_or(TokenizerError::InvalidToken(token))?;
        let bytes = match entry.kind {
            TokenType::Normal => entry
                .text
                .replace(SPACE_ESCAPE, " ")
                .into_bytes(),
            TokenType::Unknown => UNKNOWN_PIECE.as_bytes().to_vec(),
            TokenType::Control | TokenType::UserDefined => entry.text.as_bytes().to_vec(),
            TokenType::Byte => {
                let b = parse_byte_token(&entry.text).ok_or_else(|| {
                    TokenizerError::DecodingError(format!(
                        "malformed byte token {:?}",
                        entry.text
                    ))
                })?;
                vec![b]
            }
            TokenType::Unused => Vec::new(),
        };
        Ok(bytes)
    }
}

impl Tokenizer for SpmTokenizer<'_> {
    fn tokenize_into(
        &self,
        text: &str,
        add_bos: bool,
        out: &mut [TokenId],
    ) -> TokenizerResult<usize> {
        let tokens = self.encode(text, add_bos)?;
        Ok(copy_truncated(&tokens, out))
    }

    fn token_to_piece(&self, token: TokenId, buf: &mut [u8]) -> TokenizerResult<usize> {
        let piece = self.piece(token)?;
        Ok(copy_truncated(&piece, buf))
    }

    fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    fn is_eog(&self, token: TokenId) -> bool {
        self.vocab.is_eog(token)
    }
}
