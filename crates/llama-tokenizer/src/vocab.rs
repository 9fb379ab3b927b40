//! Read-only token/string mapping.

use std::collections::{HashMap, HashSet};

use llama_engine::TokenId;

use crate::{TokenizerError, TokenizerResult};

/// Token attribute as stored in GGUF `tokenizer.ggml.token_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Normal,
    Unknown,
    Control,
    UserDefined,
    Unused,
    Byte,
}

impl TokenType {
    /// Map the GGUF integer code. Undefined codes are treated as normal text.
    pub fn from_gguf(code: i32) -> Self {
        match code {
            2 => TokenType::Unknown,
            3 => TokenType::Control,
            4 => TokenType::UserDefined,
            5 => TokenType::Unused,
            6 => TokenType::Byte,
            _ => TokenType::Normal,
        }
    }

    pub fn to_gguf(self) -> i32 {
        match self {
            TokenType::Normal => 1,
            TokenType::Unknown => 2,
            TokenType::Control => 3,
            TokenType::UserDefined => 4,
            TokenType::Unused => 5,
            TokenType::Byte => 6,
        }
    }

    /// Matched literally in input text rather than merged from pieces.
    pub fn is_special(self) -> bool {
        matches!(self, TokenType::Control | TokenType::UserDefined)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenEntry {
    pub text: String,
    pub score: f32,
    pub kind: TokenType,
}

impl TokenEntry {
    pub fn new(text: impl Into<String>, score: f32, kind: TokenType) -> Self {
        Self {
            text: text.into(),
            score,
            kind,
        }
    }
}

/// Designated tokens and vocabulary-wide flags.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecialTokens {
    pub bos: Option<TokenId>,
    pub eos: Option<TokenId>,
    pub eot: Option<TokenId>,
    pub unk: Option<TokenId>,
    /// Whether the model expects a BOS marker at the start of a sequence.
    pub add_bos: bool,
    /// Whether raw text gets a leading `▁` at sequence start and after special tokens.
    pub add_space_prefix: bool,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            bos: None,
            eos: None,
            eot: None,
            unk: None,
            add_bos: true,
            add_space_prefix: true,
        }
    }
}

/// Control-token texts that end a turn in common chat formats.
const EOG_TEXTS: &[&str] = &[
    "<|eot_id|>",
    "<|im_end|>",
    "<|end|>",
    "<end_of_turn>",
    "<|endoftext|>",
    "<|eom_id|>",
];

/// Immutable vocabulary of a loaded model.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    entries: Vec<TokenEntry>,
    index: HashMap<String, TokenId>,
    /// Special token ids, longest text first, for literal matching.
    specials: Vec<TokenId>,
    eog: HashSet<TokenId>,
    byte_tokens: [Option<TokenId>; 256],
    special: SpecialTokens,
}

impl Vocabulary {
    pub fn new(entries: Vec<TokenEntry>, special: SpecialTokens) -> TokenizerResult<Self> {
        if entries.is_empty() {
            return Err(TokenizerError::InvalidVocabulary(
                "vocabulary is empty".to_string(),
            ));
        }
        let n = entries.len();
        for (name, id) in [
            ("bos", special.bos),
            ("eos", special.eos),
            ("eot", special.eot),
            ("unk", special.unk),
        ] {
            if let Some(id) = id {
                if id < 0 || id as usize >= n {
                    return Err(TokenizerError::InvalidVocabulary(format!(
                        "{name} token id {id} outside vocabulary of {n}"
                    )));
                }
            }
        }

        let mut index = HashMap::with_capacity(n);
        let mut byte_tokens = [None; 256];
        let mut specials = Vec::new();
        let mut eog = HashSet::new();

        for (i, entry) in entries.iter().enumerate() {
            let id = i as TokenId;
            // First occurrence wins for duplicated texts.
            index.entry(entry.text.clone()).or_insert(id);
            match entry.kind {
                TokenType::Byte => {
                    if let Some(b) = parse_byte_token(&entry.text) {
                        byte_tokens[b as usize] = Some(id);
                    }
                }
                kind if kind.is_special() && !entry.text.is_empty() => {
                    specials.push(id);
                    if kind == TokenType::Control && EOG_TEXTS.contains(&entry.text.as_str()) {
                        eog.insert(id);
                    }
                }
                _ => {}
            }
        }
        specials.sort_by(|a, b| {
            let la = entries[*a as usize].text.len();
            let lb = entries[*b as usize].text.len();
            lb.cmp(&la).then(a.cmp(b))
        });
        eog.extend(special.eos);
        eog.extend(special.eot);

        tracing::debug!(
            n_tokens = n,
            n_special = specials.len(),
            n_eog = eog.len(),
            "vocabulary built"
        );

        Ok(Self {
            entries,
            index,
            specials,
            eog,
            byte_tokens,
            special,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, id: TokenId) -> Option<&TokenEntry> {
        usize::try_from(id).ok().and_then(|i| self.entries.get(i))
    }

    pub fn text(&self, id: TokenId) -> Option<&str> {
        self.entry(id).map(|e| e.text.as_str())
    }

    pub fn token_type(&self, id: TokenId) -> Option<TokenType> {
        self.entry(id).map(|e| e.kind)
    }

    pub fn find(&self, text: &str) -> Option<TokenId> {
        self.index.get(text).copied()
    }

    pub fn score_of(&self, text: &str) -> Option<f32> {
        self.find(text)
            .and_then(|id| self.entry(id))
            .map(|e| e.score)
    }

    pub fn byte_token(&self, byte: u8) -> Option<TokenId> {
        self.byte_tokens[byte as usize]
    }

    pub(crate) fn specials(&self) -> &[TokenId] {
        &self.specials
    }

    pub fn special_tokens(&self) -> &SpecialTokens {
        &self.special
    }

    pub fn bos(&self) -> Option<TokenId> {
        self.special.bos
    }

    pub fn eos(&self) -> Option<TokenId> {
        self.special.eos
    }

    pub fn add_bos(&self) -> bool {
        self.special.add_bos
    }

    /// End-of-generation: EOS, EOT, or a turn-ending control token.
    pub fn is_eog(&self, id: TokenId) -> bool {
        self.eog.contains(&id)
    }

    pub fn eog_tokens(&self) -> impl Iterator<Item = TokenId> + '_ {
        self.eog.iter().copied()
    }
}

/// Parse `<0xAB>` into its byte value.
pub fn parse_byte_token(text: &str) -> Option<u8> {
    let hex = text.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

pub fn byte_token_text(byte: u8) -> String {
    format!("<0x{byte:02X}>")
}
