use crate::error::{ModelError, Result};
use crate::gguf::metadata::GgufMetadata;

pub const KEY_MODEL: &str = "tokenizer.ggml.model";
pub const KEY_TOKENS: &str = "tokenizer.ggml.tokens";
pub const KEY_SCORES: &str = "tokenizer.ggml.scores";
pub const KEY_TOKEN_TYPE: &str = "tokenizer.ggml.token_type";

/// Role of a vocabulary entry, as stored in `tokenizer.ggml.token_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Normal,
    Unknown,
    Control,
    UserDefined,
    Unused,
    Byte,
}

impl TokenType {
    pub fn from_id(id: i32) -> Option<TokenType> {
        match id {
            1 => Some(TokenType::Normal),
            2 => Some(TokenType::Unknown),
            3 => Some(TokenType::Control),
            4 => Some(TokenType::UserDefined),
            5 => Some(TokenType::Unused),
            6 => Some(TokenType::Byte),
            _ => None,
        }
    }

    pub fn id(&self) -> i32 {
        match self {
            TokenType::Normal => 1,
            TokenType::Unknown => 2,
            TokenType::Control => 3,
            TokenType::UserDefined => 4,
            TokenType::Unused => 5,
            TokenType::Byte => 6,
        }
    }
}

/// Token vocabulary loaded from GGUF metadata.
///
/// `tokens`, `scores` and `token_types` are parallel and always have the
/// same length.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocab {
    /// Tokenizer model name (e.g. "llama").
    pub model: String,
    /// Token strings, indexed by token ID.
    pub tokens: Vec<String>,
    /// Merge priority scores, indexed by token ID.
    pub scores: Vec<f32>,
    pub token_types: Vec<TokenType>,
}

impl Vocab {
    /// Build a vocabulary from GGUF metadata.
    ///
    /// Reads the following metadata keys:
    /// - `tokenizer.ggml.model` (string)
    /// - `tokenizer.ggml.tokens` (string array of token strings)
    /// - `tokenizer.ggml.scores` (f32 array of merge scores)
    /// - `tokenizer.ggml.token_type` (integer array of token types)
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<Vocab> {
        let model = metadata.get_string(KEY_MODEL)?.to_string();
        let tokens = metadata.get_string_array(KEY_TOKENS)?;
        let scores = metadata.get_f32_array(KEY_SCORES)?;
        let raw_types = metadata.get_i32_array(KEY_TOKEN_TYPE)?;

        if tokens.len() != scores.len() || tokens.len() != raw_types.len() {
            return Err(ModelError::VocabLengthMismatch {
                tokens: tokens.len(),
                scores: scores.len(),
                token_types: raw_types.len(),
            });
        }

        let token_types = raw_types
            .iter()
            .enumerate()
            .map(|(i, &t)| {
                TokenType::from_id(t).ok_or_else(|| ModelError::InvalidValue {
                    key: format!("{}[{}]", KEY_TOKEN_TYPE, i),
                    reason: format!("unknown token type {}", t),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Vocab {
            model,
            tokens,
            scores,
            token_types,
        })
    }

    /// Number of tokens in the vocabulary.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns true if the vocabulary is empty.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token_type_ids(&self) -> Vec<i32> {
        self.token_types.iter().map(TokenType::id).collect()
    }
}
