use std::collections::BTreeMap;

use tracing::warn;

use crate::error::Result;
use crate::gguf::metadata::{GgufMetadata, GgufMetadataValue};
use crate::gguf::writer::GgufWriter;

pub const KEY_MERGES: &str = "tokenizer.ggml.merges";
pub const KEY_CHAT_TEMPLATE: &str = "tokenizer.chat_template";

const TOKEN_PREFIX: &str = "tokenizer.ggml.";
const ID_SUFFIX: &str = "_token_id";
const ADD_PREFIX: &str = "tokenizer.ggml.add_";
const ADD_SUFFIX: &str = "_token";

/// Special-token kinds the writer knows how to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SpecialTokenKind {
    Bos,
    Eos,
    Unk,
    Sep,
    Pad,
    Cls,
    Mask,
}

impl SpecialTokenKind {
    pub fn from_name(name: &str) -> Option<SpecialTokenKind> {
        match name {
            "bos" => Some(SpecialTokenKind::Bos),
            "eos" => Some(SpecialTokenKind::Eos),
            "unk" => Some(SpecialTokenKind::Unk),
            "sep" => Some(SpecialTokenKind::Sep),
            "pad" => Some(SpecialTokenKind::Pad),
            "cls" => Some(SpecialTokenKind::Cls),
            "mask" => Some(SpecialTokenKind::Mask),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpecialTokenKind::Bos => "bos",
            SpecialTokenKind::Eos => "eos",
            SpecialTokenKind::Unk => "unk",
            SpecialTokenKind::Sep => "sep",
            SpecialTokenKind::Pad => "pad",
            SpecialTokenKind::Cls => "cls",
            SpecialTokenKind::Mask => "mask",
        }
    }

    /// Metadata key holding this kind's token id.
    pub fn id_key(&self) -> String {
        format!("{}{}{}", TOKEN_PREFIX, self.name(), ID_SUFFIX)
    }

    /// Metadata key of the "add this token" flag. Only BOS and EOS have one.
    pub fn add_key(&self) -> Option<String> {
        match self {
            SpecialTokenKind::Bos | SpecialTokenKind::Eos => {
                Some(format!("{}{}{}", ADD_PREFIX, self.name(), ADD_SUFFIX))
            }
            _ => None,
        }
    }
}

/// Merges, special token ids and flags, and chat template.
///
/// Kinds are kept as the raw strings found in the source keys, so kinds
/// the writer does not know survive extraction and are reported when
/// written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecialVocab {
    pub merges: Option<Vec<String>>,
    pub special_token_ids: BTreeMap<String, u32>,
    pub add_special_token: BTreeMap<String, bool>,
    pub chat_template: Option<String>,
}

impl SpecialVocab {
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<SpecialVocab> {
        let mut special = SpecialVocab::default();

        if metadata.contains_key(KEY_MERGES) {
            special.merges = Some(metadata.get_string_array(KEY_MERGES)?);
        }
        if metadata.contains_key(KEY_CHAT_TEMPLATE) {
            special.chat_template = Some(metadata.get_string(KEY_CHAT_TEMPLATE)?.to_string());
        }

        for key in metadata.entries.keys() {
            // "add_" keys also start with the token prefix, so test them first.
            if let Some(kind) = key
                .strip_prefix(ADD_PREFIX)
                .and_then(|rest| rest.strip_suffix(ADD_SUFFIX))
            {
                match metadata.get_bool(key) {
                    Ok(add) => {
                        special.add_special_token.insert(kind.to_string(), add);
                    }
                    Err(e) => warn!(key = %key, error = %e, "Skipping malformed special token flag"),
                }
            } else if let Some(kind) = key
                .strip_prefix(TOKEN_PREFIX)
                .and_then(|rest| rest.strip_suffix(ID_SUFFIX))
            {
                match metadata.get_uint(key) {
                    Ok(id) => {
                        special.special_token_ids.insert(kind.to_string(), id);
                    }
                    Err(e) => warn!(key = %key, error = %e, "Skipping malformed special token id"),
                }
            }
        }

        Ok(special)
    }

    /// Stage merges, special ids, add flags and chat template on `writer`,
    /// in that order. Unknown kinds are skipped with a warning.
    pub fn add_to_gguf(&self, writer: &mut GgufWriter) {
        if let Some(merges) = self.merges.as_deref().filter(|m| !m.is_empty()) {
            writer.add_kv(KEY_MERGES, GgufMetadataValue::string_array(merges));
        }

        for (kind, &id) in &self.special_token_ids {
            match SpecialTokenKind::from_name(kind) {
                Some(k) => writer.add_kv(k.id_key(), GgufMetadataValue::U32(id)),
                None => warn!(kind = %kind, id, "Skipping unknown special token kind"),
            }
        }

        for (kind, &add) in &self.add_special_token {
            match SpecialTokenKind::from_name(kind).and_then(|k| k.add_key()) {
                Some(key) => writer.add_kv(key, GgufMetadataValue::Bool(add)),
                None => warn!(kind = %kind, add, "Skipping unknown special token add flag"),
            }
        }

        if let Some(template) = &self.chat_template {
            writer.add_kv(KEY_CHAT_TEMPLATE, GgufMetadataValue::String(template.clone()));
        }
    }
}
