use std::fmt;

use gs_tensor::FileType;

use crate::architecture::Architecture;
use crate::error::{ModelError, Result};
use crate::gguf::metadata::GgufMetadata;

pub const KEY_FILE_TYPE: &str = "general.file_type";

/// How RoPE positions are rescaled for extended contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RopeScalingType {
    None,
    Linear,
    Yarn,
}

impl RopeScalingType {
    pub fn from_name(name: &str) -> Option<RopeScalingType> {
        match name {
            "none" => Some(RopeScalingType::None),
            "linear" => Some(RopeScalingType::Linear),
            "yarn" => Some(RopeScalingType::Yarn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RopeScalingType::None => "none",
            RopeScalingType::Linear => "linear",
            RopeScalingType::Yarn => "yarn",
        }
    }
}

impl fmt::Display for RopeScalingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Architecture hyperparameters, parsed from GGUF metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    /// Training context length.
    pub n_ctx: u32,
    /// Embedding dimension / hidden size.
    pub n_embd: u32,
    /// Number of transformer layers.
    pub n_layer: u32,
    /// Feed-forward intermediate dimension.
    pub n_ff: u32,
    /// Number of attention heads for queries.
    pub n_head: u32,
    /// Number of attention heads for keys/values (GQA).
    pub n_head_kv: u32,
    pub n_experts: Option<u32>,
    pub n_experts_used: Option<u32>,
    /// RMS normalization epsilon.
    pub f_norm_eps: Option<f32>,
    pub f_rope_freq_base: Option<f32>,
    pub rope_scaling_type: Option<RopeScalingType>,
    pub f_rope_scale: Option<f32>,
    pub n_orig_ctx: Option<u32>,
    pub rope_finetuned: Option<bool>,
    /// Raw `general.file_type` of the source, if it had one.
    pub ftype: Option<u32>,
}

/// `Some(get(key))` if the key exists, `None` otherwise. A present key with
/// the wrong type is still an error.
fn optional<T>(
    metadata: &GgufMetadata,
    key: &str,
    get: impl FnOnce(&GgufMetadata, &str) -> Result<T>,
) -> Result<Option<T>> {
    if metadata.contains_key(key) {
        get(metadata, key).map(Some)
    } else {
        Ok(None)
    }
}

impl Params {
    /// Parse hyperparameters from GGUF metadata.
    ///
    /// Required keys (under the architecture prefix): `context_length`,
    /// `embedding_length`, `block_count`, `feed_forward_length`,
    /// `attention.head_count`, `attention.head_count_kv`. A missing one
    /// fails with `MissingRequiredField` naming the key.
    pub fn from_gguf(metadata: &GgufMetadata, arch: &Architecture) -> Result<Params> {
        let n_ctx = metadata.get_uint(&arch.key("context_length"))?;
        let n_embd = metadata.get_uint(&arch.key("embedding_length"))?;
        let n_layer = metadata.get_uint(&arch.key("block_count"))?;
        let n_ff = metadata.get_uint(&arch.key("feed_forward_length"))?;
        let n_head = metadata.get_uint(&arch.key("attention.head_count"))?;
        let n_head_kv = metadata.get_uint(&arch.key("attention.head_count_kv"))?;

        if n_head == 0 {
            return Err(ModelError::InvalidValue {
                key: arch.key("attention.head_count"),
                reason: "head count must be positive".to_string(),
            });
        }

        let rope_scaling_type =
            optional(metadata, &arch.key("rope.scaling.type"), |md, key| {
                let name = md.get_string(key)?;
                RopeScalingType::from_name(name).ok_or_else(|| ModelError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("unknown rope scaling type '{}'", name),
                })
            })?;

        Ok(Params {
            n_ctx,
            n_embd,
            n_layer,
            n_ff,
            n_head,
            n_head_kv,
            n_experts: optional(metadata, &arch.key("expert_count"), GgufMetadata::get_uint)?,
            n_experts_used: optional(
                metadata,
                &arch.key("expert_used_count"),
                GgufMetadata::get_uint,
            )?,
            f_norm_eps: optional(
                metadata,
                &arch.key("attention.layer_norm_rms_epsilon"),
                GgufMetadata::get_float,
            )?,
            f_rope_freq_base: optional(
                metadata,
                &arch.key("rope.freq_base"),
                GgufMetadata::get_float,
            )?,
            rope_scaling_type,
            f_rope_scale: optional(
                metadata,
                &arch.key("rope.scaling.factor"),
                GgufMetadata::get_float,
            )?,
            n_orig_ctx: optional(
                metadata,
                &arch.key("rope.scaling.original_context_length"),
                GgufMetadata::get_uint,
            )?,
            rope_finetuned: optional(
                metadata,
                &arch.key("rope.scaling.finetuned"),
                GgufMetadata::get_bool,
            )?,
            ftype: optional(metadata, KEY_FILE_TYPE, GgufMetadata::get_uint)?,
        })
    }

    /// Dimension of each attention head (n_embd / n_head).
    pub fn rope_dimension_count(&self) -> u32 {
        self.n_embd / self.n_head
    }

    /// The source file type, if recorded. Values we cannot produce fail with
    /// `UnsupportedQuantization`.
    pub fn file_type(&self) -> Result<Option<FileType>> {
        match self.ftype {
            Some(id) => FileType::from_gguf(id)
                .map(Some)
                .map_err(|_| ModelError::UnsupportedQuantization(format!("file type {}", id))),
            None => Ok(None),
        }
    }
}
