//! Canonical tensor ordering.
//!
//! The token embedding comes first, then every layer in ascending index
//! order, then the output projection, then the final norm. Classification
//! compares whole dot-separated name segments, so `blk.3.attn_output.weight`
//! is a layer-3 tensor and not the output projection.

use crate::error::{ModelError, Result};

const TOKEN_EMBEDDING: &str = "token_embd";
const OUTPUT: &str = "output";
const OUTPUT_NORM: &str = "output_norm";

/// Sort key of a tensor name. Variant order is the output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LayerKey {
    TokenEmbedding,
    Layer(u64),
    Output,
    OutputNorm,
}

/// Classify a tensor name.
///
/// Names outside the three fixed categories take the last purely numeric
/// segment as their layer index; a name without one is an
/// `UnrecognizedLayerName`.
pub fn layer_key(name: &str) -> Result<LayerKey> {
    let has_segment = |s: &str| name.split('.').any(|seg| seg == s);

    if has_segment(TOKEN_EMBEDDING) {
        return Ok(LayerKey::TokenEmbedding);
    }
    if has_segment(OUTPUT_NORM) {
        return Ok(LayerKey::OutputNorm);
    }
    if has_segment(OUTPUT) {
        return Ok(LayerKey::Output);
    }

    name.rsplit('.')
        .find(|seg| !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|seg| seg.parse::<u64>().ok())
        .map(LayerKey::Layer)
        .ok_or_else(|| ModelError::UnrecognizedLayerName(name.to_string()))
}

/// Permutation that puts `names` in canonical order: `order[i]` is the
/// index of the name that belongs at position `i`. Ties keep their input
/// order.
pub fn sorted_order<S: AsRef<str>>(names: &[S]) -> Result<Vec<usize>> {
    let keys = names
        .iter()
        .map(|n| layer_key(n.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    let mut order: Vec<usize> = (0..names.len()).collect();
    order.sort_by_key(|&i| keys[i]);
    Ok(order)
}
