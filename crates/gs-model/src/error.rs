use std::path::PathBuf;

use gs_tensor::DataType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid GGUF magic: expected 'GGUF', got {0:?}")]
    InvalidMagic([u8; 4]),
    #[error("unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),
    #[error("missing required metadata key: {0}")]
    MissingRequiredField(String),
    #[error("type mismatch for key '{key}': expected {expected}, got {got}")]
    TypeMismatch {
        key: String,
        expected: String,
        got: String,
    },
    #[error("invalid value for key '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("unsupported GGUF type ID: {0}")]
    UnsupportedGgufType(u32),
    #[error(
        "vocabulary length mismatch: {tokens} tokens, {scores} scores, {token_types} token types"
    )]
    VocabLengthMismatch {
        tokens: usize,
        scores: usize,
        token_types: usize,
    },
    #[error("unrecognized layer name: {0}")]
    UnrecognizedLayerName(String),
    #[error("duplicate tensor name: {0}")]
    DuplicateTensor(String),
    #[error("tensor '{name}' data ({start}..{end}) lies outside the file ({file_len} bytes)")]
    TensorOutOfBounds {
        name: String,
        start: usize,
        end: usize,
        file_len: usize,
    },
    #[error("tensor '{name}': expected {expected} payload bytes, got {got}")]
    TensorSizeMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("unsupported quantization: {0}")]
    UnsupportedQuantization(String),
    #[error("tensor '{name}' has {n_elements} elements, not a multiple of the {data_type} block size")]
    InvalidBlockSize {
        name: String,
        data_type: DataType,
        n_elements: usize,
    },
    #[error("output path {0} would overwrite the input; choose another output file")]
    OutputCollision(PathBuf),
    #[error("{0} output cannot be written in big-endian byte order")]
    BigEndianUnsupported(DataType),
    #[error("input {0} is not a .gguf file")]
    InvalidInputExtension(PathBuf),
    #[error("tensor '{name}': {source}")]
    Tensor {
        name: String,
        #[source]
        source: gs_tensor::TensorError,
    },
    #[error("tensor error: {0}")]
    TensorError(#[from] gs_tensor::TensorError),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl ModelError {
    /// Attach a tensor name to a numeric error, promoting the kinds that
    /// have their own top-level variant.
    pub fn for_tensor(name: &str, source: gs_tensor::TensorError) -> ModelError {
        use gs_tensor::TensorError as T;
        match source {
            T::InvalidBlockSize {
                data_type,
                n_elements,
                ..
            } => ModelError::InvalidBlockSize {
                name: name.to_string(),
                data_type,
                n_elements,
            },
            T::UnsupportedQuantization(what) => {
                ModelError::UnsupportedQuantization(format!("{} (tensor '{}')", what, name))
            }
            T::BigEndianUnsupported(data_type) => ModelError::BigEndianUnsupported(data_type),
            other => ModelError::Tensor {
                name: name.to_string(),
                source: other,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;
    use gs_tensor::TensorError;

    #[test]
    fn test_for_tensor_promotes_block_size() {
        let err = ModelError::for_tensor(
            "blk.0.attn_q.weight",
            TensorError::InvalidBlockSize {
                data_type: DataType::Q8_0,
                n_elements: 33,
                block_size: 32,
            },
        );
        match err {
            ModelError::InvalidBlockSize {
                name, n_elements, ..
            } => {
                assert_eq!(name, "blk.0.attn_q.weight");
                assert_eq!(n_elements, 33);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_for_tensor_keeps_name_in_message() {
        let err = ModelError::for_tensor(
            "output.weight",
            TensorError::BufferLength {
                data_type: DataType::F16,
                expected: 8,
                got: 6,
            },
        );
        assert_eq!(
            err.to_string(),
            "tensor 'output.weight': buffer length mismatch for F16: expected 8 bytes, got 6"
        );
    }
}
