use thiserror::Error;

use crate::dtype::DataType;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("{n_elements} elements is not a multiple of the {data_type} block size ({block_size})")]
    InvalidBlockSize {
        data_type: DataType,
        n_elements: usize,
        block_size: usize,
    },
    #[error("{n_elements} elements of {data_type} do not fit in memory")]
    SizeOverflow {
        data_type: DataType,
        n_elements: usize,
    },
    #[error("no quantization implemented for {0}")]
    UnsupportedQuantization(String),
    #[error("{0} output is only supported in little-endian byte order")]
    BigEndianUnsupported(DataType),
    #[error("buffer length mismatch for {data_type}: expected {expected} bytes, got {got}")]
    BufferLength {
        data_type: DataType,
        expected: usize,
        got: usize,
    },
}

pub type Result<T> = std::result::Result<T, TensorError>;
