//! `gs-tensor` - Numeric layer for gguf-sort.
//!
//! This crate provides:
//! - `DataType`, the closed set of tensor element types and their layouts
//! - `FileType`, the container-wide precision and its per-tensor type rule
//! - `ByteOrder` handling for little- and big-endian containers
//! - `Shape` in GGUF on-disk dimension order
//! - Element conversion, including Q8_0 block quantization

pub mod dtype;
pub mod endian;
pub mod error;
pub mod file_type;
pub mod quant;
pub mod shape;

// Re-export primary types at the crate root for convenience.
pub use dtype::{DataType, Layout};
pub use endian::ByteOrder;
pub use error::{Result, TensorError};
pub use file_type::FileType;
pub use quant::{BlockQ8_0, QK8_0};
pub use shape::Shape;
