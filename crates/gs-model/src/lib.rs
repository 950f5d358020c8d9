//! `gs-model` - GGUF container codec and the tensor reordering pipeline.
//!
//! This crate provides:
//! - A GGUF v3 reader (memory-mapped) and a staged, forward-only writer
//! - Extraction of LLaMA hyperparameters, vocabulary and special tokens
//! - The tensor catalog and canonical layer ordering
//! - The serializer and the end-to-end [`convert`] entry point

pub mod architecture;
pub mod catalog;
pub mod convert;
pub mod error;
pub mod gguf;
pub mod params;
pub mod serializer;
pub mod sort;
pub mod tokenizer;

pub use architecture::Architecture;
pub use catalog::{Catalog, TensorDescriptor};
pub use convert::{convert, default_outfile, ConvertOptions, ConvertSummary};
pub use error::{ModelError, Result};
pub use params::{Params, RopeScalingType};
pub use serializer::{Serializer, TensorPlan, DEFAULT_CONCURRENCY};
pub use sort::LayerKey;
pub use tokenizer::{SpecialTokenKind, SpecialVocab, TokenType, Vocab};
