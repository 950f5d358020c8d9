use std::fmt;

use crate::error::{Result, TensorError};

/// Physical layout of one data type on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// One fixed-width value per element.
    Unquantized { element_bytes: usize },
    /// Packed records, each covering `block_size` elements in `block_bytes` bytes.
    Quantized { block_size: usize, block_bytes: usize },
}

/// Tensor element types that can appear in a GGUF container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 32-bit floating point.
    F32,
    /// 16-bit floating point (IEEE 754 half-precision, via the `half` crate).
    F16,
    /// bfloat16, stored as the upper half of an f32.
    BF16,
    /// 4-bit block format: f16 scale + 16 bytes of nibbles per 32 elements.
    Q4_0,
    /// 8-bit block format: f16 scale + 32 signed bytes per 32 elements.
    Q8_0,
}

impl DataType {
    /// Layout table. Every variant has exactly one entry.
    pub fn layout(&self) -> Layout {
        match self {
            DataType::F32 => Layout::Unquantized { element_bytes: 4 },
            DataType::F16 => Layout::Unquantized { element_bytes: 2 },
            DataType::BF16 => Layout::Unquantized { element_bytes: 2 },
            DataType::Q4_0 => Layout::Quantized {
                block_size: 32,
                block_bytes: 18,
            },
            DataType::Q8_0 => Layout::Quantized {
                block_size: 32,
                block_bytes: 34,
            },
        }
    }

    /// Number of elements per block, or 1 for unquantized types.
    pub fn block_size(&self) -> usize {
        match self.layout() {
            Layout::Unquantized { .. } => 1,
            Layout::Quantized { block_size, .. } => block_size,
        }
    }

    /// Bytes per element for unquantized types, or per block for quantized ones.
    pub fn size_in_bytes(&self) -> usize {
        match self.layout() {
            Layout::Unquantized { element_bytes } => element_bytes,
            Layout::Quantized { block_bytes, .. } => block_bytes,
        }
    }

    /// Byte length of `n_elements` elements stored as this type.
    ///
    /// Quantized types require `n_elements` to be a whole number of blocks.
    pub fn elements_to_bytes(&self, n_elements: usize) -> Result<usize> {
        match self.layout() {
            Layout::Unquantized { element_bytes } => n_elements
                .checked_mul(element_bytes)
                .ok_or(TensorError::SizeOverflow {
                    data_type: *self,
                    n_elements,
                }),
            Layout::Quantized {
                block_size,
                block_bytes,
            } => {
                if n_elements % block_size != 0 {
                    return Err(TensorError::InvalidBlockSize {
                        data_type: *self,
                        n_elements,
                        block_size,
                    });
                }
                (n_elements / block_size)
                    .checked_mul(block_bytes)
                    .ok_or(TensorError::SizeOverflow {
                        data_type: *self,
                        n_elements,
                    })
            }
        }
    }

    /// Converts a GGUF tensor type ID to a `DataType`.
    ///
    /// GGUF type IDs:
    /// - 0 => F32
    /// - 1 => F16
    /// - 2 => Q4_0
    /// - 8 => Q8_0
    /// - 30 => BF16
    pub fn from_gguf_type(id: u32) -> Option<DataType> {
        match id {
            0 => Some(DataType::F32),
            1 => Some(DataType::F16),
            2 => Some(DataType::Q4_0),
            8 => Some(DataType::Q8_0),
            30 => Some(DataType::BF16),
            _ => None,
        }
    }

    /// Returns the GGUF type ID for this `DataType`.
    pub fn to_gguf_type(&self) -> u32 {
        match self {
            DataType::F32 => 0,
            DataType::F16 => 1,
            DataType::Q4_0 => 2,
            DataType::Q8_0 => 8,
            DataType::BF16 => 30,
        }
    }

    pub fn is_quantized(&self) -> bool {
        matches!(self.layout(), Layout::Quantized { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::F32 => "F32",
            DataType::F16 => "F16",
            DataType::BF16 => "BF16",
            DataType::Q4_0 => "Q4_0",
            DataType::Q8_0 => "Q8_0",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}
