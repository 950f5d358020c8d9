use std::fmt;

use crate::dtype::DataType;
use crate::error::{Result, TensorError};
use crate::shape::Shape;

/// Overall precision of an output container, as recorded in `general.file_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    AllF32,
    /// F16 except for 1D tensors.
    MostlyF16,
    /// Q8_0 except for 1D tensors.
    MostlyQ8_0,
}

impl FileType {
    /// Maps a `general.file_type` value to a file type.
    ///
    /// Values naming file types we cannot produce (the other llama.cpp
    /// quantization mixes) fail with `UnsupportedQuantization`.
    pub fn from_gguf(id: u32) -> Result<FileType> {
        match id {
            0 => Ok(FileType::AllF32),
            1 => Ok(FileType::MostlyF16),
            7 => Ok(FileType::MostlyQ8_0),
            other => Err(TensorError::UnsupportedQuantization(format!(
                "file type {}",
                other
            ))),
        }
    }

    pub fn to_gguf(&self) -> u32 {
        match self {
            FileType::AllF32 => 0,
            FileType::MostlyF16 => 1,
            FileType::MostlyQ8_0 => 7,
        }
    }

    /// The data type multi-dimensional tensors are stored as.
    pub fn data_type(&self) -> DataType {
        match self {
            FileType::AllF32 => DataType::F32,
            FileType::MostlyF16 => DataType::F16,
            FileType::MostlyQ8_0 => DataType::Q8_0,
        }
    }

    /// Resolve the on-disk type of one tensor. 1D tensors (biases and norm
    /// weights) are always F32.
    pub fn type_for_tensor(&self, shape: &Shape) -> DataType {
        if shape.ndim() > 1 {
            self.data_type()
        } else {
            DataType::F32
        }
    }

    /// Short lowercase name, used for default output file names.
    pub fn short_name(&self) -> &'static str {
        match self {
            FileType::AllF32 => "f32",
            FileType::MostlyF16 => "f16",
            FileType::MostlyQ8_0 => "q8_0",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::AllF32 => write!(f, "AllF32"),
            FileType::MostlyF16 => write!(f, "MostlyF16"),
            FileType::MostlyQ8_0 => write!(f, "MostlyQ8_0"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [FileType; 3] = [FileType::AllF32, FileType::MostlyF16, FileType::MostlyQ8_0];

    #[test]
    fn test_gguf_ids() {
        for ft in &ALL {
            assert_eq!(FileType::from_gguf(ft.to_gguf()).unwrap(), *ft);
        }
    }

    #[test]
    fn test_unsupported_file_type() {
        // 2 is MostlyQ4_0 in llama.cpp; we do not produce it.
        let err = FileType::from_gguf(2).unwrap_err();
        assert!(matches!(err, TensorError::UnsupportedQuantization(_)));
    }

    #[test]
    fn test_rank_one_is_always_f32() {
        let vector = Shape::new(vec![4096]);
        for ft in &ALL {
            assert_eq!(ft.type_for_tensor(&vector), DataType::F32);
        }
    }

    #[test]
    fn test_matrix_uses_file_type() {
        let matrix = Shape::new(vec![4096, 4096]);
        assert_eq!(FileType::AllF32.type_for_tensor(&matrix), DataType::F32);
        assert_eq!(FileType::MostlyF16.type_for_tensor(&matrix), DataType::F16);
        assert_eq!(FileType::MostlyQ8_0.type_for_tensor(&matrix), DataType::Q8_0);
    }
}
