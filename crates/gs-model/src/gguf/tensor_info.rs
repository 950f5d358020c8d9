use std::io::{Read, Write};

use gs_tensor::{ByteOrder, DataType, Shape};

use super::metadata::{read_gguf_string, read_le, write_gguf_string};
use crate::error::{ModelError, Result};

/// Describes a single tensor stored within a GGUF file.
#[derive(Debug, Clone, PartialEq)]
pub struct GgufTensorInfo {
    /// Tensor name (e.g. "blk.0.attn_q.weight").
    pub name: String,
    /// Dimension sizes in on-disk order.
    pub shape: Shape,
    /// Data type of the stored tensor data.
    pub dtype: DataType,
    /// Byte offset of this tensor's data from the start of the tensor data section.
    pub offset: u64,
}

impl GgufTensorInfo {
    /// Total number of elements in this tensor.
    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Compute the total byte size of this tensor's raw data in the file.
    pub fn data_size(&self) -> Result<usize> {
        self.dtype
            .elements_to_bytes(self.numel())
            .map_err(|e| ModelError::for_tensor(&self.name, e))
    }

    /// Write this entry in directory format.
    pub fn write_to(&self, writer: &mut impl Write, order: ByteOrder) -> Result<()> {
        write_gguf_string(writer, &self.name, order)?;
        let dims = self.shape.dims();
        writer.write_all(&order.arrange((dims.len() as u32).to_le_bytes()))?;
        for &d in dims {
            writer.write_all(&order.arrange(d.to_le_bytes()))?;
        }
        writer.write_all(&order.arrange(self.dtype.to_gguf_type().to_le_bytes()))?;
        writer.write_all(&order.arrange(self.offset.to_le_bytes()))?;
        Ok(())
    }
}

/// Parse `n_tensors` tensor info entries from a reader.
///
/// Each entry:
/// 1. GGUF string name
/// 2. u32 number of dimensions
/// 3. n_dims x u64 dimension sizes
/// 4. u32 GGUF type ID (mapped via `DataType::from_gguf_type`)
/// 5. u64 byte offset within the tensor data section
pub fn parse_tensor_infos(
    reader: &mut impl Read,
    n_tensors: u64,
    order: ByteOrder,
) -> Result<Vec<GgufTensorInfo>> {
    let mut infos = Vec::with_capacity(n_tensors.min(1 << 16) as usize);
    for _ in 0..n_tensors {
        let name = read_gguf_string(reader, order)?;

        let n_dims = u32::from_le_bytes(read_le(reader, order)?);
        let mut dims = Vec::with_capacity(n_dims.min(8) as usize);
        for _ in 0..n_dims {
            dims.push(u64::from_le_bytes(read_le(reader, order)?));
        }

        let type_id = u32::from_le_bytes(read_le(reader, order)?);
        let dtype =
            DataType::from_gguf_type(type_id).ok_or(ModelError::UnsupportedGgufType(type_id))?;

        let offset = u64::from_le_bytes(read_le(reader, order)?);

        let shape = Shape::new(dims);
        if shape.checked_numel().is_none() {
            return Err(ModelError::InvalidValue {
                key: name,
                reason: format!("element count of shape {:?} overflows", shape.dims()),
            });
        }

        infos.push(GgufTensorInfo {
            name,
            shape,
            dtype,
            offset,
        });
    }
    Ok(infos)
}
