use std::io::{BufReader, Seek};
use std::path::Path;

use memmap2::Mmap;

use gs_tensor::{quant, ByteOrder};

use super::header::{GgufHeader, GGUF_DEFAULT_ALIGNMENT};
use super::metadata::GgufMetadata;
use super::tensor_info::{self, GgufTensorInfo};
use crate::error::{ModelError, Result};

/// Metadata key overriding the tensor data alignment.
pub const KEY_ALIGNMENT: &str = "general.alignment";

/// A parsed GGUF file backed by a memory-mapped region.
///
/// After parsing the header, metadata, and tensor info table from the file,
/// the entire file is memory-mapped so that tensor data can be accessed
/// without additional reads.
pub struct GgufFile {
    /// Parsed header (version, tensor/KV counts, byte order).
    pub header: GgufHeader,
    /// Parsed metadata key-value entries.
    pub metadata: GgufMetadata,
    /// Parsed tensor info entries (name, shape, dtype, offset), in file order.
    pub tensor_infos: Vec<GgufTensorInfo>,
    /// Memory-mapped file contents.
    mmap: Mmap,
    /// Byte offset within the file where tensor data begins (aligned).
    data_offset: usize,
}

impl GgufFile {
    /// Open and parse a GGUF file from disk.
    ///
    /// This reads the header, metadata, and tensor info table sequentially
    /// using buffered I/O, then memory-maps the entire file so tensor data
    /// can be accessed via slices.
    pub fn open(path: &Path) -> Result<GgufFile> {
        let file = std::fs::File::open(path)?;
        let mut reader = BufReader::new(&file);

        let header = GgufHeader::parse(&mut reader)?;
        let order = header.byte_order;
        let metadata = GgufMetadata::parse_kv(&mut reader, header.n_kv, order)?;
        let tensor_infos = tensor_info::parse_tensor_infos(&mut reader, header.n_tensors, order)?;

        let alignment = if metadata.contains_key(KEY_ALIGNMENT) {
            let a = metadata.get_uint(KEY_ALIGNMENT)? as usize;
            if a == 0 || !a.is_power_of_two() {
                return Err(ModelError::InvalidValue {
                    key: KEY_ALIGNMENT.to_string(),
                    reason: format!("{} is not a power of two", a),
                });
            }
            a
        } else {
            GGUF_DEFAULT_ALIGNMENT
        };

        // Determine current position in the file (end of tensor info table).
        let current_pos = reader.stream_position()? as usize;

        // Align to find where tensor data starts.
        let data_offset = current_pos.next_multiple_of(alignment);

        // Memory-map the entire file.
        // SAFETY: the map is read-only and we do not modify the file while it is open.
        let mmap = unsafe { Mmap::map(&file)? };

        Ok(GgufFile {
            header,
            metadata,
            tensor_infos,
            mmap,
            data_offset,
        })
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Get a raw byte slice for a tensor's data within the memory-mapped file.
    pub fn tensor_data(&self, info: &GgufTensorInfo) -> Result<&[u8]> {
        let size = info.data_size()?;
        let file_len = self.mmap.len();
        let out_of_bounds = |start: usize, end: usize| ModelError::TensorOutOfBounds {
            name: info.name.clone(),
            start,
            end,
            file_len,
        };

        let start = usize::try_from(info.offset)
            .ok()
            .and_then(|off| self.data_offset.checked_add(off))
            .ok_or_else(|| out_of_bounds(usize::MAX, usize::MAX))?;
        let end = start
            .checked_add(size)
            .ok_or_else(|| out_of_bounds(start, usize::MAX))?;
        if end > file_len {
            return Err(out_of_bounds(start, end));
        }
        Ok(&self.mmap[start..end])
    }

    /// Load a tensor by name, dequantizing to f32 if needed.
    pub fn get_tensor_f32(&self, name: &str) -> Result<Vec<f32>> {
        let info = self
            .tensor_infos
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ModelError::InvalidValue {
                key: name.to_string(),
                reason: "no such tensor".to_string(),
            })?;

        let raw = self.tensor_data(info)?;
        quant::dequantize(raw, info.dtype, info.numel(), self.byte_order())
            .map_err(|e| ModelError::for_tensor(name, e))
    }
}
