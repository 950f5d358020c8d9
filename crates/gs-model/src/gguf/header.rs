use std::io::{Read, Write};

use gs_tensor::ByteOrder;

use crate::error::{ModelError, Result};

/// The four-byte magic number identifying a GGUF file: ASCII "GGUF".
pub const GGUF_MAGIC: [u8; 4] = [0x47, 0x47, 0x55, 0x46];

/// GGUF version written by this crate.
pub const GGUF_VERSION: u32 = 3;

/// Default alignment (in bytes) for tensor data within a GGUF file.
pub const GGUF_DEFAULT_ALIGNMENT: usize = 32;

/// Parsed GGUF file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GgufHeader {
    /// GGUF format version (v2 and v3 are read, v3 is written).
    pub version: u32,
    /// Number of tensors stored in the file.
    pub n_tensors: u64,
    /// Number of key-value metadata entries.
    pub n_kv: u64,
    /// Byte order of every multi-byte field after the magic.
    pub byte_order: ByteOrder,
}

impl GgufHeader {
    /// Parse a GGUF header from the beginning of a reader.
    ///
    /// Reads and validates the 4-byte magic, then the version, tensor count
    /// and KV count. A big-endian file is recognised by its version: read
    /// as little-endian, its low 16 bits are zero.
    pub fn parse(reader: &mut impl Read) -> Result<GgufHeader> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != GGUF_MAGIC {
            return Err(ModelError::InvalidMagic(magic));
        }

        let mut buf4 = [0u8; 4];
        reader.read_exact(&mut buf4)?;
        let mut version = u32::from_le_bytes(buf4);
        let byte_order = if version & 0xFFFF == 0 {
            version = version.swap_bytes();
            ByteOrder::Big
        } else {
            ByteOrder::Little
        };
        if version != 2 && version != 3 {
            return Err(ModelError::UnsupportedVersion(version));
        }

        let mut buf8 = [0u8; 8];
        reader.read_exact(&mut buf8)?;
        let n_tensors = u64::from_le_bytes(byte_order.arrange(buf8));

        reader.read_exact(&mut buf8)?;
        let n_kv = u64::from_le_bytes(byte_order.arrange(buf8));

        Ok(GgufHeader {
            version,
            n_tensors,
            n_kv,
            byte_order,
        })
    }

    /// Write the header. The magic is always the raw bytes "GGUF"; every
    /// other field follows `byte_order`.
    pub fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        let order = self.byte_order;
        writer.write_all(&GGUF_MAGIC)?;
        writer.write_all(&order.arrange(self.version.to_le_bytes()))?;
        writer.write_all(&order.arrange(self.n_tensors.to_le_bytes()))?;
        writer.write_all(&order.arrange(self.n_kv.to_le_bytes()))?;
        Ok(())
    }
}
