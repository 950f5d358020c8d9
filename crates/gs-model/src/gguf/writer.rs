use std::fmt;
use std::io::Write;

use gs_tensor::{ByteOrder, DataType, Shape};

use super::header::{GgufHeader, GGUF_DEFAULT_ALIGNMENT, GGUF_VERSION};
use super::metadata::{write_kv, GgufMetadataValue};
use super::tensor_info::GgufTensorInfo;
use crate::error::{ModelError, Result};

/// Progress of a `GgufWriter` through the file sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WriterState {
    Unopened,
    HeaderWritten,
    MetadataWritten,
    TensorInfoWritten,
    DataWritten,
    Closed,
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Streaming GGUF writer.
///
/// KV entries and tensor-info entries are staged in memory, then the
/// sections are emitted strictly in order: header, KV data, tensor-info
/// directory, tensor payloads. Calling a stage out of order is a bug in
/// the caller and panics.
pub struct GgufWriter {
    byte_order: ByteOrder,
    kv: Vec<(String, GgufMetadataValue)>,
    tensors: Vec<GgufTensorInfo>,
    /// Unpadded payload length of each registered tensor.
    sizes: Vec<usize>,
    /// End of the (padded) data section as registered so far.
    data_end: u64,
    next_tensor: usize,
    /// Bytes written to the sink.
    position: u64,
    state: WriterState,
}

impl GgufWriter {
    pub fn new(byte_order: ByteOrder) -> Self {
        Self {
            byte_order,
            kv: Vec::new(),
            tensors: Vec::new(),
            sizes: Vec::new(),
            data_end: 0,
            next_tensor: 0,
            position: 0,
            state: WriterState::Unopened,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn kv_count(&self) -> usize {
        self.kv.len()
    }

    fn expect_state(&self, expected: WriterState, op: &str) {
        assert!(
            self.state == expected,
            "GgufWriter::{op} called in state {}, expected {}",
            self.state,
            expected
        );
    }

    /// Stage one metadata entry.
    pub fn add_kv(&mut self, key: impl Into<String>, value: GgufMetadataValue) {
        self.expect_state(WriterState::Unopened, "add_kv");
        self.kv.push((key.into(), value));
    }

    /// Stage one tensor-info entry. `n_bytes` is the exact payload length
    /// that `write_tensor_data` will later receive for this tensor.
    pub fn add_tensor_info(&mut self, name: &str, shape: &Shape, dtype: DataType, n_bytes: usize) {
        self.expect_state(WriterState::Unopened, "add_tensor_info");
        self.tensors.push(GgufTensorInfo {
            name: name.to_string(),
            shape: shape.clone(),
            dtype,
            offset: self.data_end,
        });
        self.sizes.push(n_bytes);
        self.data_end += n_bytes.next_multiple_of(GGUF_DEFAULT_ALIGNMENT) as u64;
    }

    fn emit(&mut self, w: &mut impl Write, bytes: &[u8]) -> Result<()> {
        w.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    fn pad(&mut self, w: &mut impl Write) -> Result<()> {
        let pos = self.position as usize;
        let padding = pos.next_multiple_of(GGUF_DEFAULT_ALIGNMENT) - pos;
        if padding > 0 {
            self.emit(w, &vec![0u8; padding])?;
        }
        Ok(())
    }

    pub fn write_header(&mut self, w: &mut impl Write) -> Result<()> {
        self.expect_state(WriterState::Unopened, "write_header");
        let header = GgufHeader {
            version: GGUF_VERSION,
            n_tensors: self.tensors.len() as u64,
            n_kv: self.kv.len() as u64,
            byte_order: self.byte_order,
        };
        let mut buf = Vec::with_capacity(24);
        header.write_to(&mut buf)?;
        self.emit(w, &buf)?;
        self.state = WriterState::HeaderWritten;
        Ok(())
    }

    pub fn write_kv_data(&mut self, w: &mut impl Write) -> Result<()> {
        self.expect_state(WriterState::HeaderWritten, "write_kv_data");
        let mut buf = Vec::new();
        for (key, value) in &self.kv {
            write_kv(&mut buf, key, value, self.byte_order)?;
        }
        self.emit(w, &buf)?;
        self.state = WriterState::MetadataWritten;
        Ok(())
    }

    /// Write the header and the KV section.
    pub fn write_header_and_kv(&mut self, w: &mut impl Write) -> Result<()> {
        self.write_header(w)?;
        self.write_kv_data(w)
    }

    /// Write the tensor-info directory and pad to the data alignment.
    pub fn write_ti_data(&mut self, w: &mut impl Write) -> Result<()> {
        self.expect_state(WriterState::MetadataWritten, "write_ti_data");
        let mut buf = Vec::new();
        for info in &self.tensors {
            info.write_to(&mut buf, self.byte_order)?;
        }
        self.emit(w, &buf)?;
        self.pad(w)?;
        self.state = if self.tensors.is_empty() {
            WriterState::DataWritten
        } else {
            WriterState::TensorInfoWritten
        };
        Ok(())
    }

    /// Write the payload of the next registered tensor, followed by padding.
    pub fn write_tensor_data(&mut self, w: &mut impl Write, data: &[u8]) -> Result<()> {
        self.expect_state(WriterState::TensorInfoWritten, "write_tensor_data");
        let idx = self.next_tensor;
        if data.len() != self.sizes[idx] {
            return Err(ModelError::TensorSizeMismatch {
                name: self.tensors[idx].name.clone(),
                expected: self.sizes[idx],
                got: data.len(),
            });
        }
        self.emit(w, data)?;
        self.pad(w)?;
        self.next_tensor += 1;
        if self.next_tensor == self.tensors.len() {
            self.state = WriterState::DataWritten;
        }
        Ok(())
    }

    /// Flush the sink and close the writer. Returns the total bytes written.
    pub fn finish(&mut self, w: &mut impl Write) -> Result<u64> {
        self.expect_state(WriterState::DataWritten, "finish");
        w.flush()?;
        self.state = WriterState::Closed;
        Ok(self.position)
    }
}
