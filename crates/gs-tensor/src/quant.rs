//! Element conversion between on-disk data types.
//!
//! Decoding turns any supported source payload into f32 values; encoding
//! produces F32, F16 or Q8_0 payloads in a requested byte order. Q8_0 is the
//! only block format we can produce.

use std::borrow::Cow;

use half::{bf16, f16};

use crate::dtype::DataType;
use crate::endian::ByteOrder;
use crate::error::{Result, TensorError};

/// Elements per Q8_0 block.
pub const QK8_0: usize = 32;

/// One Q8_0 record: a shared f16 scale followed by 32 signed codes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockQ8_0 {
    pub d: f16,
    pub qs: [i8; QK8_0],
}

impl BlockQ8_0 {
    /// Encoded size of one block (2-byte scale + 32 codes).
    pub const BYTES: usize = 2 + QK8_0;

    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.d.to_le_bytes());
        out.extend(self.qs.iter().map(|&q| q as u8));
    }
}

/// Quantize f32 values into Q8_0 blocks.
///
/// Per block, `d = max|x| / 127` and each code is `x / d` rounded half to
/// even. A block of zeros gets `d = 0` and all-zero codes. Codes outside the
/// i8 range saturate; NaN codes become 0.
pub fn quantize_q8_0(values: &[f32]) -> Result<Vec<BlockQ8_0>> {
    if values.len() % QK8_0 != 0 {
        return Err(TensorError::InvalidBlockSize {
            data_type: DataType::Q8_0,
            n_elements: values.len(),
            block_size: QK8_0,
        });
    }
    Ok(values.chunks_exact(QK8_0).map(quantize_block_q8_0).collect())
}

fn quantize_block_q8_0(block: &[f32]) -> BlockQ8_0 {
    let amax = block.iter().fold(0.0f32, |m, x| m.max(x.abs()));
    let d = amax / 127.0;

    let mut qs = [0i8; QK8_0];
    if d != 0.0 {
        for (q, &x) in qs.iter_mut().zip(block) {
            *q = saturate_i8((x / d).round_ties_even());
        }
    }

    BlockQ8_0 {
        d: f16::from_f32(d),
        qs,
    }
}

fn saturate_i8(v: f32) -> i8 {
    v.clamp(i8::MIN as f32, i8::MAX as f32) as i8
}

/// Decode a raw payload of `n_elements` elements to f32.
pub fn dequantize(
    data: &[u8],
    data_type: DataType,
    n_elements: usize,
    order: ByteOrder,
) -> Result<Vec<f32>> {
    check_len(data, data_type, n_elements)?;

    let out = match data_type {
        DataType::F32 => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes(order.arrange([b[0], b[1], b[2], b[3]])))
            .collect(),
        DataType::F16 => data
            .chunks_exact(2)
            .map(|b| f16::from_le_bytes(order.arrange([b[0], b[1]])).to_f32())
            .collect(),
        DataType::BF16 => data
            .chunks_exact(2)
            .map(|b| bf16::from_le_bytes(order.arrange([b[0], b[1]])).to_f32())
            .collect(),
        DataType::Q4_0 => dequantize_q4_0(data, n_elements, order),
        DataType::Q8_0 => dequantize_q8_0(data, n_elements, order),
    };
    Ok(out)
}

/// Dequantize Q4_0 blocks to f32.
///
/// Q4_0 block layout (18 bytes total, 32 elements per block):
///   - 2 bytes: f16 scale factor
///   - 16 bytes: packed 4-bit values; byte `j` holds element `j` in its low
///     nibble and element `j + 16` in its high nibble
///
/// Each 4-bit value is unsigned (0..15); dequantized as: (nibble - 8) * scale.
fn dequantize_q4_0(data: &[u8], n_elements: usize, order: ByteOrder) -> Vec<f32> {
    let mut out = Vec::with_capacity(n_elements);

    for block in data.chunks_exact(DataType::Q4_0.size_in_bytes()) {
        let scale = f16::from_le_bytes(order.arrange([block[0], block[1]])).to_f32();
        let nibbles = &block[2..];

        for &byte in nibbles {
            out.push(((byte & 0x0F) as i32 - 8) as f32 * scale);
        }
        for &byte in nibbles {
            out.push(((byte >> 4) as i32 - 8) as f32 * scale);
        }
    }
    out
}

/// Dequantize Q8_0 blocks to f32.
///
/// Q8_0 block layout (34 bytes total, 32 elements per block):
///   - 2 bytes: f16 scale factor
///   - 32 bytes: 32 signed 8-bit values
///
/// Dequantized as: value * scale.
fn dequantize_q8_0(data: &[u8], n_elements: usize, order: ByteOrder) -> Vec<f32> {
    let mut out = Vec::with_capacity(n_elements);

    for block in data.chunks_exact(BlockQ8_0::BYTES) {
        let scale = f16::from_le_bytes(order.arrange([block[0], block[1]])).to_f32();
        out.extend(block[2..].iter().map(|&q| q as i8 as f32 * scale));
    }
    out
}

/// Encode f32 values as `target` in byte order `order`.
pub fn quantize(values: &[f32], target: DataType, order: ByteOrder) -> Result<Vec<u8>> {
    match target {
        DataType::F32 => Ok(values
            .iter()
            .flat_map(|v| order.arrange(v.to_le_bytes()))
            .collect()),
        DataType::F16 => Ok(values
            .iter()
            .flat_map(|&v| order.arrange(f16::from_f32(v).to_le_bytes()))
            .collect()),
        DataType::Q8_0 => {
            if order.is_big() {
                return Err(TensorError::BigEndianUnsupported(target));
            }
            let blocks = quantize_q8_0(values)?;
            let mut out = Vec::with_capacity(blocks.len() * BlockQ8_0::BYTES);
            for block in &blocks {
                block.write_le(&mut out);
            }
            Ok(out)
        }
        DataType::BF16 | DataType::Q4_0 => {
            Err(TensorError::UnsupportedQuantization(target.name().to_string()))
        }
    }
}

/// Convert a payload from one data type and byte order to another.
///
/// Matching types are passed through (byte-swapped if the orders differ);
/// anything else goes through f32.
pub fn convert<'a>(
    data: &'a [u8],
    from: DataType,
    to: DataType,
    n_elements: usize,
    src_order: ByteOrder,
    dst_order: ByteOrder,
) -> Result<Cow<'a, [u8]>> {
    if to == DataType::Q8_0 && dst_order.is_big() {
        return Err(TensorError::BigEndianUnsupported(to));
    }

    if from == to {
        check_len(data, from, n_elements)?;
        if src_order == dst_order {
            return Ok(Cow::Borrowed(data));
        }
        return Ok(Cow::Owned(swap_byte_order(data, from)));
    }

    let values = dequantize(data, from, n_elements, src_order)?;
    quantize(&values, to, dst_order).map(Cow::Owned)
}

/// Swap every multi-byte field of a payload. Block formats only carry one
/// multi-byte field, the leading f16 scale.
fn swap_byte_order(data: &[u8], data_type: DataType) -> Vec<u8> {
    let mut out = data.to_vec();
    let width = data_type.size_in_bytes();
    for chunk in out.chunks_exact_mut(width) {
        if data_type.is_quantized() {
            chunk.swap(0, 1);
        } else {
            chunk.reverse();
        }
    }
    out
}

fn check_len(data: &[u8], data_type: DataType, n_elements: usize) -> Result<()> {
    let expected = data_type.elements_to_bytes(n_elements)?;
    if data.len() != expected {
        return Err(TensorError::BufferLength {
            data_type,
            expected,
            got: data.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_q8_0_constant_blocks() {
        let values = vec![2.0f32; 64];
        let blocks = quantize_q8_0(&values).unwrap();
        assert_eq!(blocks.len(), 2);
        for block in &blocks {
            assert_relative_eq!(block.d.to_f32(), 2.0 / 127.0, max_relative = 1e-3);
            assert_abs_diff_eq!(block.d.to_f32(), 0.015748, epsilon = 1e-4);
            assert!(block.qs.iter().all(|&q| q == 127));
        }
    }

    #[test]
    fn test_q8_0_zero_block() {
        let blocks = quantize_q8_0(&[0.0f32; 32]).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].d.to_f32(), 0.0);
        assert_eq!(blocks[0].qs, [0i8; 32]);
    }

    #[test]
    fn test_q8_0_rejects_partial_block() {
        let err = quantize_q8_0(&[1.0f32; 40]).unwrap_err();
        assert!(matches!(
            err,
            TensorError::InvalidBlockSize { n_elements: 40, .. }
        ));
    }

    #[test]
    fn test_q8_0_signs_and_scale() {
        let mut values = vec![0.0f32; 32];
        values[0] = -4.0;
        values[1] = 3.0;
        values[2] = 1.0;
        let blocks = quantize_q8_0(&values).unwrap();
        let b = &blocks[0];
        assert_eq!(b.qs[0], -127);
        // 3.0 / (4/127) = 95.25
        assert_eq!(b.qs[1], 95);
        // 1.0 / (4/127) = 31.75
        assert_eq!(b.qs[2], 32);
        assert!(b.qs[3..].iter().all(|&q| q == 0));
    }

    #[test]
    fn test_q8_0_bytes_layout() {
        let bytes = quantize(&[2.0f32; 32], DataType::Q8_0, ByteOrder::Little).unwrap();
        assert_eq!(bytes.len(), BlockQ8_0::BYTES);
        let d = f16::from_le_bytes([bytes[0], bytes[1]]);
        assert_eq!(d, f16::from_f32(2.0 / 127.0));
        assert!(bytes[2..].iter().all(|&b| b as i8 == 127));
    }

    #[test]
    fn test_q8_0_big_endian_rejected() {
        let err = quantize(&[1.0f32; 32], DataType::Q8_0, ByteOrder::Big).unwrap_err();
        assert!(matches!(err, TensorError::BigEndianUnsupported(DataType::Q8_0)));
    }

    #[test]
    fn test_dequantize_q8_0_recovers_values() {
        let values: Vec<f32> = (0..32).map(|i| i as f32 - 16.0).collect();
        let bytes = quantize(&values, DataType::Q8_0, ByteOrder::Little).unwrap();
        let back = dequantize(&bytes, DataType::Q8_0, 32, ByteOrder::Little).unwrap();
        for (a, b) in values.iter().zip(&back) {
            assert_abs_diff_eq!(a, b, epsilon = 0.1);
        }
    }

    #[test]
    fn test_dequantize_q4_0_nibble_order() {
        // scale 1.0, byte 0 = 0x9A -> element 0 = 10 - 8, element 16 = 9 - 8
        let mut block = vec![0u8; 18];
        block[..2].copy_from_slice(&f16::from_f32(1.0).to_le_bytes());
        for b in &mut block[2..] {
            *b = 0x88;
        }
        block[2] = 0x9A;
        let out = dequantize(&block, DataType::Q4_0, 32, ByteOrder::Little).unwrap();
        assert_eq!(out[0], 2.0);
        assert_eq!(out[16], 1.0);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn test_dequantize_bf16() {
        let v = bf16::from_f32(1.5);
        let out = dequantize(&v.to_le_bytes(), DataType::BF16, 1, ByteOrder::Little).unwrap();
        assert_eq!(out, vec![1.5]);
    }

    #[test]
    fn test_dequantize_length_check() {
        let err = dequantize(&[0u8; 6], DataType::F32, 2, ByteOrder::Little).unwrap_err();
        assert!(matches!(
            err,
            TensorError::BufferLength {
                expected: 8,
                got: 6,
                ..
            }
        ));
    }

    #[test]
    fn test_f16_encode_big_endian() {
        let bytes = quantize(&[1.0], DataType::F16, ByteOrder::Big).unwrap();
        assert_eq!(bytes, f16::from_f32(1.0).to_be_bytes().to_vec());
    }

    #[test]
    fn test_convert_passthrough_borrows() {
        let raw: Vec<u8> = [1.0f32, 2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let out = convert(
            &raw,
            DataType::F32,
            DataType::F32,
            2,
            ByteOrder::Little,
            ByteOrder::Little,
        )
        .unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(&*out, raw.as_slice());
    }

    #[test]
    fn test_convert_swaps_order() {
        let raw = 1.0f32.to_le_bytes();
        let out = convert(
            &raw,
            DataType::F32,
            DataType::F32,
            1,
            ByteOrder::Little,
            ByteOrder::Big,
        )
        .unwrap();
        assert_eq!(&*out, &1.0f32.to_be_bytes());
    }

    #[test]
    fn test_convert_f32_to_f16() {
        let raw: Vec<u8> = [0.5f32, -3.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let out = convert(
            &raw,
            DataType::F32,
            DataType::F16,
            2,
            ByteOrder::Little,
            ByteOrder::Little,
        )
        .unwrap();
        let back = dequantize(&out, DataType::F16, 2, ByteOrder::Little).unwrap();
        assert_eq!(back, vec![0.5, -3.0]);
    }

    #[test]
    fn test_convert_to_unsupported_target() {
        let raw = [0u8; 4];
        let err = convert(
            &raw,
            DataType::F32,
            DataType::Q4_0,
            1,
            ByteOrder::Little,
            ByteOrder::Little,
        )
        .unwrap_err();
        assert!(matches!(err, TensorError::UnsupportedQuantization(_)));
    }
}
