use std::collections::HashMap;
use std::io::{Read, Write};

use gs_tensor::ByteOrder;

use crate::error::{ModelError, Result};

/// GGUF metadata value type IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GgufValueType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    Bool,
    String,
    Array,
    U64,
    I64,
    F64,
}

impl GgufValueType {
    /// GGUF value type IDs:
    ///   0=U8, 1=I8, 2=U16, 3=I16, 4=U32, 5=I32, 6=F32, 7=Bool,
    ///   8=String, 9=Array, 10=U64, 11=I64, 12=F64
    pub fn from_id(id: u32) -> Option<GgufValueType> {
        match id {
            0 => Some(GgufValueType::U8),
            1 => Some(GgufValueType::I8),
            2 => Some(GgufValueType::U16),
            3 => Some(GgufValueType::I16),
            4 => Some(GgufValueType::U32),
            5 => Some(GgufValueType::I32),
            6 => Some(GgufValueType::F32),
            7 => Some(GgufValueType::Bool),
            8 => Some(GgufValueType::String),
            9 => Some(GgufValueType::Array),
            10 => Some(GgufValueType::U64),
            11 => Some(GgufValueType::I64),
            12 => Some(GgufValueType::F64),
            _ => None,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            GgufValueType::U8 => 0,
            GgufValueType::I8 => 1,
            GgufValueType::U16 => 2,
            GgufValueType::I16 => 3,
            GgufValueType::U32 => 4,
            GgufValueType::I32 => 5,
            GgufValueType::F32 => 6,
            GgufValueType::Bool => 7,
            GgufValueType::String => 8,
            GgufValueType::Array => 9,
            GgufValueType::U64 => 10,
            GgufValueType::I64 => 11,
            GgufValueType::F64 => 12,
        }
    }
}

/// A single GGUF metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum GgufMetadataValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    /// Homogeneous array; the element type is kept so empty arrays survive a
    /// read/write cycle.
    Array {
        elem_type: GgufValueType,
        values: Vec<GgufMetadataValue>,
    },
}

impl GgufMetadataValue {
    pub fn value_type(&self) -> GgufValueType {
        match self {
            GgufMetadataValue::U8(_) => GgufValueType::U8,
            GgufMetadataValue::I8(_) => GgufValueType::I8,
            GgufMetadataValue::U16(_) => GgufValueType::U16,
            GgufMetadataValue::I16(_) => GgufValueType::I16,
            GgufMetadataValue::U32(_) => GgufValueType::U32,
            GgufMetadataValue::I32(_) => GgufValueType::I32,
            GgufMetadataValue::U64(_) => GgufValueType::U64,
            GgufMetadataValue::I64(_) => GgufValueType::I64,
            GgufMetadataValue::F32(_) => GgufValueType::F32,
            GgufMetadataValue::F64(_) => GgufValueType::F64,
            GgufMetadataValue::Bool(_) => GgufValueType::Bool,
            GgufMetadataValue::String(_) => GgufValueType::String,
            GgufMetadataValue::Array { .. } => GgufValueType::Array,
        }
    }

    /// Returns a human-readable name for the variant (used in error messages).
    fn type_name(&self) -> String {
        format!("{:?}", self.value_type())
    }

    /// Build a string array value.
    pub fn string_array<S: AsRef<str>>(items: &[S]) -> GgufMetadataValue {
        GgufMetadataValue::Array {
            elem_type: GgufValueType::String,
            values: items
                .iter()
                .map(|s| GgufMetadataValue::String(s.as_ref().to_string()))
                .collect(),
        }
    }

    /// Build an f32 array value.
    pub fn f32_array(items: &[f32]) -> GgufMetadataValue {
        GgufMetadataValue::Array {
            elem_type: GgufValueType::F32,
            values: items.iter().map(|&v| GgufMetadataValue::F32(v)).collect(),
        }
    }

    /// Build an i32 array value.
    pub fn i32_array(items: &[i32]) -> GgufMetadataValue {
        GgufMetadataValue::Array {
            elem_type: GgufValueType::I32,
            values: items.iter().map(|&v| GgufMetadataValue::I32(v)).collect(),
        }
    }

    /// Any integer variant widened to i128, so every integer type can be
    /// range-checked against its target in one place.
    fn as_integer(&self) -> Option<i128> {
        match *self {
            GgufMetadataValue::U8(v) => Some(v as i128),
            GgufMetadataValue::I8(v) => Some(v as i128),
            GgufMetadataValue::U16(v) => Some(v as i128),
            GgufMetadataValue::I16(v) => Some(v as i128),
            GgufMetadataValue::U32(v) => Some(v as i128),
            GgufMetadataValue::I32(v) => Some(v as i128),
            GgufMetadataValue::U64(v) => Some(v as i128),
            GgufMetadataValue::I64(v) => Some(v as i128),
            _ => None,
        }
    }
}

fn mismatch(key: &str, expected: &str, got: &GgufMetadataValue) -> ModelError {
    ModelError::TypeMismatch {
        key: key.to_string(),
        expected: expected.to_string(),
        got: got.type_name(),
    }
}

/// Collection of GGUF metadata key-value pairs.
#[derive(Debug, Clone, Default)]
pub struct GgufMetadata {
    pub entries: HashMap<String, GgufMetadataValue>,
}

impl GgufMetadata {
    pub fn get(&self, key: &str) -> Option<&GgufMetadataValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn require(&self, key: &str) -> Result<&GgufMetadataValue> {
        self.entries
            .get(key)
            .ok_or_else(|| ModelError::MissingRequiredField(key.to_string()))
    }

    /// Retrieve a string value by key.
    pub fn get_string(&self, key: &str) -> Result<&str> {
        match self.require(key)? {
            GgufMetadataValue::String(s) => Ok(s.as_str()),
            other => Err(mismatch(key, "String", other)),
        }
    }

    /// Retrieve a u32 value by key.
    pub fn get_u32(&self, key: &str) -> Result<u32> {
        match self.require(key)? {
            GgufMetadataValue::U32(v) => Ok(*v),
            other => Err(mismatch(key, "U32", other)),
        }
    }

    /// Retrieve an f32 value by key.
    pub fn get_f32(&self, key: &str) -> Result<f32> {
        match self.require(key)? {
            GgufMetadataValue::F32(v) => Ok(*v),
            other => Err(mismatch(key, "F32", other)),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.require(key)? {
            GgufMetadataValue::Bool(v) => Ok(*v),
            other => Err(mismatch(key, "Bool", other)),
        }
    }

    /// Retrieve any non-negative integer that fits in a u32.
    ///
    /// Writers disagree on the integer width of counts and ids, so the
    /// extractor accepts all of them.
    pub fn get_uint(&self, key: &str) -> Result<u32> {
        let value = self.require(key)?;
        let wide = value
            .as_integer()
            .ok_or_else(|| mismatch(key, "unsigned integer", value))?;
        u32::try_from(wide).map_err(|_| ModelError::InvalidValue {
            key: key.to_string(),
            reason: format!("{} does not fit in a u32", wide),
        })
    }

    /// Retrieve an F32 or F64 value as f32.
    pub fn get_float(&self, key: &str) -> Result<f32> {
        match self.require(key)? {
            GgufMetadataValue::F32(v) => Ok(*v),
            GgufMetadataValue::F64(v) => Ok(*v as f32),
            other => Err(mismatch(key, "F32", other)),
        }
    }

    fn get_array(&self, key: &str) -> Result<&[GgufMetadataValue]> {
        match self.require(key)? {
            GgufMetadataValue::Array { values, .. } => Ok(values),
            other => Err(mismatch(key, "Array", other)),
        }
    }

    /// Retrieve a string array value by key.
    pub fn get_string_array(&self, key: &str) -> Result<Vec<String>> {
        let arr = self.get_array(key)?;
        let mut result = Vec::with_capacity(arr.len());
        for (i, v) in arr.iter().enumerate() {
            match v {
                GgufMetadataValue::String(s) => result.push(s.clone()),
                other => return Err(mismatch(&format!("{}[{}]", key, i), "String", other)),
            }
        }
        Ok(result)
    }

    /// Retrieve a float array by key; F64 elements are narrowed to f32.
    pub fn get_f32_array(&self, key: &str) -> Result<Vec<f32>> {
        let arr = self.get_array(key)?;
        let mut result = Vec::with_capacity(arr.len());
        for (i, v) in arr.iter().enumerate() {
            match v {
                GgufMetadataValue::F32(f) => result.push(*f),
                GgufMetadataValue::F64(f) => result.push(*f as f32),
                other => return Err(mismatch(&format!("{}[{}]", key, i), "F32", other)),
            }
        }
        Ok(result)
    }

    /// Retrieve an integer array by key, as i32.
    pub fn get_i32_array(&self, key: &str) -> Result<Vec<i32>> {
        let arr = self.get_array(key)?;
        let mut result = Vec::with_capacity(arr.len());
        for (i, v) in arr.iter().enumerate() {
            let item_key = format!("{}[{}]", key, i);
            let wide = v
                .as_integer()
                .ok_or_else(|| mismatch(&item_key, "I32", v))?;
            let n = i32::try_from(wide).map_err(|_| ModelError::InvalidValue {
                key: item_key,
                reason: format!("{} does not fit in an i32", wide),
            })?;
            result.push(n);
        }
        Ok(result)
    }

    /// Parse `n_kv` key-value metadata entries from a reader.
    ///
    /// Each entry consists of:
    /// 1. A GGUF string key (u64 length + UTF-8 bytes).
    /// 2. A u32 value type ID.
    /// 3. The value payload, whose format depends on the type ID.
    pub fn parse_kv(reader: &mut impl Read, n_kv: u64, order: ByteOrder) -> Result<GgufMetadata> {
        let mut entries = HashMap::new();
        for _ in 0..n_kv {
            let key = read_gguf_string(reader, order)?;
            let type_id = u32::from_le_bytes(read_le(reader, order)?);
            let value = read_value(reader, type_id, order)?;
            entries.insert(key, value);
        }
        Ok(GgufMetadata { entries })
    }
}

/// Read N bytes stored in `order` and return them in little-endian order.
pub(crate) fn read_le<const N: usize>(reader: &mut impl Read, order: ByteOrder) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(order.arrange(buf))
}

/// Read a GGUF string: u64 length followed by that many UTF-8 bytes.
pub(crate) fn read_gguf_string(reader: &mut impl Read, order: ByteOrder) -> Result<String> {
    let len = u64::from_le_bytes(read_le(reader, order)?);
    // The length is untrusted; grow the buffer only as bytes actually arrive.
    let mut buf = Vec::with_capacity(len.min(1 << 20) as usize);
    reader.by_ref().take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(ModelError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("string of {} bytes truncated after {}", len, buf.len()),
        )));
    }
    String::from_utf8(buf).map_err(|e| ModelError::InvalidValue {
        key: "<string>".to_string(),
        reason: format!("invalid UTF-8: {}", e),
    })
}

/// Read a single GGUF metadata value given its type ID.
fn read_value(reader: &mut impl Read, type_id: u32, order: ByteOrder) -> Result<GgufMetadataValue> {
    let value_type =
        GgufValueType::from_id(type_id).ok_or(ModelError::UnsupportedGgufType(type_id))?;

    let value = match value_type {
        GgufValueType::U8 => GgufMetadataValue::U8(u8::from_le_bytes(read_le(reader, order)?)),
        GgufValueType::I8 => GgufMetadataValue::I8(i8::from_le_bytes(read_le(reader, order)?)),
        GgufValueType::U16 => GgufMetadataValue::U16(u16::from_le_bytes(read_le(reader, order)?)),
        GgufValueType::I16 => GgufMetadataValue::I16(i16::from_le_bytes(read_le(reader, order)?)),
        GgufValueType::U32 => GgufMetadataValue::U32(u32::from_le_bytes(read_le(reader, order)?)),
        GgufValueType::I32 => GgufMetadataValue::I32(i32::from_le_bytes(read_le(reader, order)?)),
        GgufValueType::F32 => GgufMetadataValue::F32(f32::from_le_bytes(read_le(reader, order)?)),
        GgufValueType::Bool => {
            let [b] = read_le::<1>(reader, order)?;
            GgufMetadataValue::Bool(b != 0)
        }
        GgufValueType::String => GgufMetadataValue::String(read_gguf_string(reader, order)?),
        GgufValueType::Array => {
            // Array: u32 element_type, u64 count, then count values of element_type
            let elem_id = u32::from_le_bytes(read_le(reader, order)?);
            let elem_type =
                GgufValueType::from_id(elem_id).ok_or(ModelError::UnsupportedGgufType(elem_id))?;
            let count = u64::from_le_bytes(read_le(reader, order)?) as usize;

            // Cap the pre-allocation; a corrupt count must not abort on OOM.
            let mut values = Vec::with_capacity(count.min(1 << 20));
            for _ in 0..count {
                values.push(read_value(reader, elem_id, order)?);
            }
            GgufMetadataValue::Array { elem_type, values }
        }
        GgufValueType::U64 => GgufMetadataValue::U64(u64::from_le_bytes(read_le(reader, order)?)),
        GgufValueType::I64 => GgufMetadataValue::I64(i64::from_le_bytes(read_le(reader, order)?)),
        GgufValueType::F64 => GgufMetadataValue::F64(f64::from_le_bytes(read_le(reader, order)?)),
    };
    Ok(value)
}

/// Write a GGUF string: u64 length followed by the UTF-8 bytes.
pub(crate) fn write_gguf_string(writer: &mut impl Write, s: &str, order: ByteOrder) -> Result<()> {
    writer.write_all(&order.arrange((s.len() as u64).to_le_bytes()))?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

/// Write one KV entry: key, value type ID, payload.
pub(crate) fn write_kv(
    writer: &mut impl Write,
    key: &str,
    value: &GgufMetadataValue,
    order: ByteOrder,
) -> Result<()> {
    write_gguf_string(writer, key, order)?;
    writer.write_all(&order.arrange(value.value_type().id().to_le_bytes()))?;
    write_payload(writer, key, value, order)
}

/// Write a value without its type ID.
fn write_payload(
    writer: &mut impl Write,
    key: &str,
    value: &GgufMetadataValue,
    order: ByteOrder,
) -> Result<()> {
    match value {
        GgufMetadataValue::U8(v) => writer.write_all(&[*v])?,
        GgufMetadataValue::I8(v) => writer.write_all(&v.to_le_bytes())?,
        GgufMetadataValue::U16(v) => writer.write_all(&order.arrange(v.to_le_bytes()))?,
        GgufMetadataValue::I16(v) => writer.write_all(&order.arrange(v.to_le_bytes()))?,
        GgufMetadataValue::U32(v) => writer.write_all(&order.arrange(v.to_le_bytes()))?,
        GgufMetadataValue::I32(v) => writer.write_all(&order.arrange(v.to_le_bytes()))?,
        GgufMetadataValue::U64(v) => writer.write_all(&order.arrange(v.to_le_bytes()))?,
        GgufMetadataValue::I64(v) => writer.write_all(&order.arrange(v.to_le_bytes()))?,
        GgufMetadataValue::F32(v) => writer.write_all(&order.arrange(v.to_le_bytes()))?,
        GgufMetadataValue::F64(v) => writer.write_all(&order.arrange(v.to_le_bytes()))?,
        GgufMetadataValue::Bool(v) => writer.write_all(&[*v as u8])?,
        GgufMetadataValue::String(s) => write_gguf_string(writer, s, order)?,
        GgufMetadataValue::Array { elem_type, values } => {
            writer.write_all(&order.arrange(elem_type.id().to_le_bytes()))?;
            writer.write_all(&order.arrange((values.len() as u64).to_le_bytes()))?;
            for (i, item) in values.iter().enumerate() {
                if item.value_type() != *elem_type {
                    return Err(ModelError::TypeMismatch {
                        key: format!("{}[{}]", key, i),
                        expected: format!("{:?}", elem_type),
                        got: item.type_name(),
                    });
                }
                write_payload(writer, key, item, order)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(entries: &[(&str, GgufMetadataValue)], order: ByteOrder) -> GgufMetadata {
        let mut buf = Vec::new();
        for (k, v) in entries {
            write_kv(&mut buf, k, v, order).unwrap();
        }
        GgufMetadata::parse_kv(&mut Cursor::new(buf), entries.len() as u64, order).unwrap()
    }

    #[test]
    fn test_value_type_ids() {
        for id in 0..=12 {
            assert_eq!(GgufValueType::from_id(id).unwrap().id(), id);
        }
        assert!(GgufValueType::from_id(13).is_none());
    }

    #[test]
    fn test_kv_roundtrip_both_orders() {
        let entries = [
            ("a.u32", GgufMetadataValue::U32(4096)),
            ("a.f32", GgufMetadataValue::F32(1e-5)),
            ("a.bool", GgufMetadataValue::Bool(true)),
            ("a.str", GgufMetadataValue::String("llama".into())),
            ("a.i64", GgufMetadataValue::I64(-3)),
            ("a.toks", GgufMetadataValue::string_array(&["<s>", "</s>"])),
            ("a.empty", GgufMetadataValue::i32_array(&[])),
        ];
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let md = roundtrip(&entries, order);
            for (k, v) in &entries {
                assert_eq!(md.get(k), Some(v), "key {k} in {order}");
            }
        }
    }

    #[test]
    fn test_u32_encoding_big_endian() {
        let mut buf = Vec::new();
        write_kv(&mut buf, "k", &GgufMetadataValue::U32(1), ByteOrder::Big).unwrap();
        // 8-byte length + "k" + type id 4 + value 1
        assert_eq!(&buf[..8], &1u64.to_be_bytes());
        assert_eq!(buf[8], b'k');
        assert_eq!(&buf[9..13], &4u32.to_be_bytes());
        assert_eq!(&buf[13..17], &1u32.to_be_bytes());
    }

    #[test]
    fn test_missing_key_is_missing_required_field() {
        let md = GgufMetadata::default();
        let err = md.get_uint("llama.block_count").unwrap_err();
        assert!(matches!(err, ModelError::MissingRequiredField(k) if k == "llama.block_count"));
    }

    #[test]
    fn test_get_uint_accepts_any_integer_width() {
        let md = roundtrip(
            &[
                ("a", GgufMetadataValue::U64(32)),
                ("b", GgufMetadataValue::I32(7)),
                ("c", GgufMetadataValue::I32(-1)),
                ("d", GgufMetadataValue::F32(1.0)),
            ],
            ByteOrder::Little,
        );
        assert_eq!(md.get_uint("a").unwrap(), 32);
        assert_eq!(md.get_uint("b").unwrap(), 7);
        assert!(matches!(md.get_uint("c"), Err(ModelError::InvalidValue { .. })));
        assert!(matches!(md.get_uint("d"), Err(ModelError::TypeMismatch { .. })));
    }

    #[test]
    fn test_get_float_accepts_f64() {
        let md = roundtrip(&[("eps", GgufMetadataValue::F64(0.5))], ByteOrder::Little);
        assert_eq!(md.get_float("eps").unwrap(), 0.5);
        assert!(md.get_f32("eps").is_err());
    }

    #[test]
    fn test_string_array_type_mismatch_names_index() {
        let mut md = GgufMetadata::default();
        md.entries.insert(
            "toks".into(),
            GgufMetadataValue::Array {
                elem_type: GgufValueType::String,
                values: vec![
                    GgufMetadataValue::String("a".into()),
                    GgufMetadataValue::U8(1),
                ],
            },
        );
        let err = md.get_string_array("toks").unwrap_err();
        assert!(matches!(err, ModelError::TypeMismatch { key, .. } if key == "toks[1]"));
    }

    #[test]
    fn test_write_rejects_heterogeneous_array() {
        let bad = GgufMetadataValue::Array {
            elem_type: GgufValueType::F32,
            values: vec![GgufMetadataValue::U32(1)],
        };
        let mut buf = Vec::new();
        assert!(write_kv(&mut buf, "x", &bad, ByteOrder::Little).is_err());
    }

    #[test]
    fn test_unknown_value_type() {
        let mut buf = Vec::new();
        write_gguf_string(&mut buf, "k", ByteOrder::Little).unwrap();
        buf.extend_from_slice(&99u32.to_le_bytes());
        let err = GgufMetadata::parse_kv(&mut Cursor::new(buf), 1, ByteOrder::Little).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedGgufType(99)));
    }

    #[test]
    fn test_huge_string_length_is_truncation_error() {
        let buf = u64::MAX.to_le_bytes().to_vec();
        let err = GgufMetadata::parse_kv(&mut Cursor::new(buf), 1, ByteOrder::Little).unwrap_err();
        assert!(
            matches!(err, ModelError::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
        );
    }

    #[test]
    fn test_short_string_payload() {
        let mut buf = 10u64.to_le_bytes().to_vec();
        buf.extend_from_slice(b"abc");
        let err = read_gguf_string(&mut Cursor::new(buf), ByteOrder::Little).unwrap_err();
        assert!(matches!(err, ModelError::Io(_)));
    }
}
