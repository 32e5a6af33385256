//! Key/value format strings (spec §6): a small pack/unpack language with
//! codes for fixed-width integers, strings, raw byte strings, and
//! struct-concatenation (repeat-count prefixes), e.g. `"Sq"` (a string then
//! a signed 64-bit int) or `"3b"` (three signed bytes).
//!
//! **[ADDED, SPEC_FULL.md §6]** [`is_fixed_bitfield`] derives whether a
//! format is a single bitfield column (`"tN"`, 1-8 bits) — the B-tree needs
//! this to decide between [`crate::btree::page::Page::ColFixLeaf`] and
//! [`crate::btree::page::Page::ColVarLeaf`].

use crate::error::{Error, Result};

/// One decoded field in a format string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Fixed-width integer: 1, 2, 4, or 8 bytes, signed or unsigned.
    Int { width: u8, signed: bool },
    /// A packed variable-length record number.
    Recno,
    /// NUL-terminated string occupying exactly `len` bytes on the wire.
    FixedString(u32),
    /// NUL-terminated string, variable length (must be the last field).
    VarString,
    /// Raw byte string with no terminator (must be the last field).
    RawBytes,
    /// A bitfield column entry, 1-8 bits wide.
    BitField(u8),
}

/// A parsed format string: a flat list of fields after repeat-count
/// prefixes have been expanded (spec: "struct-concatenation").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    pub fields: Vec<FieldType>,
}

/// One decoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
}

pub fn parse(spec: &str) -> Result<Format> {
    let mut fields = Vec::new();
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let mut count: u32 = 0;
        let mut has_count = false;
        while i < chars.len() && chars[i].is_ascii_digit() {
            has_count = true;
            count = count * 10 + chars[i].to_digit(10).unwrap();
            i += 1;
        }
        if i >= chars.len() {
            return Err(Error::InvalidArgument(format!("format string '{spec}' ends with a bare count")));
        }
        let code = chars[i];
        i += 1;
        let field = match code {
            'b' | 'B' => FieldType::Int { width: 1, signed: code == 'b' },
            'h' | 'H' => FieldType::Int { width: 2, signed: code == 'h' },
            'i' | 'I' | 'l' | 'L' => FieldType::Int { width: 4, signed: code == 'i' || code == 'l' },
            'q' | 'Q' => FieldType::Int { width: 8, signed: code == 'q' },
            'r' => FieldType::Recno,
            's' => FieldType::FixedString(if has_count { count } else { 1 }),
            'S' => FieldType::VarString,
            'u' | 'U' => FieldType::RawBytes,
            't' => {
                if !has_count || count == 0 || count > 8 {
                    return Err(Error::InvalidArgument(format!(
                        "bitfield code 't' requires a width prefix of 1-8, got '{spec}'"
                    )));
                }
                FieldType::BitField(count as u8)
            }
            other => return Err(Error::InvalidArgument(format!("unknown format code '{other}' in '{spec}'"))),
        };
        if matches!(field, FieldType::FixedString(_)) {
            fields.push(field);
            continue;
        }
        let repeat = if has_count && !matches!(code, 's' | 't') { count } else { 1 };
        for _ in 0..repeat {
            fields.push(field);
        }
    }
    Ok(Format { fields })
}

/// True iff `spec` describes exactly one bitfield column, the case the
/// B-tree uses to choose [`crate::btree::page::Page::ColFixLeaf`]. Returns
/// the bit width.
pub fn is_fixed_bitfield(format: &Format) -> Option<u8> {
    match format.fields.as_slice() {
        [FieldType::BitField(width)] => Some(*width),
        _ => None,
    }
}

pub fn pack(format: &Format, values: &[Value]) -> Result<Vec<u8>> {
    if values.len() != format.fields.len() {
        return Err(Error::InvalidArgument(format!(
            "format has {} fields but {} values were given",
            format.fields.len(),
            values.len()
        )));
    }
    let mut out = Vec::new();
    for (field, value) in format.fields.iter().zip(values) {
        match (field, value) {
            (FieldType::Int { width, .. }, Value::Int(v)) => {
                let bytes = v.to_le_bytes();
                out.extend_from_slice(&bytes[..*width as usize]);
            }
            (FieldType::Recno, Value::Int(v)) => {
                crate::block::cookie::write_varint(&mut out, *v as u64);
            }
            (FieldType::FixedString(len), Value::Bytes(b)) => {
                let len = *len as usize;
                let mut fixed = vec![0u8; len];
                let n = b.len().min(len);
                fixed[..n].copy_from_slice(&b[..n]);
                out.extend_from_slice(&fixed);
            }
            (FieldType::VarString, Value::Bytes(b)) => {
                out.extend_from_slice(b);
                out.push(0);
            }
            (FieldType::RawBytes, Value::Bytes(b)) => {
                out.extend_from_slice(b);
            }
            (FieldType::BitField(width), Value::Int(v)) => {
                let mask = (1u8 << *width) - 1;
                out.push(*v as u8 & mask);
            }
            _ => return Err(Error::InvalidArgument("value type does not match format field".into())),
        }
    }
    Ok(out)
}

pub fn unpack(format: &Format, buf: &[u8]) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(format.fields.len());
    let mut pos = 0usize;
    for (i, field) in format.fields.iter().enumerate() {
        let is_last = i + 1 == format.fields.len();
        match field {
            FieldType::Int { width, signed } => {
                let width = *width as usize;
                if buf.len() < pos + width {
                    return Err(Error::CorruptMetadata("format buffer truncated on int field".into()));
                }
                let mut bytes = [0u8; 8];
                bytes[..width].copy_from_slice(&buf[pos..pos + width]);
                let unsigned = u64::from_le_bytes(bytes);
                let v = if *signed && width < 8 {
                    let shift = 64 - width * 8;
                    ((unsigned << shift) as i64) >> shift
                } else {
                    unsigned as i64
                };
                values.push(Value::Int(v));
                pos += width;
            }
            FieldType::Recno => {
                let v = crate::block::cookie::read_varint(buf, &mut pos)?;
                values.push(Value::Int(v as i64));
            }
            FieldType::FixedString(len) => {
                let len = *len as usize;
                if buf.len() < pos + len {
                    return Err(Error::CorruptMetadata("format buffer truncated on string field".into()));
                }
                let raw = &buf[pos..pos + len];
                let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
                values.push(Value::Bytes(raw[..end].to_vec()));
                pos += len;
            }
            FieldType::VarString => {
                let end = buf[pos..].iter().position(|&b| b == 0).map(|n| pos + n).unwrap_or(buf.len());
                values.push(Value::Bytes(buf[pos..end].to_vec()));
                pos = (end + 1).min(buf.len());
            }
            FieldType::RawBytes => {
                let end = if is_last { buf.len() } else { pos };
                values.push(Value::Bytes(buf[pos..end].to_vec()));
                pos = end;
            }
            FieldType::BitField(width) => {
                if buf.len() < pos + 1 {
                    return Err(Error::CorruptMetadata("format buffer truncated on bitfield".into()));
                }
                let mask = (1u8 << *width) - 1;
                values.push(Value::Int((buf[pos] & mask) as i64));
                pos += 1;
            }
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_then_int_round_trips() {
        let format = parse("Sq").unwrap();
        let values = vec![Value::Bytes(b"hello".to_vec()), Value::Int(-42)];
        let packed = pack(&format, &values).unwrap();
        assert_eq!(unpack(&format, &packed).unwrap(), values);
    }

    #[test]
    fn repeated_bytes_field_expands() {
        let format = parse("3b").unwrap();
        assert_eq!(format.fields.len(), 3);
        let values = vec![Value::Int(1), Value::Int(-2), Value::Int(3)];
        let packed = pack(&format, &values).unwrap();
        assert_eq!(packed, vec![1u8, 0xfe, 3]);
    }

    #[test]
    fn fixed_bitfield_is_detected() {
        let format = parse("t3").unwrap();
        assert_eq!(is_fixed_bitfield(&format), Some(3));
        let other = parse("Sq").unwrap();
        assert_eq!(is_fixed_bitfield(&other), None);
    }

    #[test]
    fn raw_bytes_must_be_last_field() {
        let format = parse("u").unwrap();
        let packed = pack(&format, &[Value::Bytes(b"raw data".to_vec())]).unwrap();
        assert_eq!(unpack(&format, &packed).unwrap(), vec![Value::Bytes(b"raw data".to_vec())]);
    }
}
