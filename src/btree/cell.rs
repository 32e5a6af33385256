//! Cell encoding: the variable-length unit inline bytes are packed into on
//! a disk page (spec §4.4). A cell is a type tag, an optional overflow
//! cookie, and either inline bytes or a prefix-compression length.

use crate::block::cookie::{read_varint, write_varint, Cookie};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CellType {
    KeyInline = 0,
    ValueInline = 1,
    KeyOverflow = 2,
    ValueOverflow = 3,
}

impl CellType {
    fn from_u8(v: u8) -> Result<CellType> {
        Ok(match v {
            0 => CellType::KeyInline,
            1 => CellType::ValueInline,
            2 => CellType::KeyOverflow,
            3 => CellType::ValueOverflow,
            other => return Err(Error::CorruptMetadata(format!("bad cell type tag {other}"))),
        })
    }
}

/// A decoded cell. `prefix_len` is only meaningful for row-store leaf keys,
/// where it counts the bytes shared with the preceding key in slot order
/// (spec §4.4: "keys are prefix-compressed against their predecessor
/// except at periodic anchor slots").
#[derive(Debug, Clone)]
pub struct Cell {
    pub cell_type: CellType,
    pub prefix_len: u32,
    pub bytes: Vec<u8>,
    pub overflow: Option<Cookie>,
}

impl Cell {
    pub fn inline(cell_type: CellType, prefix_len: u32, bytes: Vec<u8>) -> Cell {
        Cell {
            cell_type,
            prefix_len,
            bytes,
            overflow: None,
        }
    }

    pub fn overflow(cell_type: CellType, cookie: Cookie) -> Cell {
        let overflow_type = match cell_type {
            CellType::KeyInline => CellType::KeyOverflow,
            _ => CellType::ValueOverflow,
        };
        Cell {
            cell_type: overflow_type,
            prefix_len: 0,
            bytes: Vec::new(),
            overflow: Some(cookie),
        }
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self.cell_type, CellType::KeyOverflow | CellType::ValueOverflow)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.cell_type as u8);
        match self.cell_type {
            CellType::KeyInline => {
                write_varint(out, self.prefix_len as u64);
                write_varint(out, self.bytes.len() as u64);
                out.extend_from_slice(&self.bytes);
            }
            CellType::ValueInline => {
                write_varint(out, self.bytes.len() as u64);
                out.extend_from_slice(&self.bytes);
            }
            CellType::KeyOverflow | CellType::ValueOverflow => {
                self.overflow.unwrap_or(Cookie::INVALID).encode(out);
            }
        }
    }

    pub fn decode(buf: &[u8]) -> Result<(Cell, usize)> {
        if buf.is_empty() {
            return Err(Error::CorruptMetadata("cell buffer empty".into()));
        }
        let cell_type = CellType::from_u8(buf[0])?;
        let mut pos = 1usize;
        match cell_type {
            CellType::KeyInline => {
                let prefix_len = read_varint(buf, &mut pos)? as u32;
                let len = read_varint(buf, &mut pos)? as usize;
                if buf.len() < pos + len {
                    return Err(Error::CorruptMetadata("cell body truncated".into()));
                }
                let bytes = buf[pos..pos + len].to_vec();
                pos += len;
                Ok((Cell::inline(cell_type, prefix_len, bytes), pos))
            }
            CellType::ValueInline => {
                let len = read_varint(buf, &mut pos)? as usize;
                if buf.len() < pos + len {
                    return Err(Error::CorruptMetadata("cell body truncated".into()));
                }
                let bytes = buf[pos..pos + len].to_vec();
                pos += len;
                Ok((Cell::inline(cell_type, 0, bytes), pos))
            }
            CellType::KeyOverflow | CellType::ValueOverflow => {
                let (cookie, n) = Cookie::decode(&buf[pos..])?;
                pos += n;
                Ok((
                    Cell {
                        cell_type,
                        prefix_len: 0,
                        bytes: Vec::new(),
                        overflow: Some(cookie),
                    },
                    pos,
                ))
            }
        }
    }
}

/// Values/keys larger than this fraction of the page size are pushed to
/// their own overflow block instead of being stored inline (spec §4.4
/// "larger than ¼ page").
pub const OVERFLOW_FRACTION: u32 = 4;

pub fn is_overflow_candidate(len: usize, page_size: u32) -> bool {
    len as u64 * OVERFLOW_FRACTION as u64 > page_size as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_cell_round_trips() {
        let cell = Cell::inline(CellType::KeyInline, 3, b"lo world".to_vec());
        let mut buf = Vec::new();
        cell.encode(&mut buf);
        let (decoded, n) = Cell::decode(&buf).unwrap();
        assert_eq!(n, buf.len());
        assert_eq!(decoded.prefix_len, 3);
        assert_eq!(decoded.bytes, b"lo world");
    }

    #[test]
    fn overflow_cell_round_trips() {
        let cookie = Cookie {
            offset: 4096,
            size: 512,
            checksum: 7,
        };
        let cell = Cell::overflow(CellType::ValueInline, cookie);
        let mut buf = Vec::new();
        cell.encode(&mut buf);
        let (decoded, _) = Cell::decode(&buf).unwrap();
        assert!(decoded.is_overflow());
        assert_eq!(decoded.overflow, Some(cookie));
    }

    #[test]
    fn overflow_threshold_is_quarter_page() {
        assert!(!is_overflow_candidate(1000, 4096));
        assert!(is_overflow_candidate(1025, 4096));
    }
}
