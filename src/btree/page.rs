//! Page types and their disk encoding (spec §4.4). Five layouts share one
//! header: row-store internal/leaf, column-store internal/variable-length
//! leaf, and column-store fixed-length leaf (a bit-packed integer array).

use crate::block::cookie::{read_varint, write_varint, Cookie};
use crate::btree::cell::{Cell, CellType};
use crate::error::{Error, Result};

pub const ANCHOR_GAP: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    RowInternal = 0,
    RowLeaf = 1,
    ColInternal = 2,
    ColVarLeaf = 3,
    ColFixLeaf = 4,
}

impl PageType {
    fn from_u8(v: u8) -> Result<PageType> {
        Ok(match v {
            0 => PageType::RowInternal,
            1 => PageType::RowLeaf,
            2 => PageType::ColInternal,
            3 => PageType::ColVarLeaf,
            4 => PageType::ColFixLeaf,
            other => return Err(Error::CorruptMetadata(format!("bad page type tag {other}"))),
        })
    }

    pub fn is_leaf(self) -> bool {
        matches!(self, PageType::RowLeaf | PageType::ColVarLeaf | PageType::ColFixLeaf)
    }

    pub fn is_column_store(self) -> bool {
        matches!(self, PageType::ColInternal | PageType::ColVarLeaf | PageType::ColFixLeaf)
    }
}

/// A fully-materialized in-memory page image (spec: "parses header, builds
/// in-memory entry arrays").
#[derive(Debug, Clone)]
pub enum Page {
    RowInternal {
        keys: Vec<Vec<u8>>,
        children: Vec<Cookie>,
    },
    RowLeaf {
        keys: Vec<Vec<u8>>,
        values: Vec<Vec<u8>>,
    },
    ColInternal {
        start_recno: u64,
        children: Vec<Cookie>,
    },
    ColVarLeaf {
        start_recno: u64,
        values: Vec<Vec<u8>>,
    },
    ColFixLeaf {
        start_recno: u64,
        bit_width: u8,
        entry_count: u32,
        packed: Vec<u8>,
    },
}

impl Page {
    pub fn page_type(&self) -> PageType {
        match self {
            Page::RowInternal { .. } => PageType::RowInternal,
            Page::RowLeaf { .. } => PageType::RowLeaf,
            Page::ColInternal { .. } => PageType::ColInternal,
            Page::ColVarLeaf { .. } => PageType::ColVarLeaf,
            Page::ColFixLeaf { .. } => PageType::ColFixLeaf,
        }
    }

    pub fn entry_count(&self) -> usize {
        match self {
            Page::RowInternal { keys, .. } => keys.len(),
            Page::RowLeaf { keys, .. } => keys.len(),
            Page::ColInternal { children, .. } => children.len(),
            Page::ColVarLeaf { values, .. } => values.len(),
            Page::ColFixLeaf { entry_count, .. } => *entry_count as usize,
        }
    }

    /// Approximate resident footprint, used by the cache's byte budget.
    pub fn memory_size(&self) -> usize {
        let payload = match self {
            Page::RowInternal { keys, children } => {
                keys.iter().map(|k| k.len()).sum::<usize>() + children.len() * 16
            }
            Page::RowLeaf { keys, values } => {
                keys.iter().map(|k| k.len()).sum::<usize>() + values.iter().map(|v| v.len()).sum::<usize>()
            }
            Page::ColInternal { children, .. } => children.len() * 16,
            Page::ColVarLeaf { values, .. } => values.iter().map(|v| v.len()).sum(),
            Page::ColFixLeaf { packed, .. } => packed.len(),
        };
        payload + 64
    }

    /// Encode a full disk image: header, optional start recno, cells.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.push(self.page_type() as u8);
        write_varint(&mut body, self.entry_count() as u64);

        match self {
            Page::RowInternal { keys, children } => {
                for i in 0..keys.len() {
                    encode_row_key(&mut body, keys, i);
                    children[i].encode(&mut body);
                }
            }
            Page::RowLeaf { keys, values } => {
                for i in 0..keys.len() {
                    encode_row_key(&mut body, keys, i);
                    let value_cell = Cell::inline(CellType::ValueInline, 0, values[i].clone());
                    value_cell.encode(&mut body);
                }
            }
            Page::ColInternal { start_recno, children } => {
                write_varint(&mut body, *start_recno);
                for child in children {
                    child.encode(&mut body);
                }
            }
            Page::ColVarLeaf { start_recno, values } => {
                write_varint(&mut body, *start_recno);
                for value in values {
                    let cell = Cell::inline(CellType::ValueInline, 0, value.clone());
                    cell.encode(&mut body);
                }
            }
            Page::ColFixLeaf {
                start_recno,
                bit_width,
                entry_count: _,
                packed,
            } => {
                write_varint(&mut body, *start_recno);
                body.push(*bit_width);
                write_varint(&mut body, packed.len() as u64);
                body.extend_from_slice(packed);
            }
        }
        body
    }

    pub fn decode(buf: &[u8]) -> Result<Page> {
        if buf.is_empty() {
            return Err(Error::CorruptMetadata("page buffer empty".into()));
        }
        let page_type = PageType::from_u8(buf[0])?;
        let mut pos = 1usize;
        let entry_count = read_varint(buf, &mut pos)? as usize;

        match page_type {
            PageType::RowInternal => {
                let mut keys = Vec::with_capacity(entry_count);
                let mut children = Vec::with_capacity(entry_count);
                let mut prev = Vec::new();
                for _ in 0..entry_count {
                    let (cell, n) = Cell::decode(&buf[pos..])?;
                    pos += n;
                    let key = reconstruct_prefix_key(&prev, &cell);
                    prev = key.clone();
                    keys.push(key);
                    let (cookie, n) = Cookie::decode(&buf[pos..])?;
                    pos += n;
                    children.push(cookie);
                }
                Ok(Page::RowInternal { keys, children })
            }
            PageType::RowLeaf => {
                let mut keys = Vec::with_capacity(entry_count);
                let mut values = Vec::with_capacity(entry_count);
                let mut prev = Vec::new();
                for _ in 0..entry_count {
                    let (key_cell, n) = Cell::decode(&buf[pos..])?;
                    pos += n;
                    let key = reconstruct_prefix_key(&prev, &key_cell);
                    prev = key.clone();
                    keys.push(key);
                    let (value_cell, n) = Cell::decode(&buf[pos..])?;
                    pos += n;
                    values.push(value_cell.bytes);
                }
                Ok(Page::RowLeaf { keys, values })
            }
            PageType::ColInternal => {
                let start_recno = read_varint(buf, &mut pos)?;
                let mut children = Vec::with_capacity(entry_count);
                for _ in 0..entry_count {
                    let (cookie, n) = Cookie::decode(&buf[pos..])?;
                    pos += n;
                    children.push(cookie);
                }
                Ok(Page::ColInternal { start_recno, children })
            }
            PageType::ColVarLeaf => {
                let start_recno = read_varint(buf, &mut pos)?;
                let mut values = Vec::with_capacity(entry_count);
                for _ in 0..entry_count {
                    let (cell, n) = Cell::decode(&buf[pos..])?;
                    pos += n;
                    values.push(cell.bytes);
                }
                Ok(Page::ColVarLeaf { start_recno, values })
            }
            PageType::ColFixLeaf => {
                let start_recno = read_varint(buf, &mut pos)?;
                if buf.len() < pos + 1 {
                    return Err(Error::CorruptMetadata("fixed column page truncated".into()));
                }
                let bit_width = buf[pos];
                pos += 1;
                let packed_len = read_varint(buf, &mut pos)? as usize;
                if buf.len() < pos + packed_len {
                    return Err(Error::CorruptMetadata("fixed column page truncated".into()));
                }
                let packed = buf[pos..pos + packed_len].to_vec();
                Ok(Page::ColFixLeaf {
                    start_recno,
                    bit_width,
                    entry_count: entry_count as u32,
                    packed,
                })
            }
        }
    }
}

/// Encode the key at `index`, prefix-compressed against `keys[index - 1]`
/// unless `index` lands on an anchor slot (spec §4.4: "keys are prefix-
/// compressed against their predecessor except at periodic anchor
/// slots"). A fixed stride stands in for the original's recursive
/// midpoint-split anchor bitmap.
fn encode_row_key(out: &mut Vec<u8>, keys: &[Vec<u8>], index: usize) {
    let key = &keys[index];
    let is_anchor = index % ANCHOR_GAP == 0;
    let prefix_len = if is_anchor {
        0
    } else {
        common_prefix_len(&keys[index - 1], key)
    };
    let cell = Cell::inline(CellType::KeyInline, prefix_len as u32, key[prefix_len..].to_vec());
    cell.encode(out);
}

fn reconstruct_prefix_key(prev: &[u8], cell: &Cell) -> Vec<u8> {
    let mut key = Vec::with_capacity(cell.prefix_len as usize + cell.bytes.len());
    key.extend_from_slice(&prev[..cell.prefix_len as usize]);
    key.extend_from_slice(&cell.bytes);
    key
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Bit-pack `values` (each < 2^bit_width) into a byte array (spec §3
/// "fixed-length column-store, a bit-packed integer of configurable width
/// (1-8 bits)").
pub fn pack_fixed(values: &[u8], bit_width: u8) -> Vec<u8> {
    let mut out = vec![0u8; (values.len() * bit_width as usize + 7) / 8];
    let mut bit_pos = 0usize;
    for &v in values {
        let v = v & ((1u16 << bit_width) - 1) as u8;
        for b in 0..bit_width {
            if v & (1 << b) != 0 {
                out[bit_pos / 8] |= 1 << (bit_pos % 8);
            }
            bit_pos += 1;
        }
    }
    out
}

pub fn unpack_fixed(packed: &[u8], bit_width: u8, count: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(count);
    let mut bit_pos = 0usize;
    for _ in 0..count {
        let mut v = 0u8;
        for b in 0..bit_width {
            let byte = bit_pos / 8;
            if byte < packed.len() && packed[byte] & (1 << (bit_pos % 8)) != 0 {
                v |= 1 << b;
            }
            bit_pos += 1;
        }
        out.push(v);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_leaf_round_trips_with_prefix_compression() {
        let page = Page::RowLeaf {
            keys: vec![b"apple".to_vec(), b"apply".to_vec(), b"banana".to_vec()],
            values: vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()],
        };
        let buf = page.encode();
        let decoded = Page::decode(&buf).unwrap();
        match decoded {
            Page::RowLeaf { keys, values } => {
                assert_eq!(keys, vec![b"apple".to_vec(), b"apply".to_vec(), b"banana".to_vec()]);
                assert_eq!(values, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);
            }
            _ => panic!("wrong page type"),
        }
    }

    #[test]
    fn fixed_column_packing_round_trips() {
        let values = vec![1u8, 0, 1, 1, 0, 1, 0, 0, 1];
        let packed = pack_fixed(&values, 1);
        let unpacked = unpack_fixed(&packed, 1, values.len());
        assert_eq!(unpacked, values);
    }

    #[test]
    fn col_var_leaf_round_trips() {
        let page = Page::ColVarLeaf {
            start_recno: 100,
            values: vec![b"a".to_vec(), b"bb".to_vec()],
        };
        let buf = page.encode();
        let decoded = Page::decode(&buf).unwrap();
        match decoded {
            Page::ColVarLeaf { start_recno, values } => {
                assert_eq!(start_recno, 100);
                assert_eq!(values, vec![b"a".to_vec(), b"bb".to_vec()]);
            }
            _ => panic!("wrong page type"),
        }
    }
}
