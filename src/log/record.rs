//! Log record payloads (spec §4.6): a record-type tag followed by a typed
//! operation, each with a packed-integer header and nested byte strings,
//! matching `src/block/cookie.rs`'s varint conventions.

use crate::block::cookie::{read_varint, write_varint};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum OpTag {
    RowPut = 0,
    RowRemove = 1,
    ColPut = 2,
    ColModify = 3,
    ColTruncate = 4,
    TxnTimestamp = 5,
    CheckpointStart = 6,
    BackupId = 7,
}

impl OpTag {
    fn from_u8(v: u8) -> Result<OpTag> {
        Ok(match v {
            0 => OpTag::RowPut,
            1 => OpTag::RowRemove,
            2 => OpTag::ColPut,
            3 => OpTag::ColModify,
            4 => OpTag::ColTruncate,
            5 => OpTag::TxnTimestamp,
            6 => OpTag::CheckpointStart,
            7 => OpTag::BackupId,
            other => return Err(Error::CorruptMetadata(format!("bad log op tag {other}"))),
        })
    }
}

/// One typed operation carried by a log record (spec §4.6's enumerated op
/// list). `ColTruncate` covers fast-truncate (spec §4.4) of a recno range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpRecord {
    RowPut { btree_id: u32, key: Vec<u8>, value: Vec<u8> },
    RowRemove { btree_id: u32, key: Vec<u8> },
    ColPut { btree_id: u32, recno: u64, value: Vec<u8> },
    ColModify { btree_id: u32, key: Vec<u8>, fragments: Vec<crate::txn::modify::Fragment> },
    ColTruncate { btree_id: u32, start_recno: u64, end_recno: u64 },
    TxnTimestamp { commit_ts: u64, durable_ts: u64 },
    CheckpointStart { checkpoint_id: u64 },
    BackupId { id: u64 },
}

impl OpRecord {
    fn tag(&self) -> OpTag {
        match self {
            OpRecord::RowPut { .. } => OpTag::RowPut,
            OpRecord::RowRemove { .. } => OpTag::RowRemove,
            OpRecord::ColPut { .. } => OpTag::ColPut,
            OpRecord::ColModify { .. } => OpTag::ColModify,
            OpRecord::ColTruncate { .. } => OpTag::ColTruncate,
            OpRecord::TxnTimestamp { .. } => OpTag::TxnTimestamp,
            OpRecord::CheckpointStart { .. } => OpTag::CheckpointStart,
            OpRecord::BackupId { .. } => OpTag::BackupId,
        }
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        match self {
            OpRecord::RowPut { btree_id, key, value } => {
                write_varint(out, *btree_id as u64);
                write_bytes(out, key);
                write_bytes(out, value);
            }
            OpRecord::RowRemove { btree_id, key } => {
                write_varint(out, *btree_id as u64);
                write_bytes(out, key);
            }
            OpRecord::ColPut { btree_id, recno, value } => {
                write_varint(out, *btree_id as u64);
                write_varint(out, *recno);
                write_bytes(out, value);
            }
            OpRecord::ColModify { btree_id, key, fragments } => {
                write_varint(out, *btree_id as u64);
                write_bytes(out, key);
                write_varint(out, fragments.len() as u64);
                for f in fragments {
                    write_varint(out, f.offset as u64);
                    write_varint(out, f.size as u64);
                    write_bytes(out, &f.data);
                }
            }
            OpRecord::ColTruncate { btree_id, start_recno, end_recno } => {
                write_varint(out, *btree_id as u64);
                write_varint(out, *start_recno);
                write_varint(out, *end_recno);
            }
            OpRecord::TxnTimestamp { commit_ts, durable_ts } => {
                write_varint(out, *commit_ts);
                write_varint(out, *durable_ts);
            }
            OpRecord::CheckpointStart { checkpoint_id } => {
                write_varint(out, *checkpoint_id);
            }
            OpRecord::BackupId { id } => {
                write_varint(out, *id);
            }
        }
    }

    fn decode_body(tag: OpTag, buf: &[u8], pos: &mut usize) -> Result<OpRecord> {
        Ok(match tag {
            OpTag::RowPut => {
                let btree_id = read_varint(buf, pos)? as u32;
                let key = read_bytes(buf, pos)?;
                let value = read_bytes(buf, pos)?;
                OpRecord::RowPut { btree_id, key, value }
            }
            OpTag::RowRemove => {
                let btree_id = read_varint(buf, pos)? as u32;
                let key = read_bytes(buf, pos)?;
                OpRecord::RowRemove { btree_id, key }
            }
            OpTag::ColPut => {
                let btree_id = read_varint(buf, pos)? as u32;
                let recno = read_varint(buf, pos)?;
                let value = read_bytes(buf, pos)?;
                OpRecord::ColPut { btree_id, recno, value }
            }
            OpTag::ColModify => {
                let btree_id = read_varint(buf, pos)? as u32;
                let key = read_bytes(buf, pos)?;
                let count = read_varint(buf, pos)? as usize;
                let mut fragments = Vec::with_capacity(count);
                for _ in 0..count {
                    let offset = read_varint(buf, pos)? as usize;
                    let size = read_varint(buf, pos)? as usize;
                    let data = read_bytes(buf, pos)?;
                    fragments.push(crate::txn::modify::Fragment { data, offset, size });
                }
                OpRecord::ColModify { btree_id, key, fragments }
            }
            OpTag::ColTruncate => {
                let btree_id = read_varint(buf, pos)? as u32;
                let start_recno = read_varint(buf, pos)?;
                let end_recno = read_varint(buf, pos)?;
                OpRecord::ColTruncate { btree_id, start_recno, end_recno }
            }
            OpTag::TxnTimestamp => {
                let commit_ts = read_varint(buf, pos)?;
                let durable_ts = read_varint(buf, pos)?;
                OpRecord::TxnTimestamp { commit_ts, durable_ts }
            }
            OpTag::CheckpointStart => {
                let checkpoint_id = read_varint(buf, pos)?;
                OpRecord::CheckpointStart { checkpoint_id }
            }
            OpTag::BackupId => {
                let id = read_varint(buf, pos)?;
                OpRecord::BackupId { id }
            }
        })
    }
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

fn read_bytes(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let len = read_varint(buf, pos)? as usize;
    if buf.len() < *pos + len {
        return Err(Error::CorruptMetadata("log record payload truncated".into()));
    }
    let bytes = buf[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(bytes)
}

/// A full log record payload: which transaction it belongs to, and the
/// typed operation (spec: "payload carries a record-type tag followed by
/// typed operation records"). Commit markers are represented as a
/// `TxnTimestamp` op on the committing transaction's own id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub txn_id: u64,
    pub op: OpRecord,
}

impl LogRecord {
    pub fn new(txn_id: u64, op: OpRecord) -> Self {
        Self { txn_id, op }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint(&mut out, self.txn_id);
        out.push(self.op.tag() as u8);
        self.op.encode_body(&mut out);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<LogRecord> {
        let mut pos = 0usize;
        let txn_id = read_varint(buf, &mut pos)?;
        if buf.len() <= pos {
            return Err(Error::CorruptMetadata("log record missing op tag".into()));
        }
        let tag = OpTag::from_u8(buf[pos])?;
        pos += 1;
        let op = OpRecord::decode_body(tag, buf, &mut pos)?;
        Ok(LogRecord { txn_id, op })
    }
}
