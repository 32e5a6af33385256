//! The descriptor block: the fixed block-zero header every table file
//! starts with (spec §3, §4.7). It carries the format version and
//! allocation size needed to interpret the rest of the file, plus the most
//! recent checkpoint's extent-list cookies so recovery can bootstrap
//! without a log scan when the descriptor itself survived the crash
//! (spec §9's "descriptor-embedded checkpoint" salvage path).

use crc32c::crc32c;

use crate::block::cookie::Cookie;
use crate::error::{Error, Result};

pub const MAGIC: u32 = 0x4654_4442; // "FTDB"
pub const MAJOR_VERSION: u16 = 1;
pub const MINOR_VERSION: u16 = 0;

/// A single checkpoint's worth of root pointers, embedded in the
/// descriptor so the most recent checkpoint can be recovered without
/// reading the log at all (only the updates since that checkpoint need
/// replay).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    pub checkpoint_id: u64,
    pub root: Cookie,
    pub avail: Cookie,
    pub alloc: Cookie,
    pub discard: Cookie,
    pub file_size: u64,
}

impl CheckpointInfo {
    pub const EMPTY: CheckpointInfo = CheckpointInfo {
        checkpoint_id: 0,
        root: Cookie::INVALID,
        avail: Cookie::INVALID,
        alloc: Cookie::INVALID,
        discard: Cookie::INVALID,
        file_size: 0,
    };

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.checkpoint_id.to_le_bytes());
        self.root.encode(out);
        self.avail.encode(out);
        self.alloc.encode(out);
        self.discard.encode(out);
        out.extend_from_slice(&self.file_size.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<(CheckpointInfo, usize)> {
        let mut pos = 0usize;
        let take8 = |buf: &[u8], pos: &mut usize| -> Result<u64> {
            if buf.len() < *pos + 8 {
                return Err(Error::CorruptMetadata("descriptor checkpoint info truncated".into()));
            }
            let v = u64::from_le_bytes(buf[*pos..*pos + 8].try_into().unwrap());
            *pos += 8;
            Ok(v)
        };
        let checkpoint_id = take8(buf, &mut pos)?;
        let (root, n) = Cookie::decode(&buf[pos..])?;
        pos += n;
        let (avail, n) = Cookie::decode(&buf[pos..])?;
        pos += n;
        let (alloc, n) = Cookie::decode(&buf[pos..])?;
        pos += n;
        let (discard, n) = Cookie::decode(&buf[pos..])?;
        pos += n;
        let file_size = take8(buf, &mut pos)?;
        Ok((
            CheckpointInfo {
                checkpoint_id,
                root,
                avail,
                alloc,
                discard,
                file_size,
            },
            pos,
        ))
    }
}

/// Block zero of a table file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub major_version: u16,
    pub minor_version: u16,
    pub allocation_size: u32,
    pub last_checkpoint: CheckpointInfo,
}

impl Descriptor {
    pub fn new(allocation_size: u32) -> Self {
        Self {
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            allocation_size,
            last_checkpoint: CheckpointInfo::EMPTY,
        }
    }

    /// Serialize into exactly `allocation_size` bytes, magic and a crc32c
    /// trailer included, so the descriptor always occupies one whole
    /// allocation unit regardless of its logical payload length.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&MAGIC.to_le_bytes());
        body.extend_from_slice(&self.major_version.to_le_bytes());
        body.extend_from_slice(&self.minor_version.to_le_bytes());
        body.extend_from_slice(&self.allocation_size.to_le_bytes());
        self.last_checkpoint.encode(&mut body);

        let checksum = crc32c(&body);
        let mut out = Vec::with_capacity(self.allocation_size as usize);
        out.extend_from_slice(&body);
        out.extend_from_slice(&checksum.to_le_bytes());
        out.resize(self.allocation_size as usize, 0);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Descriptor> {
        if buf.len() < 4 {
            return Err(Error::CorruptMetadata("descriptor block truncated".into()));
        }
        // Checksum covers everything except its own trailing 4 bytes; the
        // body length isn't known up front, so re-derive it from the fixed
        // prefix plus the checkpoint-info encoding below, then verify.
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(Error::CorruptMetadata(format!(
                "bad descriptor magic: {:#010x}",
                magic
            )));
        }
        if buf.len() < 12 {
            return Err(Error::CorruptMetadata("descriptor block truncated".into()));
        }
        let major_version = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        let minor_version = u16::from_le_bytes(buf[6..8].try_into().unwrap());
        let allocation_size = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let (last_checkpoint, used) = CheckpointInfo::decode(&buf[12..])?;
        let body_len = 12 + used;
        if buf.len() < body_len + 4 {
            return Err(Error::CorruptMetadata("descriptor block truncated".into()));
        }
        let expected = u32::from_le_bytes(buf[body_len..body_len + 4].try_into().unwrap());
        let found = crc32c(&buf[..body_len]);
        if expected != found {
            return Err(Error::ChecksumMismatch {
                offset: 0,
                expected,
                found,
            });
        }
        if major_version != MAJOR_VERSION {
            return Err(Error::CorruptMetadata(format!(
                "unsupported descriptor major version {}",
                major_version
            )));
        }
        Ok(Descriptor {
            major_version,
            minor_version,
            allocation_size,
            last_checkpoint,
        })
    }
}
