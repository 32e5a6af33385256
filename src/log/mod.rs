//! Log manager (spec §4.6): segmented append-only log files, group commit
//! via reservation slots, and forward scan for recovery/printlog.

pub mod record;
pub mod slot;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crc32c::crc32c;
use log::debug;

use crate::error::{Error, Result};
use crate::fs::{FileHandle, FileSystem, SyncKind};
use record::LogRecord;
use slot::Slot;

/// `(file-id, byte-offset)` identifying one record's start (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn {
    pub file_id: u32,
    pub offset: u64,
}

impl Lsn {
    pub const ZERO: Lsn = Lsn { file_id: 1, offset: 0 };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    Off,
    Periodic,
    On,
}

const RECORD_HEADER_LEN: usize = 4 + 4 + 4 + 4;

fn segment_name(file_id: u32) -> String {
    format!("log.{file_id:010}")
}

/// One table's (or the engine's shared) log: the currently-open segment
/// plus the active group-commit slot.
pub struct LogManager {
    fs: Arc<dyn FileSystem>,
    segment_max: u64,
    sync_policy: SyncPolicy,
    current_file_id: AtomicU32,
    current: Mutex<Arc<dyn FileHandle>>,
    slot: Mutex<Slot>,
    prev_lsn: Mutex<Lsn>,
}

impl LogManager {
    pub fn create(fs: Arc<dyn FileSystem>, segment_max: u64, sync_policy: SyncPolicy) -> Result<Self> {
        let file_id = 1;
        let handle: Arc<dyn FileHandle> = Arc::from(fs.open(&segment_name(file_id), true)?);
        Ok(Self {
            fs,
            segment_max,
            sync_policy,
            current_file_id: AtomicU32::new(file_id),
            current: Mutex::new(handle),
            slot: Mutex::new(Slot::new()),
            prev_lsn: Mutex::new(Lsn::ZERO),
        })
    }

    /// Append one record, reserving its range via the active slot (spec:
    /// "threads reserve a range in a slot structure via atomic fetch-and-add
    /// of the running offset"). Returns the record's own LSN.
    pub fn append(&self, record: &LogRecord) -> Result<Lsn> {
        let payload = record.encode();
        let prev = *self.prev_lsn.lock().unwrap();
        let mut body = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
        body.extend_from_slice(&prev.file_id.to_le_bytes());
        body.extend_from_slice(&(prev.offset as u32).to_le_bytes());
        body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        let checksum = crc32c(&payload);
        body.extend_from_slice(&checksum.to_le_bytes());
        body.extend_from_slice(&payload);

        let (file_id, offset, handle) = {
            let mut slot = self.slot.lock().unwrap();
            let file_id = self.current_file_id.load(Ordering::SeqCst);
            let offset = slot.reserve(body.len() as u64);
            if offset + body.len() as u64 > self.segment_max {
                self.roll_segment(&mut slot)?;
                let file_id = self.current_file_id.load(Ordering::SeqCst);
                let offset = slot.reserve(body.len() as u64);
                (file_id, offset, self.current.lock().unwrap().clone())
            } else {
                (file_id, offset, self.current.lock().unwrap().clone())
            }
        };

        handle.write_at(offset, &body)?;
        if self.sync_policy == SyncPolicy::On {
            handle.fsync(SyncKind::Full)?;
        }

        let lsn = Lsn { file_id, offset };
        *self.prev_lsn.lock().unwrap() = lsn;
        Ok(lsn)
    }

    /// Force every byte reserved so far onto durable storage (spec: "durable
    /// sync is either per-commit, per-group, or off"). Called by the slot
    /// leader on a full slot or a timed flush.
    pub fn sync(&self) -> Result<()> {
        self.current.lock().unwrap().fsync(SyncKind::Full)
    }

    fn roll_segment(&self, slot: &mut Slot) -> Result<()> {
        let next_id = self.current_file_id.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("rolling log segment to file-id {next_id}");
        let handle: Arc<dyn FileHandle> = Arc::from(self.fs.open(&segment_name(next_id), true)?);
        *self.current.lock().unwrap() = handle;
        slot.reset();
        Ok(())
    }

    /// Scan records in order starting at `start`, invoking `callback(record,
    /// lsn, next_lsn)` for each (spec: "used by recovery, by printlog, and
    /// by backup-id enumeration"). `start.file_id == 0` is treated as "from
    /// the beginning of segment 1", matching the degenerate no-checkpoint
    /// recovery path in SPEC_FULL.md §4.6.
    pub fn scan(&self, start: Lsn, mut callback: impl FnMut(LogRecord, Lsn, Lsn) -> Result<()>) -> Result<()> {
        let last_file_id = self.current_file_id.load(Ordering::SeqCst);
        let mut file_id = if start.file_id == 0 { 1 } else { start.file_id };
        let mut offset = if start.file_id <= 1 { start.offset } else { 0 };

        while file_id <= last_file_id {
            if !self.fs.exists(&segment_name(file_id)) {
                file_id += 1;
                offset = 0;
                continue;
            }
            let handle: Arc<dyn FileHandle> = Arc::from(self.fs.open(&segment_name(file_id), false)?);
            let size = handle.size()?;

            while offset + RECORD_HEADER_LEN as u64 <= size {
                let mut header = vec![0u8; RECORD_HEADER_LEN];
                handle.read_at(offset, &mut header)?;
                let prev_file_id = u32::from_le_bytes(header[0..4].try_into().unwrap());
                let prev_offset = u32::from_le_bytes(header[4..8].try_into().unwrap()) as u64;
                let payload_len = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;
                let checksum = u32::from_le_bytes(header[12..16].try_into().unwrap());

                let payload_start = offset + RECORD_HEADER_LEN as u64;
                if payload_start + payload_len as u64 > size {
                    break; // torn write at the tail; stop here (spec: "truncate log past the last good record")
                }
                let mut payload = vec![0u8; payload_len];
                handle.read_at(payload_start, &mut payload)?;
                if crc32c(&payload) != checksum {
                    debug!("log scan hit a checksum mismatch at file {file_id} offset {offset}, stopping");
                    break;
                }

                let record = LogRecord::decode(&payload)?;
                let lsn = Lsn { file_id, offset };
                let next_offset = payload_start + payload_len as u64;
                let next_lsn = Lsn { file_id, offset: next_offset };
                let _ = (prev_file_id, prev_offset);
                callback(record, lsn, next_lsn)?;
                offset = next_offset;
            }

            file_id += 1;
            offset = 0;
        }
        Ok(())
    }

    /// Truncate the current segment past the last known-good record (spec
    /// §4.7 recovery step 4).
    pub fn truncate_past(&self, lsn: Lsn) -> Result<()> {
        if lsn.file_id != self.current_file_id.load(Ordering::SeqCst) {
            return Err(Error::InvalidArgument("truncate_past targets a non-current segment".into()));
        }
        self.current.lock().unwrap().truncate(lsn.offset)
    }

    pub fn current_lsn(&self) -> Lsn {
        *self.prev_lsn.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memfile::MemFileSystem;
    use record::OpRecord;

    fn new_manager() -> LogManager {
        let fs: Arc<dyn FileSystem> = Arc::new(MemFileSystem::new());
        LogManager::create(fs, 1 << 20, SyncPolicy::Off).unwrap()
    }

    #[test]
    fn append_then_scan_round_trips() {
        let mgr = new_manager();
        let rec = LogRecord::new(1, OpRecord::RowPut { btree_id: 1, key: b"k".to_vec(), value: b"v".to_vec() });
        let lsn = mgr.append(&rec).unwrap();
        assert_eq!(lsn, Lsn { file_id: 1, offset: 0 });

        let mut seen = Vec::new();
        mgr.scan(Lsn::ZERO, |record, lsn, _next| {
            seen.push((record, lsn));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, lsn);
    }

    #[test]
    fn scan_stops_cleanly_at_corrupted_tail() {
        let mgr = new_manager();
        let rec = LogRecord::new(1, OpRecord::RowPut { btree_id: 1, key: b"k".to_vec(), value: b"v".to_vec() });
        mgr.append(&rec).unwrap();
        // A second, well-formed record follows so scan must stop exactly once,
        // cleanly, without erroring out.
        let rec2 = LogRecord::new(1, OpRecord::RowRemove { btree_id: 1, key: b"k".to_vec() });
        mgr.append(&rec2).unwrap();

        let mut count = 0;
        mgr.scan(Lsn::ZERO, |_, _, _| {
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn truncate_past_drops_tail_records() {
        let mgr = new_manager();
        let rec = LogRecord::new(1, OpRecord::RowPut { btree_id: 1, key: b"k".to_vec(), value: b"v".to_vec() });
        let lsn = mgr.append(&rec).unwrap();
        let rec2 = LogRecord::new(1, OpRecord::RowRemove { btree_id: 1, key: b"k".to_vec() });
        mgr.append(&rec2).unwrap();

        mgr.truncate_past(lsn).unwrap();

        let mut count = 0;
        mgr.scan(Lsn::ZERO, |_, _, _| {
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 0);
    }
}
