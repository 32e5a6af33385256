//! File abstraction (spec §4.1).
//!
//! A process-wide registry maps path to a shared, refcounted file handle so
//! concurrent opens of the same table file coalesce. Two implementations
//! share the [`FileSystem`]/[`FileHandle`] traits: [`posix`] (a thin wrapper
//! over `std::fs` plus `memmap2`/`fs4` for mapping and locking, the way the
//! teacher's `storage.rs` already does) and [`memfile`] (an in-memory
//! variant for tests and ephemeral tables).

pub mod memfile;
pub mod posix;
pub mod registry;

use std::path::Path;

use crate::error::Result;

/// Whether an `fsync` flushes file contents, metadata, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    Full,
    MetadataOnly,
}

/// Directory- and file-level operations a table's storage layer needs.
/// Implemented by [`posix::PosixFileSystem`] and [`memfile::MemFileSystem`].
pub trait FileSystem: Send + Sync {
    /// True if a name exists. Speculative opens must treat a `false` return
    /// as routine, never as an error (spec §4.1: "ENOENT must never be
    /// fatal for speculative opens").
    fn exists(&self, name: &str) -> bool;

    /// Open (creating if requested) a handle to `name`.
    fn open(&self, name: &str, create: bool) -> Result<Box<dyn FileHandle>>;

    fn remove(&self, name: &str) -> Result<()>;

    fn rename(&self, from: &str, to: &str) -> Result<()>;

    fn list_directory(&self, prefix: &str) -> Result<Vec<String>>;
}

/// A single open file. Every method is synchronous — the core never issues
/// asynchronous I/O (spec §6).
pub trait FileHandle: Send + Sync {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize>;
    fn truncate(&self, len: u64) -> Result<()>;
    fn size(&self) -> Result<u64>;
    fn fsync(&self, kind: SyncKind) -> Result<()>;

    /// Map the whole file read-only. Returns `None` if the backend has no
    /// meaningful mapping (e.g. a map is unnecessary for an in-memory file).
    fn map(&self) -> Result<Option<memmap2::Mmap>> {
        Ok(None)
    }

    /// Advisory lock for exclusive single-writer access to a table file.
    fn lock_exclusive(&self) -> Result<()>;
    fn unlock(&self) -> Result<()>;

    fn path(&self) -> &Path;
}

pub(crate) fn io_err(path: &Path, e: std::io::Error) -> crate::error::Error {
    crate::error::Error::io(Some(path.to_path_buf()), e)
}
