//! POSIX-backed [`FileSystem`], a thin wrapper over `std::fs` plus
//! `memmap2` for mapping and `fs4` for advisory locking — the same crates
//! the teacher's `storage.rs` already depends on.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use fs4::fs_std::FileExt;

use crate::error::{Error, Result};

use super::{io_err, FileHandle, FileSystem, SyncKind};

pub struct PosixFileSystem {
    root: PathBuf,
}

impl PosixFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl FileSystem for PosixFileSystem {
    fn exists(&self, name: &str) -> bool {
        self.resolve(name).exists()
    }

    fn open(&self, name: &str, create: bool) -> Result<Box<dyn FileHandle>> {
        let path = self.resolve(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        Ok(Box::new(PosixFileHandle {
            file: RwLock::new(file),
            path,
        }))
    }

    fn remove(&self, name: &str) -> Result<()> {
        let path = self.resolve(name);
        std::fs::remove_file(&path).map_err(|e| io_err(&path, e))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from_path = self.resolve(from);
        let to_path = self.resolve(to);
        std::fs::rename(&from_path, &to_path).map_err(|e| io_err(&from_path, e))?;
        // Durable rename requires the containing directory's metadata to be
        // fsynced too (spec §4.1), otherwise the rename itself can be lost
        // on crash even though both files are individually durable.
        if let Some(parent) = to_path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }

    fn list_directory(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = std::fs::read_dir(&self.root).map_err(|e| io_err(&self.root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.root, e))?;
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

struct PosixFileHandle {
    file: RwLock<File>,
    path: PathBuf,
}

impl FileHandle for PosixFileHandle {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        use std::os::unix::fs::FileExt as _;
        let file = self.file.read().unwrap();
        file.read_at(buf, offset).map_err(|e| io_err(&self.path, e))
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        use std::os::unix::fs::FileExt as _;
        let file = self.file.write().unwrap();
        file.write_at(buf, offset).map_err(|e| io_err(&self.path, e))
    }

    fn truncate(&self, len: u64) -> Result<()> {
        let file = self.file.write().unwrap();
        file.set_len(len).map_err(|e| io_err(&self.path, e))
    }

    fn size(&self) -> Result<u64> {
        let file = self.file.read().unwrap();
        Ok(file.metadata().map_err(|e| io_err(&self.path, e))?.len())
    }

    fn fsync(&self, kind: SyncKind) -> Result<()> {
        let file = self.file.read().unwrap();
        match kind {
            SyncKind::Full => file.sync_all(),
            SyncKind::MetadataOnly => file.sync_data(),
        }
        .map_err(|e| io_err(&self.path, e))
    }

    fn map(&self) -> Result<Option<memmap2::Mmap>> {
        let file = self.file.read().unwrap();
        if file.metadata().map_err(|e| io_err(&self.path, e))?.len() == 0 {
            return Ok(None);
        }
        let map = unsafe { memmap2::Mmap::map(&*file) }.map_err(|e| io_err(&self.path, e))?;
        Ok(Some(map))
    }

    fn lock_exclusive(&self) -> Result<()> {
        let file = self.file.read().unwrap();
        FileExt::try_lock_exclusive(&*file).map_err(|_| {
            Error::Busy("backing file is already exclusively locked by another process")
        })
    }

    fn unlock(&self) -> Result<()> {
        let file = self.file.read().unwrap();
        FileExt::unlock(&*file).map_err(|e| io_err(&self.path, e))
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
