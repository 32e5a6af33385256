//! Process-wide path → shared file handle registry (spec §4.1). Opens of
//! the same path coalesce onto one handle with a reference count; the
//! underlying handle is closed once the last reference drops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::Result;

use super::{FileHandle, FileSystem};

struct Entry {
    handle: Arc<dyn FileHandle>,
    refs: usize,
}

pub struct FileRegistry {
    fs: Box<dyn FileSystem>,
    open: Mutex<HashMap<String, Entry>>,
}

impl FileRegistry {
    pub fn new(fs: Box<dyn FileSystem>) -> Self {
        Self {
            fs,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Open (or reuse an already-open) handle for `name`.
    pub fn open(&self, name: &str, create: bool) -> Result<Arc<dyn FileHandle>> {
        let mut open = self.open.lock().unwrap();
        if let Some(entry) = open.get_mut(name) {
            entry.refs += 1;
            return Ok(entry.handle.clone());
        }
        let handle: Arc<dyn FileHandle> = Arc::from(self.fs.open(name, create)?);
        open.insert(
            name.to_string(),
            Entry {
                handle: handle.clone(),
                refs: 1,
            },
        );
        Ok(handle)
    }

    /// Release one reference taken by [`open`](Self::open). The cached
    /// entry is evicted once the count reaches zero; the handle itself
    /// stays alive as long as any `Arc` clone does.
    pub fn release(&self, name: &str) {
        let mut open = self.open.lock().unwrap();
        if let Some(entry) = open.get_mut(name) {
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs == 0 {
                open.remove(name);
            }
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.fs.exists(name)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        self.open.lock().unwrap().remove(name);
        self.fs.remove(name)
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.fs.rename(from, to)
    }

    /// Number of distinct paths currently open, and the sum of their
    /// reference counts — surfaced for shutdown diagnostics/logging.
    pub fn stats(&self) -> (usize, usize) {
        let open = self.open.lock().unwrap();
        let total_refs = open.values().map(|e| e.refs).sum();
        (open.len(), total_refs)
    }
}
