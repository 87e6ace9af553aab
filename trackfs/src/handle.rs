//! Open-file-handle table (spec §3 `OpenHandle`, §4.G `open`/`read`/`release`).

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use trackfs_core::{Artifact, VirtualTrackKey};

pub enum OpenHandle {
    /// A physical, non-album (or `--keep-album`) file: bytes served directly.
    PassThrough(Mutex<File>),
    /// A synthetic track: bytes served from a pinned, cached artifact.
    Synthetic {
        album_path: PathBuf,
        key: VirtualTrackKey,
        artifact: Arc<Artifact>,
    },
}

/// Hands out fresh file-handle numbers and tracks what each one refers to.
#[derive(Default)]
pub struct HandleTable {
    next_fh: AtomicU64,
    handles: Mutex<HashMap<u64, OpenHandle>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_fh: AtomicU64::new(1),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, handle: OpenHandle) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().insert(fh, handle);
        fh
    }

    pub fn with<R>(&self, fh: u64, f: impl FnOnce(&OpenHandle) -> R) -> Option<R> {
        self.handles.lock().get(&fh).map(f)
    }

    /// Remove and return the handle so the caller can release any pin it held.
    pub fn remove(&self, fh: u64) -> Option<OpenHandle> {
        self.handles.lock().remove(&fh)
    }
}
