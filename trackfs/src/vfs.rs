//! Component F: the virtual directory view.
//!
//! Maps the physical source tree onto the tree fuser sees: non-album entries
//! pass through verbatim; album entries are replaced (or, with `--keep-album`,
//! accompanied) by their synthesized per-track filenames.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use trackfs_core::{Library, VirtualTrack, VirtualTrackKey};

pub const ROOT_INODE: u64 = 1;

/// What a resolved inode refers to.
#[derive(Debug, Clone)]
pub enum Entry {
    Dir(PathBuf),
    PassThrough(PathBuf),
    Synthetic { album_path: PathBuf, key: VirtualTrackKey, display_name: String },
}

/// Bidirectional inode <-> physical-path-plus-identity table. A fresh inode
/// is minted the first time an entry is observed via `readdir`/`lookup`, and
/// reused for as long as the process runs (spec §4.F does not require
/// persistence across restarts).
pub struct InodeTable {
    entries: HashMap<u64, Entry>,
    by_key: HashMap<String, u64>,
    next: u64,
}

impl InodeTable {
    pub fn new(root: PathBuf) -> Self {
        let mut entries = HashMap::new();
        entries.insert(ROOT_INODE, Entry::Dir(root));
        Self {
            entries,
            by_key: HashMap::new(),
            next: ROOT_INODE + 1,
        }
    }

    pub fn get(&self, ino: u64) -> Option<&Entry> {
        self.entries.get(&ino)
    }

    fn intern(&mut self, identity: String, entry: Entry) -> u64 {
        if let Some(ino) = self.by_key.get(&identity) {
            return *ino;
        }
        let ino = self.next;
        self.next += 1;
        self.entries.insert(ino, entry);
        self.by_key.insert(identity, ino);
        ino
    }

    pub fn intern_dir(&mut self, path: &Path) -> u64 {
        self.intern(format!("dir:{}", path.display()), Entry::Dir(path.to_path_buf()))
    }

    pub fn intern_passthrough(&mut self, path: &Path) -> u64 {
        self.intern(
            format!("pass:{}", path.display()),
            Entry::PassThrough(path.to_path_buf()),
        )
    }

    pub fn intern_synthetic(
        &mut self,
        album_path: &Path,
        key: VirtualTrackKey,
        display_name: String,
    ) -> u64 {
        let identity = format!(
            "synth:{}:{}:{}:{}",
            album_path.display(),
            key.ordinal,
            key.start_sample,
            key.end_sample
        );
        self.intern(
            identity,
            Entry::Synthetic {
                album_path: album_path.to_path_buf(),
                key,
                display_name,
            },
        )
    }
}

/// One directory listing entry as resolved against a physical directory.
pub struct ListedEntry {
    pub name: String,
    pub is_dir: bool,
    pub ino: u64,
}

/// Resolve `dir`'s physical children into the virtual listing fuser's
/// `readdir` should present (spec §4.F).
pub fn list_directory(library: &Library, inodes: &mut InodeTable, dir: &Path) -> std::io::Result<Vec<ListedEntry>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        let name = entry.file_name().to_string_lossy().into_owned();

        if file_type.is_dir() {
            let ino = inodes.intern_dir(&path);
            out.push(ListedEntry { name, is_dir: true, ino });
            continue;
        }

        if library.path_codec.is_album(&name) {
            if let Some(tracks) = library.virtual_tracks(&path) {
                for track in &tracks {
                    let filename = library.path_codec.encode(track);
                    let key = VirtualTrackKey::from(track);
                    let ino = inodes.intern_synthetic(&path, key, track.display_title.clone());
                    out.push(ListedEntry {
                        name: filename,
                        is_dir: false,
                        ino,
                    });
                }
                if !library.config.keep_album {
                    continue;
                }
            }
        }

        let ino = inodes.intern_passthrough(&path);
        out.push(ListedEntry { name, is_dir: false, ino });
    }
    Ok(out)
}

/// Resolve one child name within `dir` (used by `lookup`), without having to
/// materialize the whole directory listing's `VirtualTrack`s more than once.
pub fn lookup_child(
    library: &Library,
    inodes: &mut InodeTable,
    dir: &Path,
    name: &OsStr,
) -> std::io::Result<Option<(u64, Entry)>> {
    let name = name.to_string_lossy().into_owned();
    let listing = list_directory(library, inodes, dir)?;
    for listed in listing {
        if listed.name == name {
            return Ok(inodes.get(listed.ino).cloned().map(|entry| (listed.ino, entry)));
        }
    }
    Ok(None)
}
