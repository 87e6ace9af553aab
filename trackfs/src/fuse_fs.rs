//! Component G: the FUSE front-end. Translates upcalls into calls against
//! the virtual directory view, the album prober, and the materialization
//! cache; owns no domain logic of its own.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyStatfs, Request,
};
use parking_lot::Mutex;
use tracing::{debug, warn};
use trackfs_core::Library;

use crate::handle::{HandleTable, OpenHandle};
use crate::vfs::{self, Entry, InodeTable, ROOT_INODE};

/// How long the kernel may cache attribute/entry replies before re-asking.
/// Artifacts are immutable once built, so a generous TTL is safe.
const ATTR_TTL: Duration = Duration::from_secs(1);

pub struct TrackFs {
    library: Arc<Library>,
    inodes: Mutex<InodeTable>,
    handles: HandleTable,
    source_root: PathBuf,
}

impl TrackFs {
    pub fn new(library: Arc<Library>, source_root: PathBuf) -> Self {
        Self {
            inodes: Mutex::new(InodeTable::new(source_root.clone())),
            library,
            handles: HandleTable::new(),
            source_root,
        }
    }

    fn entry_for(&self, ino: u64) -> Option<Entry> {
        self.inodes.lock().get(ino).cloned()
    }

    fn attr_for(&self, ino: u64, entry: &Entry) -> std::io::Result<FileAttr> {
        match entry {
            Entry::Dir(path) => dir_attr(ino, path),
            Entry::PassThrough(path) => passthrough_attr(ino, path),
            Entry::Synthetic { album_path, .. } => {
                let album_meta = std::fs::metadata(album_path)?;
                // Size is authoritative only once a handle has materialized
                // the artifact; bare `getattr` gets a provisional 0 (spec
                // §4.F's documented policy — readers must tolerate it).
                Ok(synthetic_attr(ino, &album_meta, 0))
            }
        }
    }
}

impl Filesystem for TrackFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let parent_entry = match self.entry_for(parent) {
            Some(Entry::Dir(path)) => path,
            _ => return reply.error(libc::ENOENT),
        };
        let mut inodes = self.inodes.lock();
        let lookup_result = vfs::lookup_child(&self.library, &mut inodes, &parent_entry, name);
        drop(inodes);
        match lookup_result {
            Ok(Some((ino, entry))) => match self.attr_for(ino, &entry) {
                Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
                Err(err) => {
                    warn!(error = %err, "lookup attr failed");
                    reply.error(libc::EIO);
                }
            },
            Ok(None) => reply.error(libc::ENOENT),
            Err(err) => {
                warn!(error = %err, "lookup failed");
                reply.error(libc::EIO);
            }
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        let entry = match self.entry_for(ino) {
            Some(entry) => entry,
            None => return reply.error(libc::ENOENT),
        };
        // Once a handle exists, report the artifact's true length instead of
        // the provisional 0 (spec §4.F: authoritative size after `open`).
        let open_size = fh.and_then(|fh| {
            self.handles.with(fh, |handle| match handle {
                OpenHandle::Synthetic { artifact, .. } => Some(artifact.len()),
                OpenHandle::PassThrough(_) => None,
            })
        }).flatten();

        match self.attr_for(ino, &entry) {
            Ok(mut attr) => {
                if let Some(size) = open_size {
                    attr.size = size;
                    attr.blocks = size.div_ceil(512);
                }
                reply.attr(&ATTR_TTL, &attr)
            }
            Err(_) => reply.error(libc::EIO),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let dir_path = match self.entry_for(ino) {
            Some(Entry::Dir(path)) => path,
            _ => return reply.error(libc::ENOTDIR),
        };
        let mut inodes = self.inodes.lock();
        let listing = match vfs::list_directory(&self.library, &mut inodes, &dir_path) {
            Ok(listing) => listing,
            Err(err) => {
                warn!(error = %err, "readdir failed");
                return reply.error(libc::EIO);
            }
        };
        drop(inodes);

        let mut entries = vec![(ino, FileType::Directory, ".".to_string())];
        entries.push((ROOT_INODE, FileType::Directory, "..".to_string()));
        for listed in listing {
            let kind = if listed.is_dir {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            entries.push((listed.ino, kind, listed.name));
        }

        for (idx, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (idx + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        if flags & (libc::O_WRONLY | libc::O_RDWR) != 0 {
            return reply.error(libc::EROFS);
        }
        let entry = match self.entry_for(ino) {
            Some(entry) => entry,
            None => return reply.error(libc::ENOENT),
        };
        match entry {
            Entry::Dir(_) => reply.error(libc::EISDIR),
            Entry::PassThrough(path) => match File::open(&path) {
                Ok(file) => {
                    let fh = self.handles.insert(OpenHandle::PassThrough(Mutex::new(file)));
                    reply.opened(fh, 0);
                }
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "open failed");
                    reply.error(libc::EIO);
                }
            },
            Entry::Synthetic { album_path, key, .. } => {
                match self.library.open_synthetic(&album_path, &key) {
                    Ok(artifact) => {
                        let fh = self.handles.insert(OpenHandle::Synthetic {
                            album_path,
                            key,
                            artifact,
                        });
                        reply.opened(fh, 0);
                    }
                    Err(err) => {
                        warn!(error = %err, "materialization failed");
                        reply.error(libc::EIO);
                    }
                }
            }
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let result = self.handles.with(fh, |handle| match handle {
            OpenHandle::PassThrough(file) => {
                let mut file = file.lock();
                let mut buf = vec![0u8; size as usize];
                file.seek(SeekFrom::Start(offset as u64))
                    .and_then(|_| {
                        let n = file.read(&mut buf)?;
                        buf.truncate(n);
                        Ok(buf)
                    })
            }
            OpenHandle::Synthetic { artifact, .. } => {
                artifact.read_range(offset as u64, size as u64)
            }
        });
        match result {
            Some(Ok(bytes)) => reply.data(&bytes),
            Some(Err(err)) => {
                warn!(error = %err, "read failed");
                reply.error(libc::EIO);
            }
            None => reply.error(libc::EBADF),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if let Some(OpenHandle::Synthetic { key, .. }) = self.handles.remove(fh) {
            self.library.cache.release(&key);
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        match placeholder_statfs(&self.source_root) {
            Ok(stats) => reply.statfs(
                stats.0, stats.1, stats.2, stats.3, stats.4, stats.5, stats.6, stats.7,
            ),
            Err(_) => reply.statfs(0, 0, 0, 0, 0, 512, 255, 0),
        }
    }

    // Read-only filesystem: every write-side upcall is refused (spec §4.G).
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        reply.error(libc::EROFS);
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        reply.error(libc::EROFS);
    }

    fn unlink(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::EROFS);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        reply.error(libc::EROFS);
    }

    fn rmdir(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::EROFS);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(libc::EROFS);
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(libc::EROFS);
    }
}

fn dir_attr(ino: u64, path: &Path) -> std::io::Result<FileAttr> {
    let meta = std::fs::metadata(path)?;
    Ok(base_attr(ino, &meta, FileType::Directory, meta.mode() & 0o7777, meta.size()))
}

fn passthrough_attr(ino: u64, path: &Path) -> std::io::Result<FileAttr> {
    let meta = std::fs::metadata(path)?;
    Ok(base_attr(ino, &meta, FileType::RegularFile, meta.mode() & 0o7777, meta.size()))
}

fn synthetic_attr(ino: u64, album_meta: &std::fs::Metadata, size: u64) -> FileAttr {
    base_attr(ino, album_meta, FileType::RegularFile, 0o444, size)
}

fn base_attr(
    ino: u64,
    meta: &std::fs::Metadata,
    kind: FileType,
    perm: u32,
    size: u64,
) -> FileAttr {
    let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let atime = meta.accessed().unwrap_or(mtime);
    let ctime = mtime;
    FileAttr {
        ino,
        size,
        blocks: size.div_ceil(512),
        atime,
        mtime,
        ctime,
        crtime: mtime,
        kind,
        perm: perm as u16,
        nlink: 1,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

type StatfsTuple = (u64, u64, u64, u64, u64, u32, u32, u32);

fn placeholder_statfs(path: &Path) -> std::io::Result<StatfsTuple> {
    std::fs::metadata(path)?;
    // No portable statvfs in std; report conservative, harmless placeholders.
    Ok((0, 0, 0, 0, 0, 512, 255, 0))
}
