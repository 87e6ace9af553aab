//! Data model (spec §3): `AlbumFile`, `CueIndex`, `CueTrack`, `TrackList`,
//! `VirtualTrack`, `Artifact`.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::tags::TagMap;

/// A physical album file: `P` with its format, inherited tags, optional
/// cover, and technical metadata (`N` samples at `R` Hz).
#[derive(Debug, Clone)]
pub struct AlbumFile {
    pub path: PathBuf,
    pub format: AlbumFormat,
    pub tags: TagMap,
    pub cover: Option<Vec<u8>>,
    pub total_samples: u64,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub mtime: SystemTime,
    pub size: u64,
}

impl AlbumFile {
    pub fn basename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlbumFormat {
    Flac,
    Wave,
}

/// `(mtime, size)` fingerprint used to invalidate the probe cache (spec §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub mtime: SystemTime,
    pub size: u64,
}

impl From<&AlbumFile> for Fingerprint {
    fn from(album: &AlbumFile) -> Self {
        Fingerprint {
            mtime: album.mtime,
            size: album.size,
        }
    }
}

/// One `INDEX` point within a cue track: index number (0 or 1) and a sample position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CueIndex {
    pub number: u8,
    pub sample: u64,
}

/// A single track parsed out of a cue sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CueTrack {
    pub ordinal: u32,
    pub title: Option<String>,
    pub performer: Vec<String>,
    pub songwriter: Vec<String>,
    pub indices: Vec<CueIndex>,
}

impl CueTrack {
    /// `INDEX 01` sample position. Invariant: always present once the cue
    /// sheet has been successfully parsed (spec §3 CueIndex invariant).
    pub fn start_sample(&self) -> Option<u64> {
        self.indices
            .iter()
            .find(|idx| idx.number == 1)
            .map(|idx| idx.sample)
    }
}

/// Album-level `TITLE`/`PERFORMER` pair, if the cue sheet declared them
/// before the first `TRACK` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CueAlbumInfo {
    pub title: Option<String>,
    pub performer: Vec<String>,
}

/// Ordered tracks parsed from one album's cue sheet, each with a resolved
/// `[start_sample, end_sample)` range (spec §4.C step 5).
#[derive(Debug, Clone)]
pub struct TrackList {
    pub album_info: CueAlbumInfo,
    pub tracks: Vec<ResolvedTrack>,
}

/// A `CueTrack` with its end sample resolved against the next track (or `N`
/// for the last track).
#[derive(Debug, Clone)]
pub struct ResolvedTrack {
    pub cue: CueTrack,
    pub start_sample: u64,
    pub end_sample: u64,
}

/// A synthetic track file: fully derivable from its encoded filename plus
/// the owning `AlbumFile` (spec §3 VirtualTrack invariant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualTrack {
    pub album_basename: String,
    pub ordinal: u32,
    pub start_sample: u64,
    pub end_sample: u64,
    pub display_title: String,
}

impl VirtualTrack {
    pub fn is_valid(&self, total_samples: u64) -> bool {
        self.start_sample < self.end_sample && self.end_sample <= total_samples
    }
}

/// The subset of a decoded filename that identifies a `VirtualTrack`
/// uniquely, without needing the (lossy, truncated) display title.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualTrackKey {
    pub album_basename: String,
    pub ordinal: u32,
    pub start_sample: u64,
    pub end_sample: u64,
}

impl From<&VirtualTrack> for VirtualTrackKey {
    fn from(track: &VirtualTrack) -> Self {
        VirtualTrackKey {
            album_basename: track.album_basename.clone(),
            ordinal: track.ordinal,
            start_sample: track.start_sample,
            end_sample: track.end_sample,
        }
    }
}

/// A materialized track's complete FLAC bytes, either held in memory or
/// spilled to a temp file once past the configured size threshold (spec §9's
/// hybrid-storage resolution of its open question).
pub enum Artifact {
    Memory(Vec<u8>),
    Spilled { file: Mutex<File>, len: u64 },
}

impl Artifact {
    pub fn in_memory(bytes: Vec<u8>) -> Self {
        Artifact::Memory(bytes)
    }

    /// Spill `bytes` to a fresh temp file backed by `dir` (the `tempfile`
    /// crate picks the OS temp dir when `dir` is `None`).
    pub fn spill(bytes: &[u8], dir: Option<&std::path::Path>) -> io::Result<Self> {
        use std::io::Write;
        let mut file = match dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        file.write_all(bytes)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Artifact::Spilled {
            file: Mutex::new(file),
            len: bytes.len() as u64,
        })
    }

    pub fn len(&self) -> u64 {
        match self {
            Artifact::Memory(bytes) => bytes.len() as u64,
            Artifact::Spilled { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `[offset, offset+len)`, clipped to the artifact's length (spec §4.G).
    pub fn read_range(&self, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        let total = self.len();
        if offset >= total {
            return Ok(Vec::new());
        }
        let end = total.min(offset.saturating_add(len));
        let want = (end - offset) as usize;
        match self {
            Artifact::Memory(bytes) => Ok(bytes[offset as usize..offset as usize + want].to_vec()),
            Artifact::Spilled { file, .. } => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(offset))?;
                let mut buf = vec![0u8; want];
                file.read_exact(&mut buf)?;
                Ok(buf)
            }
        }
    }
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Artifact::Memory(bytes) => f.debug_tuple("Memory").field(&bytes.len()).finish(),
            Artifact::Spilled { len, .. } => f.debug_struct("Spilled").field("len", len).finish(),
        }
    }
}

#[cfg(test)]
mod artifact_tests {
    use super::*;

    #[test]
    fn memory_read_range_clips_to_length() {
        let artifact = Artifact::in_memory(vec![1, 2, 3, 4, 5]);
        assert_eq!(artifact.read_range(3, 10).unwrap(), vec![4, 5]);
        assert_eq!(artifact.read_range(10, 10).unwrap(), Vec::<u8>::new());
        assert_eq!(artifact.len(), 5);
    }

    #[test]
    fn spilled_read_range_round_trips() {
        let artifact = Artifact::spill(b"hello world", None).unwrap();
        assert_eq!(artifact.len(), 11);
        assert_eq!(artifact.read_range(6, 5).unwrap(), b"world");
        assert_eq!(artifact.read_range(0, 5).unwrap(), b"hello");
    }
}
