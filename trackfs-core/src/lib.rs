//! Domain library behind `trackfs`: cue-sheet-aware probing of FLAC/WAVE
//! album files and on-demand materialization of their individual tracks as
//! standalone FLAC byte streams.

pub mod cache;
pub mod config;
pub mod cue;
pub mod error;
pub mod materialize;
pub mod model;
pub mod path_codec;
pub mod probe;
pub mod tag_synthesis;
pub mod tags;

pub use cache::{BuildFailed, MaterializationCache};
pub use config::{Config, ConfigBuilder};
pub use error::{ConfigError, FilesystemError, MaterializationError, ParseError, ProbeError, ReadError};
pub use model::{
    AlbumFile, AlbumFormat, Artifact, CueAlbumInfo, CueIndex, CueTrack, Fingerprint, ResolvedTrack,
    TrackList, VirtualTrack, VirtualTrackKey,
};
pub use path_codec::PathCodec;
pub use probe::{AlbumProbe, Probed};
pub use tags::TagMap;

use std::sync::Arc;

/// Everything needed to serve one physical album directory: its prober, the
/// path codec for synthesizing/decoding track filenames, the materialization
/// cache, and validated configuration. One instance is shared by the whole
/// filesystem.
pub struct Library {
    pub config: Config,
    pub probe: AlbumProbe,
    pub path_codec: PathCodec,
    pub cache: MaterializationCache<VirtualTrackKey>,
}

impl Library {
    pub fn new(config: Config) -> Self {
        let path_codec = PathCodec::new(
            config.separator.clone(),
            config.title_length,
            config.extension_pattern.clone(),
        );
        let probe = AlbumProbe::new(config.negative_ttl);
        let cache = MaterializationCache::new(config.cache_bytes, config.negative_ttl);
        Self {
            config,
            probe,
            path_codec,
            cache,
        }
    }

    /// Probe `album_path` and build the set of [`VirtualTrack`]s it exposes,
    /// or `None` if it has no usable cue sheet (spec §4.F: expose unchanged).
    pub fn virtual_tracks(&self, album_path: &std::path::Path) -> Option<Vec<VirtualTrack>> {
        let probed = self.probe.probe(album_path).ok()?;
        let tracks = probed.tracks?;
        let basename = probed.album.basename();
        Some(
            tracks
                .tracks
                .iter()
                .map(|resolved| VirtualTrack {
                    album_basename: basename.clone(),
                    ordinal: resolved.cue.ordinal,
                    start_sample: resolved.start_sample,
                    end_sample: resolved.end_sample,
                    display_title: resolved
                        .cue
                        .title
                        .clone()
                        .unwrap_or_else(|| format!("Track {:02}", resolved.cue.ordinal)),
                })
                .collect(),
        )
    }

    /// Resolve one synthetic filename against `album_path` and materialize
    /// it (served from cache on repeat access). Pins the returned artifact;
    /// callers must [`MaterializationCache::release`] the same key when done.
    pub fn open_synthetic(
        &self,
        album_path: &std::path::Path,
        key: &VirtualTrackKey,
    ) -> Result<Arc<Artifact>, OpenError> {
        let probed = self
            .probe
            .probe(album_path)
            .map_err(OpenError::Probe)?;
        let track_list = probed.tracks.ok_or(OpenError::NoTracks)?;
        let resolved = track_list
            .tracks
            .iter()
            .find(|t| {
                t.cue.ordinal == key.ordinal
                    && t.start_sample == key.start_sample
                    && t.end_sample == key.end_sample
            })
            .cloned()
            .ok_or(OpenError::NoSuchTrack)?;

        let config = &self.config;
        let album = probed.album.clone();
        let album_info = track_list.album_info.clone();
        self.cache
            .get(key, || {
                materialize::materialize(config, &album, &resolved, &album_info)
                    .map(|bytes| build_artifact(config, bytes))
                    .map_err(|cause| BuildFailed(cause.to_string()))
            })
            .map_err(OpenError::Materialize)
    }
}

fn build_artifact(config: &Config, bytes: Vec<u8>) -> Artifact {
    if bytes.len() as u64 > config.cache_memory_threshold {
        Artifact::spill(&bytes, None).unwrap_or_else(|_| Artifact::in_memory(bytes))
    } else {
        Artifact::in_memory(bytes)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("probing album: {0}")]
    Probe(ProbeError),
    #[error("album has no cue sheet")]
    NoTracks,
    #[error("no such synthetic track")]
    NoSuchTrack,
    #[error("materializing track: {0}")]
    Materialize(BuildFailed),
}

impl std::fmt::Display for BuildFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for BuildFailed {}
