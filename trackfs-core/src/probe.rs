//! Component C: album probing (spec §4.C) — technical metadata, tags, cue
//! discovery and cover-art discovery for one physical album file, memoized
//! and invalidated by `(mtime, size)`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use encoding_rs::UTF_8;
use parking_lot::Mutex;

use crate::cue;
use crate::error::ProbeError;
use crate::model::{AlbumFile, AlbumFormat, CueAlbumInfo, Fingerprint, ResolvedTrack, TrackList};
use crate::tags::TagMap;

/// A probed album plus its resolved track list.
#[derive(Debug, Clone)]
pub struct Probed {
    pub album: AlbumFile,
    pub tracks: Option<TrackList>,
}

enum CacheEntry {
    Ok {
        fingerprint: Fingerprint,
        probed: Probed,
    },
    Failed {
        fingerprint: Fingerprint,
        expires_at: Instant,
    },
}

/// Memoizing album prober. One instance is shared across the filesystem.
pub struct AlbumProbe {
    cache: Mutex<HashMap<PathBuf, CacheEntry>>,
    negative_ttl: Duration,
}

impl AlbumProbe {
    pub fn new(negative_ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            negative_ttl,
        }
    }

    /// Probe `path`, reusing a cached result when `(mtime, size)` hasn't
    /// changed. A cached failure is retried once `negative_ttl` has elapsed.
    pub fn probe(&self, path: &Path) -> Result<Probed, ProbeError> {
        let fingerprint = fingerprint_of(path)?;

        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.get(path) {
                match entry {
                    CacheEntry::Ok {
                        fingerprint: fp,
                        probed,
                    } if *fp == fingerprint => return Ok(probed.clone()),
                    CacheEntry::Failed {
                        fingerprint: fp,
                        expires_at,
                    } if *fp == fingerprint && Instant::now() < *expires_at => {
                        return Err(ProbeError::NoCueSheet(path.to_path_buf()));
                    }
                    _ => {}
                }
            }
        }

        let result = probe_uncached(path, fingerprint);
        let mut cache = self.cache.lock();
        match &result {
            Ok(probed) => {
                cache.insert(
                    path.to_path_buf(),
                    CacheEntry::Ok {
                        fingerprint,
                        probed: probed.clone(),
                    },
                );
            }
            Err(_) => {
                cache.insert(
                    path.to_path_buf(),
                    CacheEntry::Failed {
                        fingerprint,
                        expires_at: Instant::now() + self.negative_ttl,
                    },
                );
            }
        }
        result
    }
}

fn fingerprint_of(path: &Path) -> Result<Fingerprint, ProbeError> {
    let meta = fs::metadata(path).map_err(|cause| ProbeError::Io {
        path: path.to_path_buf(),
        cause,
    })?;
    let mtime = meta.modified().map_err(|cause| ProbeError::Io {
        path: path.to_path_buf(),
        cause,
    })?;
    Ok(Fingerprint {
        mtime,
        size: meta.len(),
    })
}

fn probe_uncached(path: &Path, fingerprint: Fingerprint) -> Result<Probed, ProbeError> {
    let format = format_of(path);
    let (tags, cover, sample_rate, total_samples, bits_per_sample, channels, cue_source) =
        match format {
            // WAVE carries no intrinsic tags (spec §4.C step 2); `probe_wave`
            // always returns an empty `TagMap`.
            AlbumFormat::Flac => probe_flac(path)?,
            AlbumFormat::Wave => probe_wave(path)?,
        };

    let album = AlbumFile {
        path: path.to_path_buf(),
        format,
        tags,
        cover,
        total_samples,
        sample_rate,
        bits_per_sample,
        channels,
        mtime: fingerprint.mtime,
        size: fingerprint.size,
    };

    let tracks = match cue_source {
        Some(cue_text) => {
            let (album_info, cue_tracks) = cue::parse(&cue_text, sample_rate).map_err(|cause| {
                ProbeError::Parse {
                    path: path.to_path_buf(),
                    cause,
                }
            })?;
            Some(resolve_track_list(album_info, cue_tracks, total_samples))
        }
        None => None,
    };

    Ok(Probed { album, tracks })
}

fn resolve_track_list(
    album_info: CueAlbumInfo,
    cue_tracks: Vec<crate::model::CueTrack>,
    total_samples: u64,
) -> TrackList {
    let mut resolved = Vec::with_capacity(cue_tracks.len());
    let starts: Vec<u64> = cue_tracks
        .iter()
        .map(|t| t.start_sample().unwrap_or(0))
        .collect();
    for (idx, cue_track) in cue_tracks.into_iter().enumerate() {
        let start_sample = starts[idx];
        let end_sample = starts.get(idx + 1).copied().unwrap_or(total_samples);
        resolved.push(ResolvedTrack {
            cue: cue_track,
            start_sample,
            end_sample,
        });
    }
    TrackList {
        album_info,
        tracks: resolved,
    }
}

fn format_of(path: &Path) -> AlbumFormat {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("wav") => AlbumFormat::Wave,
        _ => AlbumFormat::Flac,
    }
}

type FlacProbeResult = (
    TagMap,
    Option<Vec<u8>>,
    u32,
    u64,
    u16,
    u16,
    Option<String>,
);

fn probe_flac(path: &Path) -> Result<FlacProbeResult, ProbeError> {
    let tag = metaflac::Tag::read_from_path(path).map_err(|_| ProbeError::Io {
        path: path.to_path_buf(),
        cause: std::io::Error::new(std::io::ErrorKind::InvalidData, "not a readable FLAC file"),
    })?;
    let streaminfo = tag
        .get_streaminfo()
        .ok_or_else(|| ProbeError::NoTechnicalMetadata(path.to_path_buf()))?;
    let sample_rate = streaminfo.sample_rate;
    let total_samples = streaminfo.total_samples;
    let bits_per_sample = streaminfo.bits_per_sample as u16;
    let channels = streaminfo.num_channels as u16;

    let mut tags = TagMap::new();
    let mut cuesheet_comment: Option<String> = None;
    if let Some(vc) = tag.vorbis_comments() {
        for (key, values) in vc.comments.iter() {
            if key.eq_ignore_ascii_case("CUESHEET") {
                cuesheet_comment = values.first().cloned();
                continue;
            }
            tags.set(key, values.clone());
        }
    }

    let cover = tag.pictures().next().map(|pic| pic.data.clone());

    let cue_source = match cuesheet_comment {
        Some(text) => Some(text),
        None => read_sidecar_cue(path)?,
    };

    let cover = match cover {
        Some(data) => Some(data),
        None => read_sidecar_cover(path)?,
    };

    Ok((
        tags,
        cover,
        sample_rate,
        total_samples,
        bits_per_sample,
        channels,
        cue_source,
    ))
}

fn probe_wave(path: &Path) -> Result<FlacProbeResult, ProbeError> {
    let reader = hound::WavReader::open(path).map_err(|cause| ProbeError::Io {
        path: path.to_path_buf(),
        cause: std::io::Error::new(std::io::ErrorKind::InvalidData, cause.to_string()),
    })?;
    let spec = reader.spec();
    let total_samples = u64::from(reader.duration());
    let cue_source = read_sidecar_cue(path)?;
    let cover = read_sidecar_cover(path)?;
    Ok((
        TagMap::new(),
        cover,
        spec.sample_rate,
        total_samples,
        spec.bits_per_sample,
        spec.channels,
        cue_source,
    ))
}

fn read_sidecar_cue(album_path: &Path) -> Result<Option<String>, ProbeError> {
    let cue_path = sidecar_path(album_path, "cue");
    if !cue_path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&cue_path).map_err(|cause| ProbeError::Io {
        path: cue_path.clone(),
        cause,
    })?;
    Ok(Some(decode_cue_text(&bytes)))
}

/// Detect the side-car cue file's encoding (real-world cue sheets are often
/// not UTF-8) and decode to a `String` before handing it to the parser.
fn decode_cue_text(bytes: &[u8]) -> String {
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    if encoding == UTF_8 {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        let (text, _, _) = encoding.decode(bytes);
        text.into_owned()
    }
}

fn read_sidecar_cover(album_path: &Path) -> Result<Option<Vec<u8>>, ProbeError> {
    let dedicated = sidecar_path(album_path, "jpg");
    if dedicated.exists() {
        return fs::read(&dedicated)
            .map(Some)
            .map_err(|cause| ProbeError::Io {
                path: dedicated,
                cause,
            });
    }
    if let Some(dir) = album_path.parent() {
        let folder = dir.join("folder.jpg");
        if folder.exists() {
            return fs::read(&folder).map(Some).map_err(|cause| ProbeError::Io {
                path: folder,
                cause,
            });
        }
    }
    Ok(None)
}

fn sidecar_path(album_path: &Path, extension: &str) -> PathBuf {
    album_path.with_extension(extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_track_list_last_track_ends_at_total_samples() {
        let album_info = CueAlbumInfo::default();
        let tracks = vec![
            crate::model::CueTrack {
                ordinal: 1,
                title: None,
                performer: vec![],
                songwriter: vec![],
                indices: vec![crate::model::CueIndex {
                    number: 1,
                    sample: 0,
                }],
            },
            crate::model::CueTrack {
                ordinal: 2,
                title: None,
                performer: vec![],
                songwriter: vec![],
                indices: vec![crate::model::CueIndex {
                    number: 1,
                    sample: 44100,
                }],
            },
        ];
        let list = resolve_track_list(album_info, tracks, 88200);
        assert_eq!(list.tracks[0].end_sample, 44100);
        assert_eq!(list.tracks[1].end_sample, 88200);
    }

    #[test]
    fn format_of_detects_wave_case_insensitively() {
        assert_eq!(format_of(Path::new("a.WAV")), AlbumFormat::Wave);
        assert_eq!(format_of(Path::new("a.flac")), AlbumFormat::Flac);
    }
}
