//! Component A: synthetic filename encode/decode (spec §4.A, §6 grammar).

use std::sync::OnceLock;

use regex::Regex;

use crate::model::{VirtualTrack, VirtualTrackKey};

/// `<ord>.<title>.<start>-<end>.flac`, anchored so the trailing
/// `.<start>-<end>.flac` is matched greedily-safe against a title that may
/// itself contain dots.
fn trailing_fields() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<ord>\d{2,})\.(?P<title>.*)\.(?P<start>\d+)-(?P<end>\d+)\.flac$")
            .expect("static regex")
    })
}

#[derive(Debug, Clone)]
pub struct PathCodec {
    separator: String,
    title_length: usize,
    extension_pattern: Regex,
}

impl PathCodec {
    pub fn new(separator: impl Into<String>, title_length: usize, extension_pattern: Regex) -> Self {
        Self {
            separator: separator.into(),
            title_length,
            extension_pattern,
        }
    }

    /// Encode a [`VirtualTrack`] to its synthetic filename. Total, deterministic.
    pub fn encode(&self, track: &VirtualTrack) -> String {
        let title = self.sanitize_title(&track.display_title);
        format!(
            "{base}{sep}{ord:02}.{title}.{start}-{end}.flac",
            base = track.album_basename,
            sep = self.separator,
            ord = track.ordinal,
            title = title,
            start = track.start_sample,
            end = track.end_sample,
        )
    }

    /// Decode a synthetic filename to the key identifying its `VirtualTrack`.
    /// Returns `None` unless the name contains the configured separator and
    /// has the full trailing shape with a `.flac` extension.
    pub fn decode(&self, filename: &str) -> Option<VirtualTrackKey> {
        let sep_at = filename.find(&self.separator)?;
        let album_basename = filename[..sep_at].to_string();
        let remainder = &filename[sep_at + self.separator.len()..];
        let caps = trailing_fields().captures(remainder)?;
        let ordinal: u32 = caps["ord"].parse().ok()?;
        let start_sample: u64 = caps["start"].parse().ok()?;
        let end_sample: u64 = caps["end"].parse().ok()?;
        Some(VirtualTrackKey {
            album_basename,
            ordinal,
            start_sample,
            end_sample,
        })
    }

    /// Whether `filename`'s extension matches the configured album pattern.
    pub fn is_album(&self, filename: &str) -> bool {
        self.extension_pattern.is_match(filename)
    }

    fn sanitize_title(&self, title: &str) -> String {
        let mut sanitized = String::with_capacity(title.len());
        let mut rest = title;
        while !rest.is_empty() {
            if rest.starts_with(self.separator.as_str()) && !self.separator.is_empty() {
                sanitized.push('_');
                rest = &rest[self.separator.len()..];
                continue;
            }
            let ch = rest.chars().next().unwrap();
            let ch_len = ch.len_utf8();
            if ch == '/' || ch == '\0' {
                sanitized.push('_');
            } else {
                sanitized.push(ch);
            }
            rest = &rest[ch_len..];
        }
        let collapsed = collapse_underscore_runs(&sanitized);
        collapsed.chars().take(self.title_length).collect()
    }
}

fn collapse_underscore_runs(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_underscore = false;
    for ch in s.chars() {
        if ch == '_' {
            if !prev_underscore {
                out.push(ch);
            }
            prev_underscore = true;
        } else {
            out.push(ch);
            prev_underscore = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_EXTENSION_PATTERN, DEFAULT_SEPARATOR, DEFAULT_TITLE_LENGTH};

    fn codec() -> PathCodec {
        PathCodec::new(
            DEFAULT_SEPARATOR,
            DEFAULT_TITLE_LENGTH,
            Regex::new(DEFAULT_EXTENSION_PATTERN).unwrap(),
        )
    }

    #[test]
    fn encode_matches_spec_scenario_one() {
        let codec = codec();
        let track = VirtualTrack {
            album_basename: "a.flac".into(),
            ordinal: 1,
            start_sample: 0,
            end_sample: 44100,
            display_title: "Intro".into(),
        };
        assert_eq!(codec.encode(&track), "a.flac.#-#.01.Intro.0-44100.flac");
        let track2 = VirtualTrack {
            ordinal: 2,
            start_sample: 44100,
            end_sample: 88200,
            display_title: "Outro".into(),
            ..track
        };
        assert_eq!(codec.encode(&track2), "a.flac.#-#.02.Outro.44100-88200.flac");
    }

    #[test]
    fn encode_decode_round_trip() {
        let codec = codec();
        let track = VirtualTrack {
            album_basename: "weird name.flac".into(),
            ordinal: 12,
            start_sample: 123,
            end_sample: 456789,
            display_title: "A Title With. Dots.".into(),
        };
        let encoded = codec.encode(&track);
        let decoded = codec.decode(&encoded).expect("decodes");
        assert_eq!(decoded.album_basename, track.album_basename);
        assert_eq!(decoded.ordinal, track.ordinal);
        assert_eq!(decoded.start_sample, track.start_sample);
        assert_eq!(decoded.end_sample, track.end_sample);
    }

    #[test]
    fn decode_rejects_filenames_without_separator() {
        let codec = codec();
        assert!(codec.decode("plain_album.flac").is_none());
    }

    #[test]
    fn decode_rejects_non_flac_extension() {
        let codec = codec();
        assert!(codec
            .decode("a.flac.#-#.01.Intro.0-44100.wav")
            .is_none());
    }

    #[test]
    fn sanitize_replaces_separator_and_path_chars() {
        let codec = codec();
        let track = VirtualTrack {
            album_basename: "a.flac".into(),
            ordinal: 1,
            start_sample: 0,
            end_sample: 1,
            display_title: "Weird/Name.#-#.Here\0".into(),
        };
        let encoded = codec.encode(&track);
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('\0'));
        // the title segment must not re-introduce the separator sequence
        let title_segment = encoded
            .strip_prefix("a.flac.#-#.01.")
            .unwrap()
            .strip_suffix(".0-1.flac")
            .unwrap();
        assert!(!title_segment.contains(".#-#."));
    }

    #[test]
    fn title_truncated_to_configured_length() {
        let codec = PathCodec::new(
            DEFAULT_SEPARATOR,
            5,
            Regex::new(DEFAULT_EXTENSION_PATTERN).unwrap(),
        );
        let track = VirtualTrack {
            album_basename: "a.flac".into(),
            ordinal: 1,
            start_sample: 0,
            end_sample: 1,
            display_title: "Supercalifragilistic".into(),
        };
        let encoded = codec.encode(&track);
        assert_eq!(encoded, "a.flac.#-#.01.Super.0-1.flac");
    }

    #[test]
    fn is_album_matches_configured_extensions() {
        let codec = codec();
        assert!(codec.is_album("album.flac"));
        assert!(codec.is_album("Album.WAV"));
        assert!(!codec.is_album("cover.jpg"));
    }
}
