//! Component B: cue-sheet parser (spec §4.B).
//!
//! A small hand-written, line-oriented state machine — per spec §9's design
//! note, a general parser-combinator framework is overkill for this grammar.

use crate::error::ParseError;
use crate::model::{CueAlbumInfo, CueIndex, CueTrack};
use crate::tags::split_multivalue;

const CD_FRAMES_PER_SECOND: u64 = 75;

/// Parse cue-sheet text into an ordered track list plus any album-level
/// `TITLE`/`PERFORMER`.
pub fn parse(text: &str, sample_rate: u32) -> Result<(CueAlbumInfo, Vec<CueTrack>), ParseError> {
    let mut album_info = CueAlbumInfo::default();
    let mut tracks: Vec<CueTrack> = Vec::new();
    let mut current: Option<CueTrack> = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = split_command(line);
        match command.to_ascii_uppercase().as_str() {
            "TRACK" => {
                if let Some(finished) = current.take() {
                    validate_track(&finished)?;
                    tracks.push(finished);
                }
                let ordinal = parse_track_number(rest, line_no)?;
                if let Some(previous) = tracks.last().map(|t| t.ordinal) {
                    if ordinal <= previous {
                        return Err(ParseError::NonMonotonicTrack {
                            line: line_no,
                            previous,
                            got: ordinal,
                        });
                    }
                }
                current = Some(CueTrack {
                    ordinal,
                    title: None,
                    performer: Vec::new(),
                    songwriter: Vec::new(),
                    indices: Vec::new(),
                });
            }
            "INDEX" => {
                let track = current
                    .as_mut()
                    .ok_or(ParseError::IndexWithoutTrack { line: line_no })?;
                let (number, sample) = parse_index(rest, sample_rate, line_no)?;
                track.indices.push(CueIndex { number, sample });
            }
            "TITLE" => {
                let value = unquote(rest);
                match current.as_mut() {
                    Some(track) => track.title = Some(value),
                    None => album_info.title = Some(value),
                }
            }
            "PERFORMER" => {
                let values = split_multivalue(&unquote(rest));
                match current.as_mut() {
                    Some(track) => track.performer = values,
                    None => album_info.performer = values,
                }
            }
            "SONGWRITER" => {
                if let Some(track) = current.as_mut() {
                    track.songwriter = split_multivalue(&unquote(rest));
                }
                // album-level SONGWRITER has no consumer in this spec; ignored.
            }
            // `[SUPPLEMENT]` tolerated but semantically unused commands.
            "FILE" | "REM" | "CATALOG" | "FLAGS" | "ISRC" | "PREGAP" | "POSTGAP"
            | "CDTEXTFILE" => {}
            _ => {
                // Unknown command: ignored per spec.
            }
        }
    }

    if let Some(finished) = current.take() {
        validate_track(&finished)?;
        tracks.push(finished);
    }

    Ok((album_info, tracks))
}

fn validate_track(track: &CueTrack) -> Result<(), ParseError> {
    if track.start_sample().is_none() {
        return Err(ParseError::MissingIndex01 {
            track: track.ordinal,
        });
    }
    Ok(())
}

fn split_command(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(pos) => (&line[..pos], line[pos..].trim_start()),
        None => (line, ""),
    }
}

fn unquote(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

fn parse_track_number(rest: &str, line_no: usize) -> Result<u32, ParseError> {
    let number_token = rest
        .split_whitespace()
        .next()
        .ok_or_else(|| ParseError::BadTrackLine {
            line: line_no,
            text: rest.to_string(),
        })?;
    number_token
        .parse::<u32>()
        .map_err(|_| ParseError::BadTrackLine {
            line: line_no,
            text: rest.to_string(),
        })
}

fn parse_index(rest: &str, sample_rate: u32, line_no: usize) -> Result<(u8, u64), ParseError> {
    let mut parts = rest.split_whitespace();
    let number_token = parts.next().unwrap_or("");
    let time_token = parts.next().unwrap_or("");
    let number: u8 = number_token
        .parse()
        .map_err(|_| ParseError::BadTimeCode {
            line: line_no,
            text: rest.to_string(),
        })?;
    let sample = parse_msf(time_token, sample_rate).ok_or_else(|| ParseError::BadTimeCode {
        line: line_no,
        text: time_token.to_string(),
    })?;
    Ok((number, sample))
}

/// `mm:ss:ff` (frames, 1/75s) -> sample count at `sample_rate`, rounded to nearest.
fn parse_msf(text: &str, sample_rate: u32) -> Option<u64> {
    let mut fields = text.split(':');
    let mm: u64 = fields.next()?.parse().ok()?;
    let ss: u64 = fields.next()?.parse().ok()?;
    let ff: u64 = fields.next()?.parse().ok()?;
    if fields.next().is_some() || ss >= 60 || ff >= CD_FRAMES_PER_SECOND {
        return None;
    }
    let total_frames = (mm * 60 + ss) * CD_FRAMES_PER_SECOND + ff;
    let numerator = total_frames * u64::from(sample_rate);
    // round to nearest, ties away from zero
    Some((numerator + CD_FRAMES_PER_SECOND / 2) / CD_FRAMES_PER_SECOND)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_TRACK: &str = r#"
TITLE "Album Title"
PERFORMER "Album Artist"
FILE "a.flac" WAVE
  TRACK 01 AUDIO
    TITLE "Intro"
    PERFORMER "Bob; Carol"
    INDEX 00 00:00:00
    INDEX 01 00:00:00
  TRACK 02 AUDIO
    TITLE "Outro"
    INDEX 01 00:01:00
"#;

    #[test]
    fn parses_two_tracks_with_album_info() {
        let (album, tracks) = parse(TWO_TRACK, 44100).expect("parses");
        assert_eq!(album.title.as_deref(), Some("Album Title"));
        assert_eq!(album.performer, vec!["Album Artist".to_string()]);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].ordinal, 1);
        assert_eq!(tracks[0].start_sample(), Some(0));
        assert_eq!(tracks[0].performer, vec!["Bob".to_string(), "Carol".to_string()]);
        assert_eq!(tracks[1].ordinal, 2);
        assert_eq!(tracks[1].start_sample(), Some(44100));
    }

    #[test]
    fn index_00_does_not_mark_start() {
        let (_, tracks) = parse(TWO_TRACK, 44100).unwrap();
        // INDEX 00 precedes INDEX 01 in track 1; only INDEX 01 resolves start_sample.
        assert_eq!(tracks[0].indices[0].number, 0);
        assert_eq!(tracks[0].start_sample(), Some(0));
    }

    #[test]
    fn missing_index_01_is_fatal() {
        let text = "TRACK 01 AUDIO\nINDEX 00 00:00:00\n";
        let err = parse(text, 44100).unwrap_err();
        assert!(matches!(err, ParseError::MissingIndex01 { track: 1 }));
    }

    #[test]
    fn index_without_track_is_fatal() {
        let text = "INDEX 01 00:00:00\n";
        let err = parse(text, 44100).unwrap_err();
        assert!(matches!(err, ParseError::IndexWithoutTrack { line: 1 }));
    }

    #[test]
    fn malformed_time_code_is_fatal() {
        let text = "TRACK 01 AUDIO\nINDEX 01 not-a-time\n";
        let err = parse(text, 44100).unwrap_err();
        assert!(matches!(err, ParseError::BadTimeCode { .. }));
    }

    #[test]
    fn nonmonotonic_track_numbers_rejected() {
        let text = "TRACK 02 AUDIO\nINDEX 01 00:00:00\nTRACK 01 AUDIO\nINDEX 01 00:01:00\n";
        let err = parse(text, 44100).unwrap_err();
        assert!(matches!(err, ParseError::NonMonotonicTrack { .. }));
    }

    #[test]
    fn unknown_commands_and_blank_lines_ignored() {
        let text = "\nSOMETHING_WEIRD here\n\nTRACK 01 AUDIO\nINDEX 01 00:00:00\n";
        let (_, tracks) = parse(text, 44100).expect("parses despite unknown command");
        assert_eq!(tracks.len(), 1);
    }

    #[test]
    fn msf_rounds_to_nearest_sample() {
        // 1 frame = 1/75s; at 44100Hz that's 588 samples exactly.
        assert_eq!(parse_msf("00:00:01", 44100), Some(588));
        assert_eq!(parse_msf("00:01:00", 44100), Some(44100));
    }

    #[test]
    fn single_track_cue_covers_whole_album() {
        let text = "TRACK 01 AUDIO\nINDEX 01 00:00:00\n";
        let (_, tracks) = parse(text, 44100).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].start_sample(), Some(0));
    }
}
