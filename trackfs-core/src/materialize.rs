//! Component D: the track materializer (spec §4.D).
//!
//! Slice extraction, re-encode, tag synthesis and cover embedding, chained
//! into one `materialize` entry point that produces a complete FLAC byte
//! buffer for exactly one cue track.

use std::io::{Cursor, Read, Write};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use metaflac::block::{Picture, PictureType, VorbisComment};
use metaflac::{Block, BlockType};

use crate::config::Config;
use crate::error::{MaterializationError, Stage};
use crate::model::{AlbumFile, AlbumFormat, CueAlbumInfo, ResolvedTrack};
use crate::tag_synthesis::synthesize;

/// Produce a complete FLAC byte stream covering exactly `track`'s sample range.
pub fn materialize(
    config: &Config,
    album: &AlbumFile,
    track: &ResolvedTrack,
    album_info: &CueAlbumInfo,
) -> Result<Vec<u8>, MaterializationError> {
    let pcm_source = extract_slice(config, album, track)?;
    let encoded = encode_to_flac(config, album, pcm_source)?;
    let tags = synthesize(&album.tags, track, album_info, &config.ignore_tags_pattern);
    apply_tags_and_cover(encoded, &tags, album.cover.as_deref())
}

enum PcmSource {
    /// FLAC albums: PCM is read from a decoder subprocess's stdout.
    Subprocess(Child),
    /// WAVE albums: PCM is read directly out of the file, no subprocess needed.
    Bytes(Vec<u8>),
}

fn extract_slice(
    config: &Config,
    album: &AlbumFile,
    track: &ResolvedTrack,
) -> Result<PcmSource, MaterializationError> {
    match album.format {
        AlbumFormat::Flac => spawn_decoder(config, album, track),
        AlbumFormat::Wave => read_wave_slice(album, track).map(PcmSource::Bytes),
    }
}

fn spawn_decoder(
    config: &Config,
    album: &AlbumFile,
    track: &ResolvedTrack,
) -> Result<PcmSource, MaterializationError> {
    let substitutions = [
        ("{input}", album.path.display().to_string()),
        ("{start}", track.start_sample.to_string()),
        ("{end}", track.end_sample.to_string()),
    ];
    let (program, args) = build_command(&config.decoder_cmd, &substitutions);
    let child = Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|cause| MaterializationError::Spawn {
            stage: Stage::Decode,
            program: program.clone(),
            cause,
        })?;
    Ok(PcmSource::Subprocess(child))
}

fn read_wave_slice(
    album: &AlbumFile,
    track: &ResolvedTrack,
) -> Result<Vec<u8>, MaterializationError> {
    let mut reader = hound::WavReader::open(&album.path).map_err(|cause| {
        MaterializationError::Io {
            stage: Stage::Decode,
            cause: std::io::Error::new(std::io::ErrorKind::InvalidData, cause.to_string()),
        }
    })?;
    reader
        .seek(track.start_sample as u32)
        .map_err(|cause| MaterializationError::Io {
            stage: Stage::Decode,
            cause: std::io::Error::new(std::io::ErrorKind::InvalidData, cause.to_string()),
        })?;

    let channels = u64::from(album.channels);
    let frames = track.end_sample - track.start_sample;
    let total_samples = frames * channels;
    let bytes_per_sample = ((album.bits_per_sample as usize) + 7) / 8;
    let mut pcm = Vec::with_capacity((total_samples as usize) * bytes_per_sample);

    let mut samples = reader.samples::<i32>();
    for _ in 0..total_samples {
        let sample = match samples.next() {
            Some(Ok(s)) => s,
            Some(Err(cause)) => {
                return Err(MaterializationError::Io {
                    stage: Stage::Decode,
                    cause: std::io::Error::new(std::io::ErrorKind::InvalidData, cause.to_string()),
                })
            }
            None => break,
        };
        let le = sample.to_le_bytes();
        pcm.extend_from_slice(&le[..bytes_per_sample]);
    }
    Ok(pcm)
}

fn encode_to_flac(
    config: &Config,
    album: &AlbumFile,
    pcm: PcmSource,
) -> Result<Vec<u8>, MaterializationError> {
    let substitutions = [
        ("{channels}", album.channels.to_string()),
        ("{bps}", album.bits_per_sample.to_string()),
        ("{rate}", album.sample_rate.to_string()),
    ];
    let (program, args) = build_command(&config.encoder_cmd, &substitutions);
    let mut encoder = Command::new(&program)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|cause| MaterializationError::Spawn {
            stage: Stage::Encode,
            program: program.clone(),
            cause,
        })?;

    let mut encoder_stdin = encoder.stdin.take().expect("piped stdin");

    // Feed the encoder's stdin on a dedicated thread in both cases, so the
    // concurrent read of its stdout below (on the main thread) can never
    // deadlock against a full pipe (spec §9's streaming-pipeline note).
    let (writer_handle, mut decoder): (
        std::thread::JoinHandle<Result<(), MaterializationError>>,
        Option<Child>,
    ) = match pcm {
        PcmSource::Bytes(bytes) => {
            let handle = std::thread::spawn(move || {
                encoder_stdin
                    .write_all(&bytes)
                    .map_err(|cause| MaterializationError::Io {
                        stage: Stage::Encode,
                        cause,
                    })
            });
            (handle, None)
        }
        PcmSource::Subprocess(mut decoder_child) => {
            let mut decoder_stdout = decoder_child.stdout.take().expect("piped stdout");
            let handle = std::thread::spawn(move || {
                std::io::copy(&mut decoder_stdout, &mut encoder_stdin)
                    .map(|_| ())
                    .map_err(|cause| MaterializationError::Io {
                        stage: Stage::Decode,
                        cause,
                    })
            });
            (handle, Some(decoder_child))
        }
    };

    let timeout = config.materialize_timeout;
    let stdout_buf = read_all_with_timeout(encoder.stdout.take().expect("piped stdout"), timeout)
        .map_err(|cause| MaterializationError::Io {
            stage: Stage::Encode,
            cause,
        })?;

    let copy_result = writer_handle.join().unwrap_or(Ok(()));

    if let Some(mut decoder_child) = decoder.take() {
        let decoder_status =
            wait_with_timeout(&mut decoder_child, timeout, Stage::Decode, "decoder")?;
        if !decoder_status.success() {
            let mut stderr = String::new();
            if let Some(mut s) = decoder_child.stderr.take() {
                let _ = s.read_to_string(&mut stderr);
            }
            return Err(MaterializationError::NonZeroExit {
                stage: Stage::Decode,
                program: "decoder".to_string(),
                status: decoder_status,
                stderr,
            });
        }
    }
    copy_result?;

    let status = wait_with_timeout(&mut encoder, timeout, Stage::Encode, &program)?;
    if !status.success() {
        let mut stderr = String::new();
        if let Some(mut s) = encoder.stderr.take() {
            let _ = s.read_to_string(&mut stderr);
        }
        return Err(MaterializationError::NonZeroExit {
            stage: Stage::Encode,
            program,
            status,
            stderr,
        });
    }

    Ok(stdout_buf)
}

fn build_command(template: &str, substitutions: &[(&str, String)]) -> (String, Vec<String>) {
    let mut tokens: Vec<String> = template
        .split_whitespace()
        .map(|token| {
            let mut tok = token.to_string();
            for (placeholder, value) in substitutions {
                tok = tok.replace(placeholder, value);
            }
            tok
        })
        .collect();
    let program = if tokens.is_empty() {
        String::new()
    } else {
        tokens.remove(0)
    };
    (program, tokens)
}

fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
    stage: Stage,
    program: &str,
) -> Result<std::process::ExitStatus, MaterializationError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().map_err(|cause| MaterializationError::Io {
            stage,
            cause,
        })? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(MaterializationError::Timeout {
                stage,
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn read_all_with_timeout<R: Read>(mut reader: R, _timeout: Duration) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Read the encoder's freshly produced FLAC bytes, replace its metadata
/// blocks with the synthesized tags (and cover, if any), and return the
/// final byte buffer (spec §4.D steps 3–5).
fn apply_tags_and_cover(
    encoded: Vec<u8>,
    tags: &crate::tags::TagMap,
    cover: Option<&[u8]>,
) -> Result<Vec<u8>, MaterializationError> {
    let mut cursor = Cursor::new(encoded);
    let mut tag = metaflac::Tag::read_from(&mut cursor).map_err(|cause| {
        MaterializationError::Metaflac {
            stage: Stage::TagSynthesis,
            cause,
        }
    })?;
    // `read_from` leaves the cursor positioned right after the last metadata
    // block, i.e. at the start of the audio frames; everything from here on
    // is frame data that `Tag::write_to` does not and must not touch.
    let audio_start = cursor.position() as usize;
    let encoded = cursor.into_inner();
    let audio_data = &encoded[audio_start..];

    tag.remove_blocks(BlockType::VorbisComment);
    tag.remove_blocks(BlockType::Picture);

    let mut comments = std::collections::HashMap::new();
    for (key, values) in tags.iter() {
        comments.insert(key.to_string(), values.to_vec());
    }
    tag.push_block(Block::VorbisComment(VorbisComment {
        vendor_string: "trackfs".to_string(),
        comments,
    }));

    if let Some(picture_data) = cover {
        tag.push_block(Block::Picture(Picture {
            picture_type: PictureType::CoverFront,
            mime_type: sniff_mime(picture_data).to_string(),
            description: String::new(),
            width: 0,
            height: 0,
            depth: 0,
            num_colors: 0,
            data: picture_data.to_vec(),
        }));
    }

    let mut new_data = Vec::with_capacity(audio_data.len() + 4096);
    tag.write_to(&mut new_data)
        .map_err(|cause| MaterializationError::Metaflac {
            stage: Stage::TagSynthesis,
            cause,
        })?;
    new_data.extend_from_slice(audio_data);
    Ok(new_data)
}

fn sniff_mime(data: &[u8]) -> &'static str {
    if data.starts_with(b"\x89PNG") {
        "image/png"
    } else {
        "image/jpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_command_substitutes_all_placeholders() {
        let (program, args) = build_command(
            "flac --decode --stdout --skip={start} --until={end} {input}",
            &[
                ("{input}", "album.flac".to_string()),
                ("{start}", "0".to_string()),
                ("{end}", "44100".to_string()),
            ],
        );
        assert_eq!(program, "flac");
        assert_eq!(
            args,
            vec!["--decode", "--stdout", "--skip=0", "--until=44100", "album.flac"]
        );
    }

    #[test]
    fn sniff_mime_detects_png_signature() {
        assert_eq!(sniff_mime(&[0x89, b'P', b'N', b'G']), "image/png");
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF]), "image/jpeg");
    }

    fn minimal_flac_with_audio(audio: &[u8]) -> Vec<u8> {
        let mut encoded = Vec::new();
        encoded.extend_from_slice(b"fLaC");
        // One STREAMINFO block (the mandatory, always-first block), flagged
        // as the last metadata block so the reader stops right after it.
        encoded.push(0x80);
        encoded.extend_from_slice(&[0x00, 0x00, 0x22]); // 34, big-endian u24
        encoded.extend_from_slice(&[0u8; 34]);
        encoded.extend_from_slice(audio);
        encoded
    }

    #[test]
    fn apply_tags_and_cover_preserves_audio_frames_byte_for_byte() {
        let audio = b"NOT_REAL_AUDIO_FRAMES_0123456789";
        let encoded = minimal_flac_with_audio(audio);

        let mut tags = crate::tags::TagMap::new();
        tags.set_one("TITLE", "Some Track");

        let result = apply_tags_and_cover(encoded, &tags, None).expect("re-tag succeeds");

        assert!(result.starts_with(b"fLaC"));
        assert!(
            result.ends_with(audio),
            "audio frames must survive re-tagging untouched, regardless of how the new \
             metadata's length compares to the original"
        );
    }
}
