//! Error taxonomy (spec §7): one enum per kind, not a single catch-all.

use std::path::PathBuf;

/// Invalid flags, missing mount point, or a privileged-user refusal. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid --extension pattern: {0}")]
    BadExtensionRegex(#[source] regex::Error),

    #[error("invalid --ignore-tags pattern: {0}")]
    BadIgnoreTagsRegex(#[source] regex::Error),

    #[error("separator {0:?} must not be empty")]
    EmptySeparator(String),

    #[error("source root {0:?} is not a directory")]
    SourceRootNotADirectory(PathBuf),

    #[error("refusing to run as uid 0 without --root-allowed")]
    RefusedRoot,
}

/// I/O failure reading an album file, or a missing/malformed cue. The view
/// falls back to exposing the album unchanged.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("reading album file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },

    #[error("album file {0:?} has no usable STREAMINFO/fmt header")]
    NoTechnicalMetadata(PathBuf),

    #[error("no cue sheet found for {0:?}")]
    NoCueSheet(PathBuf),

    #[error("cue sheet for {path:?}: {cause}")]
    Parse {
        path: PathBuf,
        #[source]
        cause: ParseError,
    },
}

/// Cue-grammar failure. Always surfaced to callers wrapped as a [`ProbeError::Parse`].
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("line {line}: invalid time code {text:?}")]
    BadTimeCode { line: usize, text: String },

    #[error("line {line}: INDEX outside of a TRACK block")]
    IndexWithoutTrack { line: usize },

    #[error("track {track} is missing INDEX 01")]
    MissingIndex01 { track: u32 },

    #[error("line {line}: TRACK numbers must increase strictly (got {got} after {previous})")]
    NonMonotonicTrack {
        line: usize,
        previous: u32,
        got: u32,
    },

    #[error("line {line}: malformed TRACK declaration {text:?}")]
    BadTrackLine { line: usize, text: String },
}

/// External process failure, timeout, unexpected exit code, or I/O failure
/// while assembling the artifact.
#[derive(Debug, thiserror::Error)]
pub enum MaterializationError {
    #[error("{stage}: failed to start {program:?}: {cause}")]
    Spawn {
        stage: Stage,
        program: String,
        #[source]
        cause: std::io::Error,
    },

    #[error("{stage}: {program:?} timed out after {timeout_secs}s")]
    Timeout {
        stage: Stage,
        program: String,
        timeout_secs: u64,
    },

    #[error("{stage}: {program:?} exited with {status}: {stderr}")]
    NonZeroExit {
        stage: Stage,
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("{stage}: I/O error moving bytes through the pipeline: {cause}")]
    Io {
        stage: Stage,
        #[source]
        cause: std::io::Error,
    },

    #[error("{stage}: rewriting FLAC metadata blocks: {cause}")]
    Metaflac {
        stage: Stage,
        #[source]
        cause: metaflac::Error,
    },
}

/// Which pipeline stage a [`MaterializationError`] originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Decode,
    Encode,
    TagSynthesis,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Decode => write!(f, "decode"),
            Stage::Encode => write!(f, "encode"),
            Stage::TagSynthesis => write!(f, "tag synthesis"),
        }
    }
}

/// Handle-time failure on a pass-through file.
#[derive(Debug, thiserror::Error)]
#[error("reading {path:?}: {cause}")]
pub struct ReadError {
    pub path: PathBuf,
    #[source]
    pub cause: std::io::Error,
}

/// Write attempt on the read-only filesystem, or lookup of a non-existent path.
#[derive(Debug, thiserror::Error)]
pub enum FilesystemError {
    #[error("read-only filesystem")]
    ReadOnly,

    #[error("no such file or directory")]
    NotFound,
}
