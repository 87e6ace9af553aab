//! `trackfs`: mounts a music library as a read-only FUSE filesystem,
//! splitting cue-sheet albums into per-track synthetic FLAC files.

mod fuse_fs;
mod handle;
mod vfs;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use bytesize::ByteSize;
use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use trackfs_core::config::{
    DEFAULT_DECODER_CMD, DEFAULT_ENCODER_CMD, DEFAULT_EXTENSION_PATTERN, DEFAULT_IGNORE_TAGS_PATTERN,
    DEFAULT_SEPARATOR, DEFAULT_TITLE_LENGTH,
};
use trackfs_core::{ConfigBuilder, Library};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory tree to expose, read-only, with albums split into tracks.
    source_root: PathBuf,

    /// Where to mount the virtual filesystem.
    mount_point: PathBuf,

    #[arg(short = 'e', long = "extension", default_value = DEFAULT_EXTENSION_PATTERN)]
    extension: String,

    #[arg(short = 's', long = "separator", default_value = DEFAULT_SEPARATOR)]
    separator: String,

    #[arg(short = 'i', long = "ignore-tags", default_value = DEFAULT_IGNORE_TAGS_PATTERN)]
    ignore_tags: String,

    #[arg(short = 'k', long = "keep-album")]
    keep_album: bool,

    #[arg(short = 't', long = "title-length", default_value_t = DEFAULT_TITLE_LENGTH)]
    title_length: usize,

    #[arg(long = "root-allowed")]
    root_allowed: bool,

    #[arg(long = "decoder-cmd", default_value = DEFAULT_DECODER_CMD)]
    decoder_cmd: String,

    #[arg(long = "encoder-cmd", default_value = DEFAULT_ENCODER_CMD)]
    encoder_cmd: String,

    #[arg(long = "materialize-timeout", default_value = "30")]
    materialize_timeout_secs: u64,

    #[arg(long = "cache-bytes", default_value = "512MB")]
    cache_bytes: ByteSize,

    #[arg(long = "cache-memory-threshold", default_value = "8MB")]
    cache_memory_threshold: ByteSize,

    #[arg(long = "negative-ttl", default_value = "30")]
    negative_ttl_secs: u64,

    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_REFUSED_ROOT: u8 = 2;
const EXIT_MOUNT_FAILURE: u8 = 3;
const EXIT_FATAL_RUNTIME: u8 = 4;

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    if !args.root_allowed && is_running_as_root() {
        tracing::error!("refusing to run as uid 0 without --root-allowed");
        return ExitCode::from(EXIT_REFUSED_ROOT);
    }

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    if !args.source_root.is_dir() {
        tracing::error!(path = %args.source_root.display(), "source root is not a directory");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let library = Arc::new(Library::new(config));
    let filesystem = fuse_fs::TrackFs::new(library, args.source_root.clone());

    let mount_options = [fuser::MountOption::RO, fuser::MountOption::FSName("trackfs".to_string())];
    tracing::info!(
        source = %args.source_root.display(),
        mount = %args.mount_point.display(),
        "mounting"
    );
    match fuser::mount2(filesystem, &args.mount_point, &mount_options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "mount failed");
            if is_mount_error(&err) {
                ExitCode::from(EXIT_MOUNT_FAILURE)
            } else {
                ExitCode::from(EXIT_FATAL_RUNTIME)
            }
        }
    }
}

fn build_config(args: &Args) -> anyhow::Result<trackfs_core::Config> {
    let mut builder = ConfigBuilder::default();
    builder.extension_pattern = args.extension.clone();
    builder.separator = args.separator.clone();
    builder.ignore_tags_pattern = args.ignore_tags.clone();
    builder.keep_album = args.keep_album;
    builder.title_length = args.title_length;
    builder.decoder_cmd = args.decoder_cmd.clone();
    builder.encoder_cmd = args.encoder_cmd.clone();
    builder.materialize_timeout_secs = args.materialize_timeout_secs;
    builder.cache_bytes = args.cache_bytes.as_u64();
    builder.cache_memory_threshold = args.cache_memory_threshold.as_u64();
    builder.negative_ttl_secs = args.negative_ttl_secs;
    builder.build().context("building configuration")
}

fn is_running_as_root() -> bool {
    // SAFETY: getuid takes no arguments and never fails.
    unsafe { libc::getuid() == 0 }
}

fn is_mount_error(err: &std::io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::ENOENT) | Some(libc::EPERM) | Some(libc::EBUSY)
    )
}

fn init_logging(args: &Args) {
    let default_level = if args.debug {
        tracing_subscriber::filter::LevelFilter::DEBUG
    } else if args.verbose {
        tracing_subscriber::filter::LevelFilter::INFO
    } else {
        tracing_subscriber::filter::LevelFilter::WARN
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    let app_log_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();
    tracing_subscriber::registry()
        .with(filter)
        .with(app_log_layer)
        .init();
}
