//! `[AMBIENT]` Component H: validated configuration shared by B–G.

use std::time::Duration;

use regex::Regex;

use crate::error::ConfigError;

pub const DEFAULT_SEPARATOR: &str = ".#-#.";
pub const DEFAULT_EXTENSION_PATTERN: &str = r"(?i)\.flac$|\.wav$";
pub const DEFAULT_IGNORE_TAGS_PATTERN: &str = r"(?i)CUE_TRACK.*|COMMENT";
pub const DEFAULT_TITLE_LENGTH: usize = 20;
pub const DEFAULT_DECODER_CMD: &str =
    "flac --decode --stdout --silent --force --skip={start} --until={end} {input}";
pub const DEFAULT_ENCODER_CMD: &str = "flac --stdin --stdout --silent --force --force-raw-format \
     --endian=little --sign=signed --channels={channels} --bps={bps} --sample-rate={rate} -o - -";

/// Resolved, validated configuration. Constructed once at startup; immutable thereafter.
#[derive(Debug, Clone)]
pub struct Config {
    pub extension_pattern: Regex,
    pub separator: String,
    pub ignore_tags_pattern: Regex,
    pub keep_album: bool,
    pub title_length: usize,
    pub decoder_cmd: String,
    pub encoder_cmd: String,
    pub materialize_timeout: Duration,
    pub cache_bytes: u64,
    pub cache_memory_threshold: u64,
    pub negative_ttl: Duration,
    pub concurrency_limit: usize,
}

/// Builder mirroring the CLI flags of spec.md §6 / SPEC_FULL.md §6.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    pub extension_pattern: String,
    pub separator: String,
    pub ignore_tags_pattern: String,
    pub keep_album: bool,
    pub title_length: usize,
    pub decoder_cmd: String,
    pub encoder_cmd: String,
    pub materialize_timeout_secs: u64,
    pub cache_bytes: u64,
    pub cache_memory_threshold: u64,
    pub negative_ttl_secs: u64,
    pub concurrency_limit: Option<usize>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            extension_pattern: DEFAULT_EXTENSION_PATTERN.to_string(),
            separator: DEFAULT_SEPARATOR.to_string(),
            ignore_tags_pattern: DEFAULT_IGNORE_TAGS_PATTERN.to_string(),
            keep_album: false,
            title_length: DEFAULT_TITLE_LENGTH,
            decoder_cmd: DEFAULT_DECODER_CMD.to_string(),
            encoder_cmd: DEFAULT_ENCODER_CMD.to_string(),
            materialize_timeout_secs: 30,
            cache_bytes: bytesize::ByteSize::mib(512).as_u64(),
            cache_memory_threshold: bytesize::ByteSize::mib(8).as_u64(),
            negative_ttl_secs: 30,
            concurrency_limit: None,
        }
    }
}

impl ConfigBuilder {
    pub fn build(self) -> Result<Config, ConfigError> {
        if self.separator.is_empty() {
            return Err(ConfigError::EmptySeparator(self.separator));
        }
        let extension_pattern =
            Regex::new(&self.extension_pattern).map_err(ConfigError::BadExtensionRegex)?;
        let ignore_tags_pattern =
            Regex::new(&self.ignore_tags_pattern).map_err(ConfigError::BadIgnoreTagsRegex)?;
        let concurrency_limit = self
            .concurrency_limit
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(4, |n| n.get()));
        Ok(Config {
            extension_pattern,
            separator: self.separator,
            ignore_tags_pattern,
            keep_album: self.keep_album,
            title_length: self.title_length,
            decoder_cmd: self.decoder_cmd,
            encoder_cmd: self.encoder_cmd,
            materialize_timeout: Duration::from_secs(self.materialize_timeout_secs),
            cache_bytes: self.cache_bytes,
            cache_memory_threshold: self.cache_memory_threshold,
            negative_ttl: Duration::from_secs(self.negative_ttl_secs),
            concurrency_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds() {
        ConfigBuilder::default().build().expect("default config");
    }

    #[test]
    fn empty_separator_rejected() {
        let mut builder = ConfigBuilder::default();
        builder.separator = String::new();
        assert!(matches!(
            builder.build(),
            Err(ConfigError::EmptySeparator(_))
        ));
    }

    #[test]
    fn bad_regex_rejected() {
        let mut builder = ConfigBuilder::default();
        builder.extension_pattern = "(".to_string();
        assert!(matches!(
            builder.build(),
            Err(ConfigError::BadExtensionRegex(_))
        ));
    }
}
