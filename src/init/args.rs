// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use std::path::PathBuf;

use crate::config::{
    DockerJsonConfig, Encoding, IdentityKind, InputType, JsonConfig, MultilineConfig,
    RegistryConfig, ScanOrder, ScanSort, TailerConfig,
};

/// Input type
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum InputTypeArg {
    /// Tail glob-discovered log files
    #[default]
    Log,
    /// Read standard input
    Stdin,
}

impl From<InputTypeArg> for InputType {
    fn from(t: InputTypeArg) -> Self {
        match t {
            InputTypeArg::Log => InputType::Log,
            InputTypeArg::Stdin => InputType::Stdin,
        }
    }
}

/// File identity strategy
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum IdentityArg {
    /// Device and inode numbers, survives renames
    #[default]
    Native,
    /// Absolute path, a rename is a new file
    Path,
    /// Token read from a marker file
    Marker,
}

impl From<IdentityArg> for IdentityKind {
    fn from(i: IdentityArg) -> Self {
        match i {
            IdentityArg::Native => IdentityKind::Native,
            IdentityArg::Path => IdentityKind::Path,
            IdentityArg::Marker => IdentityKind::Marker,
        }
    }
}

/// Sort key for files found within a scan pass
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum ScanSortArg {
    /// Filesystem order
    #[default]
    None,
    /// Modification time
    Modtime,
    /// File name
    Filename,
}

impl From<ScanSortArg> for ScanSort {
    fn from(s: ScanSortArg) -> Self {
        match s {
            ScanSortArg::None => ScanSort::None,
            ScanSortArg::Modtime => ScanSort::Modtime,
            ScanSortArg::Filename => ScanSort::Filename,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum ScanOrderArg {
    #[default]
    Asc,
    Desc,
}

impl From<ScanOrderArg> for ScanOrder {
    fn from(o: ScanOrderArg) -> Self {
        match o {
            ScanOrderArg::Asc => ScanOrder::Asc,
            ScanOrderArg::Desc => ScanOrder::Desc,
        }
    }
}

/// Character decoding applied to framed lines
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum EncodingArg {
    /// Bytes pass through untouched
    #[default]
    Plain,
    /// Replace invalid UTF-8 sequences
    Utf8,
}

impl From<EncodingArg> for Encoding {
    fn from(e: EncodingArg) -> Self {
        match e {
            EncodingArg::Plain => Encoding::Plain,
            EncodingArg::Utf8 => Encoding::Utf8,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct AgentArgs {
    /// Input type: log or stdin
    #[arg(value_enum, long, env = "TAILER_INPUT_TYPE", default_value = "log")]
    pub input_type: InputTypeArg,

    /// Comma-separated glob patterns for files to tail (e.g., "/var/log/**/*.log")
    #[arg(long, env = "TAILER_PATHS", value_delimiter = ',')]
    pub paths: Vec<String>,

    /// Expand ** in patterns into bounded wildcard chains
    #[arg(long, env = "TAILER_RECURSIVE_GLOB", default_value = "true")]
    pub recursive_glob: bool,

    /// Comma-separated regexes matched against full paths to exclude
    #[arg(long, env = "TAILER_EXCLUDE_FILES", value_delimiter = ',')]
    pub exclude_files: Vec<String>,

    /// File identity strategy: native, path or marker
    #[arg(value_enum, long, env = "TAILER_IDENTITY", default_value = "native")]
    pub identity: IdentityArg,

    /// Marker file read at startup when identity=marker
    #[arg(long, env = "TAILER_MARKER_PATH")]
    pub marker_path: Option<PathBuf>,

    /// Follow symlinks (the first path seen per file wins)
    #[arg(long, env = "TAILER_SYMLINKS", default_value = "false")]
    pub symlinks: bool,

    /// Interval between discovery passes
    #[arg(long, env = "TAILER_SCAN_FREQUENCY", default_value = "10s")]
    pub scan_frequency: humantime::Duration,

    /// Sort key for candidates within a scan pass: none, modtime or filename
    #[arg(value_enum, long, env = "TAILER_SCAN_SORT", default_value = "none")]
    pub scan_sort: ScanSortArg,

    /// Sort direction: asc or desc
    #[arg(value_enum, long, env = "TAILER_SCAN_ORDER", default_value = "asc")]
    pub scan_order: ScanOrderArg,

    /// Skip files not modified for this long (e.g., "24h")
    #[arg(long, env = "TAILER_IGNORE_OLDER")]
    pub ignore_older: Option<humantime::Duration>,

    /// Start files found on the first scan at their end
    #[arg(long, env = "TAILER_TAIL_FILES", default_value = "false")]
    pub tail_files: bool,

    /// Maximum concurrently open files (0 = unlimited)
    #[arg(long, env = "TAILER_HARVESTER_LIMIT", default_value = "0")]
    pub harvester_limit: usize,

    /// Drop registry states for files gone from disk
    #[arg(long, env = "TAILER_CLEAN_REMOVED", default_value = "true")]
    pub clean_removed: bool,

    /// Drop registry states untouched for this long (must exceed
    /// ignore_older plus scan_frequency)
    #[arg(long, env = "TAILER_CLEAN_INACTIVE")]
    pub clean_inactive: Option<humantime::Duration>,

    /// Close a file after this long without new data
    #[arg(long, env = "TAILER_CLOSE_INACTIVE", default_value = "5m")]
    pub close_inactive: humantime::Duration,

    /// Close a file as soon as its end is reached
    #[arg(long, env = "TAILER_CLOSE_EOF", default_value = "false")]
    pub close_eof: bool,

    /// Close a file when it is deleted
    #[arg(long, env = "TAILER_CLOSE_REMOVED", default_value = "true")]
    pub close_removed: bool,

    /// Close a file when it is renamed
    #[arg(long, env = "TAILER_CLOSE_RENAMED", default_value = "false")]
    pub close_renamed: bool,

    /// Hard cap on how long a file stays open
    #[arg(long, env = "TAILER_CLOSE_TIMEOUT")]
    pub close_timeout: Option<humantime::Duration>,

    /// Initial wait after reaching the end of a file
    #[arg(long, env = "TAILER_BACKOFF", default_value = "1s")]
    pub backoff: humantime::Duration,

    /// Multiplier applied to the wait after each idle poll
    #[arg(long, env = "TAILER_BACKOFF_FACTOR", default_value = "2")]
    pub backoff_factor: u32,

    /// Upper bound for the wait between idle polls
    #[arg(long, env = "TAILER_MAX_BACKOFF", default_value = "10s")]
    pub max_backoff: humantime::Duration,

    /// Character decoding: plain or utf8
    #[arg(value_enum, long, env = "TAILER_ENCODING", default_value = "plain")]
    pub encoding: EncodingArg,

    /// Read chunk size in bytes
    #[arg(long, env = "TAILER_BUFFER_SIZE", default_value = "16384")]
    pub buffer_size: usize,

    /// Maximum event size in bytes, longer content is truncated
    #[arg(long, env = "TAILER_MAX_BYTES", default_value = "10485760")]
    pub max_bytes: usize,

    /// Keep only lines matching one of these regexes
    #[arg(long, env = "TAILER_INCLUDE_LINES", value_delimiter = ',')]
    pub include_lines: Vec<String>,

    /// Drop lines matching one of these regexes (applied after include_lines)
    #[arg(long, env = "TAILER_EXCLUDE_LINES", value_delimiter = ',')]
    pub exclude_lines: Vec<String>,

    /// Regex that starts or continues a multiline event; enables multiline
    #[arg(long, env = "TAILER_MULTILINE_PATTERN")]
    pub multiline_pattern: Option<String>,

    /// Invert the multiline pattern match
    #[arg(long, env = "TAILER_MULTILINE_NEGATE", default_value = "false")]
    pub multiline_negate: bool,

    /// Matching lines attach after the event they belong to
    #[arg(long, env = "TAILER_MULTILINE_MATCH_AFTER", default_value = "true")]
    pub multiline_match_after: bool,

    /// Maximum lines folded into one multiline event
    #[arg(long, env = "TAILER_MULTILINE_MAX_LINES", default_value = "500")]
    pub multiline_max_lines: usize,

    /// Flush a pending multiline event after this much quiet time
    #[arg(long, env = "TAILER_MULTILINE_TIMEOUT", default_value = "5s")]
    pub multiline_timeout: humantime::Duration,

    /// Decode each line as a JSON object
    #[arg(long, env = "TAILER_JSON", default_value = "false")]
    pub json: bool,

    /// JSON key whose string value replaces the event message
    #[arg(long, env = "TAILER_JSON_MESSAGE_KEY")]
    pub json_message_key: Option<String>,

    /// Lift decoded JSON keys to the top level of each event
    #[arg(long, env = "TAILER_JSON_KEYS_UNDER_ROOT", default_value = "false")]
    pub json_keys_under_root: bool,

    /// Record JSON decode failures under an "error" field
    #[arg(long, env = "TAILER_JSON_ADD_ERROR_KEY", default_value = "false")]
    pub json_add_error_key: bool,

    /// Unwrap docker json-file log lines
    #[arg(long, env = "TAILER_DOCKER_JSON", default_value = "false")]
    pub docker_json: bool,

    /// Docker stream to keep: all, stdout or stderr
    #[arg(long, env = "TAILER_DOCKER_JSON_STREAM", default_value = "all")]
    pub docker_json_stream: String,

    /// Path of the on-disk state registry
    #[arg(
        long,
        env = "TAILER_REGISTRY_PATH",
        default_value = "/var/lib/tailer/registry.json"
    )]
    pub registry_path: PathBuf,

    /// Interval between registry rewrites
    #[arg(long, env = "TAILER_REGISTRY_FLUSH", default_value = "1s")]
    pub registry_flush: humantime::Duration,
}

impl AgentArgs {
    /// Build the input config from command line args
    pub fn build_config(&self) -> TailerConfig {
        TailerConfig {
            input_type: self.input_type.into(),
            paths: self.paths.clone(),
            recursive_glob: self.recursive_glob,
            exclude_files: self.exclude_files.clone(),
            identity: self.identity.into(),
            marker_path: self.marker_path.clone(),
            symlinks: self.symlinks,
            scan_frequency: self.scan_frequency.into(),
            scan_sort: self.scan_sort.into(),
            scan_order: self.scan_order.into(),
            ignore_older: self.ignore_older.map(Into::into),
            tail_files: self.tail_files,
            harvester_limit: self.harvester_limit,
            clean_removed: self.clean_removed,
            clean_inactive: self.clean_inactive.map(Into::into),
            close_inactive: self.close_inactive.into(),
            close_eof: self.close_eof,
            close_removed: self.close_removed,
            close_renamed: self.close_renamed,
            close_timeout: self.close_timeout.map(Into::into),
            backoff: self.backoff.into(),
            backoff_factor: self.backoff_factor,
            max_backoff: self.max_backoff.into(),
            encoding: self.encoding.into(),
            buffer_size: self.buffer_size,
            max_bytes: self.max_bytes,
            include_lines: self.include_lines.clone(),
            exclude_lines: self.exclude_lines.clone(),
            multiline: self
                .multiline_pattern
                .as_ref()
                .map(|pattern| MultilineConfig {
                    pattern: pattern.clone(),
                    negate: self.multiline_negate,
                    match_after: self.multiline_match_after,
                    max_lines: self.multiline_max_lines,
                    timeout: self.multiline_timeout.into(),
                }),
            json: self.json.then(|| JsonConfig {
                message_key: self.json_message_key.clone(),
                keys_under_root: self.json_keys_under_root,
                add_error_key: self.json_add_error_key,
            }),
            docker_json: self.docker_json.then(|| DockerJsonConfig {
                stream: self.docker_json_stream.clone(),
            }),
        }
    }

    pub fn build_registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            path: self.registry_path.clone(),
            flush: self.registry_flush.into(),
        }
    }
}
