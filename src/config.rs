// SPDX-License-Identifier: Apache-2.0

//! Configuration for the tailer input.

use std::path::PathBuf;
use std::time::Duration;

/// How a file keeps its identity across renames and rotations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdentityKind {
    /// Device and inode numbers (default; survives renames)
    #[default]
    Native,
    /// Absolute path (a rename is a new file)
    Path,
    /// Token read from a marker file (shared-filesystem setups)
    Marker,
}

/// Sort key applied to the candidate list of each scan pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanSort {
    /// Unsorted, filesystem order
    #[default]
    None,
    /// Sort by modification time
    Modtime,
    /// Sort by file name
    Filename,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanOrder {
    #[default]
    Asc,
    Desc,
}

/// Where lines come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InputType {
    /// Glob-discovered log files
    #[default]
    Log,
    /// Standard input, one harvester, no state
    Stdin,
}

/// Character decoding applied to each framed line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// Bytes pass through untouched
    #[default]
    Plain,
    /// Invalid UTF-8 sequences are replaced; consumed byte counts are
    /// unaffected
    Utf8,
}

/// Multiline aggregation, pattern-based.
#[derive(Debug, Clone)]
pub struct MultilineConfig {
    /// Regex matched against each line
    pub pattern: String,
    /// Invert the pattern match
    pub negate: bool,
    /// Matching lines attach to the event before or after them
    pub match_after: bool,
    /// Maximum lines folded into one event; the rest are discarded
    pub max_lines: usize,
    /// Flush a pending aggregate after this much quiet time
    pub timeout: Duration,
}

impl Default for MultilineConfig {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            negate: false,
            match_after: true,
            max_lines: 500,
            timeout: Duration::from_secs(5),
        }
    }
}

/// JSON line decoding.
#[derive(Debug, Clone, Default)]
pub struct JsonConfig {
    /// Key whose value replaces the event message
    pub message_key: Option<String>,
    /// Lift decoded keys to the top level of the event
    pub keys_under_root: bool,
    /// Record decode failures under an error key instead of dropping context
    pub add_error_key: bool,
}

/// Docker json-file log driver decoding.
#[derive(Debug, Clone)]
pub struct DockerJsonConfig {
    /// Which stream to keep: "all", "stdout" or "stderr"
    pub stream: String,
}

impl Default for DockerJsonConfig {
    fn default() -> Self {
        Self {
            stream: "all".to_string(),
        }
    }
}

/// Configuration for one tailer input.
#[derive(Debug, Clone)]
pub struct TailerConfig {
    /// Input type: log files or stdin
    pub input_type: InputType,
    /// Glob patterns for files to tail
    pub paths: Vec<String>,
    /// Expand `**` in patterns into bounded wildcard chains
    pub recursive_glob: bool,
    /// Regexes matched against full paths to exclude
    pub exclude_files: Vec<String>,
    /// File identity strategy
    pub identity: IdentityKind,
    /// Marker file for IdentityKind::Marker
    pub marker_path: Option<PathBuf>,
    /// Follow symlinks (dedup keeps the first path seen per identity)
    pub symlinks: bool,
    /// Interval between discovery passes
    pub scan_frequency: Duration,
    /// Sort key for candidates within a scan pass
    pub scan_sort: ScanSort,
    /// Sort direction
    pub scan_order: ScanOrder,
    /// Skip files not modified for this long (disabled when None)
    pub ignore_older: Option<Duration>,
    /// Start new files at EOF during the first scan pass only
    pub tail_files: bool,
    /// Maximum concurrently running harvesters (0 = unlimited)
    pub harvester_limit: usize,
    /// Drop states for files gone from disk
    pub clean_removed: bool,
    /// State TTL for inactive files (disabled when None)
    pub clean_inactive: Option<Duration>,
    /// Close the file after this long without new data
    pub close_inactive: Duration,
    /// Close as soon as EOF is reached
    pub close_eof: bool,
    /// Close when the file is deleted
    pub close_removed: bool,
    /// Close when the file is renamed
    pub close_renamed: bool,
    /// Hard per-harvester lifetime cap (disabled when None)
    pub close_timeout: Option<Duration>,
    /// Initial wait after reaching EOF
    pub backoff: Duration,
    /// Multiplier applied to the wait after each idle poll
    pub backoff_factor: u32,
    /// Upper bound for the wait
    pub max_backoff: Duration,
    /// Character decoding for framed lines
    pub encoding: Encoding,
    /// Read chunk size in bytes
    pub buffer_size: usize,
    /// Maximum event size in bytes; longer content is truncated
    pub max_bytes: usize,
    /// Keep only lines matching one of these regexes
    pub include_lines: Vec<String>,
    /// Drop lines matching one of these regexes (applied after include_lines)
    pub exclude_lines: Vec<String>,
    /// Multiline aggregation (disabled when None)
    pub multiline: Option<MultilineConfig>,
    /// JSON decoding (disabled when None)
    pub json: Option<JsonConfig>,
    /// Docker json-file decoding (disabled when None)
    pub docker_json: Option<DockerJsonConfig>,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            input_type: InputType::Log,
            paths: Vec::new(),
            recursive_glob: true,
            exclude_files: Vec::new(),
            identity: IdentityKind::Native,
            marker_path: None,
            symlinks: false,
            scan_frequency: Duration::from_secs(10),
            scan_sort: ScanSort::None,
            scan_order: ScanOrder::Asc,
            ignore_older: None,
            tail_files: false,
            harvester_limit: 0,
            clean_removed: true,
            clean_inactive: None,
            close_inactive: Duration::from_secs(5 * 60),
            close_eof: false,
            close_removed: true,
            close_renamed: false,
            close_timeout: None,
            backoff: Duration::from_secs(1),
            backoff_factor: 2,
            max_backoff: Duration::from_secs(10),
            encoding: Encoding::Plain,
            buffer_size: 16 * 1024,
            max_bytes: 10 * 1024 * 1024,
            include_lines: Vec::new(),
            exclude_lines: Vec::new(),
            multiline: None,
            json: None,
            docker_json: None,
        }
    }
}

impl TailerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.input_type == InputType::Log && self.paths.is_empty() {
            return Err("At least one path pattern must be specified".to_string());
        }

        if self.backoff.is_zero() {
            return Err("backoff must be greater than zero".to_string());
        }

        if self.backoff > self.max_backoff {
            return Err(format!(
                "max_backoff ({:?}) must not be lower than backoff ({:?})",
                self.max_backoff, self.backoff
            ));
        }

        if self.backoff_factor < 1 {
            return Err("backoff_factor must be at least 1".to_string());
        }

        if self.buffer_size == 0 {
            return Err("buffer_size must be greater than zero".to_string());
        }

        if self.max_bytes == 0 {
            return Err("max_bytes must be greater than zero".to_string());
        }

        // A state must outlive the window in which its file can still be
        // rediscovered, otherwise offsets reset mid-rotation.
        if let (Some(clean_inactive), Some(ignore_older)) =
            (self.clean_inactive, self.ignore_older)
        {
            if clean_inactive <= ignore_older + self.scan_frequency {
                return Err(format!(
                    "clean_inactive ({:?}) must be greater than ignore_older ({:?}) plus scan_frequency ({:?})",
                    clean_inactive, ignore_older, self.scan_frequency
                ));
            }
        }

        if self.identity == IdentityKind::Marker && self.marker_path.is_none() {
            return Err("identity 'marker' requires a marker file path".to_string());
        }

        if let Some(ml) = &self.multiline {
            if ml.pattern.is_empty() {
                return Err("multiline requires a pattern".to_string());
            }
            if ml.max_lines == 0 {
                return Err("multiline max_lines must be at least 1".to_string());
            }
        }

        if let Some(docker) = &self.docker_json {
            match docker.stream.as_str() {
                "all" | "stdout" | "stderr" => {}
                other => {
                    return Err(format!(
                        "docker stream must be one of all, stdout, stderr (got {})",
                        other
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Configuration for the on-disk state registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Path of the registry file
    pub path: PathBuf,
    /// Interval between registry rewrites
    pub flush: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/tailer/registry.json"),
            flush: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_needs_paths() {
        let config = TailerConfig::default();
        assert!(config.validate().is_err());

        let config = TailerConfig {
            paths: vec!["/var/log/*.log".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn stdin_needs_no_paths() {
        let config = TailerConfig {
            input_type: InputType::Stdin,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn backoff_bounds_checked() {
        let config = TailerConfig {
            paths: vec!["/tmp/*.log".to_string()],
            backoff: Duration::from_secs(20),
            max_backoff: Duration::from_secs(10),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn clean_inactive_must_cover_rediscovery_window() {
        let config = TailerConfig {
            paths: vec!["/tmp/*.log".to_string()],
            ignore_older: Some(Duration::from_secs(60)),
            clean_inactive: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TailerConfig {
            paths: vec!["/tmp/*.log".to_string()],
            ignore_older: Some(Duration::from_secs(60)),
            clean_inactive: Some(Duration::from_secs(120)),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn marker_identity_needs_marker_path() {
        let config = TailerConfig {
            paths: vec!["/tmp/*.log".to_string()],
            identity: IdentityKind::Marker,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
