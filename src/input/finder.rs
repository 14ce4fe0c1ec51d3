// SPDX-License-Identifier: Apache-2.0

//! Glob expansion and per-scan file matching.
//!
//! `**` is not handed to the filesystem matcher directly; it is expanded
//! into a bounded chain of single-level wildcards first, so a runaway
//! pattern can never walk an unbounded directory tree.

use std::collections::HashSet;
use std::path::PathBuf;

use glob::glob;
use regex::Regex;

use crate::error::{Error, Result};

/// Maximum directory depth a `**` segment may expand to.
pub const RECURSIVE_GLOB_DEPTH: usize = 8;

/// Expand a pattern containing at most one `**` segment into concrete
/// single-level wildcard patterns of increasing depth.
///
/// `foo/**/bar.log` with depth 2 becomes `foo/bar.log`, `foo/*/bar.log`,
/// `foo/*/*/bar.log`. A pattern without `**` (or a zero depth) is returned
/// unchanged. More than one `**` is an error.
pub fn expand(pattern: &str, max_depth: usize) -> Result<Vec<String>> {
    match pattern.matches("**").count() {
        0 => return Ok(vec![pattern.to_string()]),
        1 => {}
        _ => {
            return Err(Error::InvalidGlob(format!(
                "multiple ** are not supported in {}",
                pattern
            )));
        }
    }

    if max_depth == 0 {
        return Ok(vec![pattern.to_string()]);
    }

    let segments: Vec<&str> = pattern.split('/').collect();
    let wildcard_pos = match segments.iter().position(|s| *s == "**") {
        Some(pos) => pos,
        None => {
            // ** embedded inside a segment, e.g. "foo**.log"
            return Err(Error::InvalidGlob(format!(
                "** must be its own path segment in {}",
                pattern
            )));
        }
    };

    let prefix = &segments[..wildcard_pos];
    let suffix = &segments[wildcard_pos + 1..];
    let absolute = pattern.starts_with('/');

    let mut patterns = Vec::with_capacity(max_depth + 1);
    for depth in 0..=max_depth {
        let mut parts: Vec<&str> = Vec::with_capacity(prefix.len() + depth + suffix.len());
        parts.extend(prefix.iter().filter(|s| !s.is_empty()));
        parts.extend(std::iter::repeat("*").take(depth));
        parts.extend(suffix.iter().filter(|s| !s.is_empty()));

        let mut joined = parts.join("/");
        if absolute {
            joined.insert(0, '/');
        }
        if joined.is_empty() || joined == "/" {
            continue;
        }
        patterns.push(joined);
    }

    Ok(patterns)
}

/// Expand the pattern and run each concrete form against the filesystem
/// matcher, concatenating all matches. Overlapping depths can yield
/// duplicates; callers dedupe by identity.
pub fn matches(pattern: &str, max_depth: usize) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for concrete in expand(pattern, max_depth)? {
        let entries = glob(&concrete).map_err(|e| Error::InvalidGlob(e.to_string()))?;
        for entry in entries {
            match entry {
                Ok(path) => paths.push(path),
                // unreadable entry, skip it this pass
                Err(_) => continue,
            }
        }
    }
    Ok(paths)
}

/// Finds candidate files for one scan pass: expands the configured
/// patterns, drops excluded paths, dedupes paths matched by several
/// patterns.
pub struct FileFinder {
    patterns: Vec<String>,
    exclude: Vec<Regex>,
    glob_depth: usize,
}

impl FileFinder {
    pub fn new(patterns: Vec<String>, exclude: &[String], glob_depth: usize) -> Result<Self> {
        // Validate the include patterns up front, a bad pattern is a
        // startup error rather than a silent empty scan.
        for pattern in &patterns {
            expand(pattern, glob_depth)?;
            glob::Pattern::new(pattern).map_err(|e| Error::InvalidGlob(e.to_string()))?;
        }

        let exclude = exclude
            .iter()
            .map(|source| Regex::new(source).map_err(|e| Error::Regex(e.to_string())))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            exclude,
            glob_depth,
        })
    }

    pub fn is_excluded(&self, path: &PathBuf) -> bool {
        let text = path.to_string_lossy();
        self.exclude.iter().any(|re| re.is_match(&text))
    }

    /// All paths matching any pattern, excluded paths dropped, each path
    /// reported once.
    pub fn find_files(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for pattern in &self.patterns {
            let matched = match matches(pattern, self.glob_depth) {
                Ok(matched) => matched,
                Err(_) => continue, // validated at construction
            };

            for path in matched {
                if self.is_excluded(&path) {
                    continue;
                }
                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }

        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn expand_without_recursive_token_is_identity() {
        assert_eq!(
            expand("/var/log/*.log", 8).unwrap(),
            vec!["/var/log/*.log".to_string()]
        );
    }

    #[test]
    fn expand_zero_depth_is_identity() {
        assert_eq!(
            expand("/var/log/**/*.log", 0).unwrap(),
            vec!["/var/log/**/*.log".to_string()]
        );
    }

    #[test]
    fn expand_produces_increasing_depths() {
        assert_eq!(
            expand("foo/**/bar", 2).unwrap(),
            vec![
                "foo/bar".to_string(),
                "foo/*/bar".to_string(),
                "foo/*/*/bar".to_string(),
            ]
        );
    }

    #[test]
    fn expand_absolute_pattern_keeps_root() {
        assert_eq!(
            expand("/var/**/*.log", 2).unwrap(),
            vec![
                "/var/*.log".to_string(),
                "/var/*/*.log".to_string(),
                "/var/*/*/*.log".to_string(),
            ]
        );
    }

    #[test]
    fn expand_bare_recursive_token() {
        assert_eq!(
            expand("**", 2).unwrap(),
            vec!["*".to_string(), "*/*".to_string()]
        );
    }

    #[test]
    fn expand_rejects_multiple_recursive_tokens() {
        assert!(expand("a/**/b/**/c", 8).is_err());
    }

    #[test]
    fn expand_rejects_embedded_recursive_token() {
        assert!(expand("foo**.log", 8).is_err());
    }

    #[test]
    fn matches_finds_nested_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.log"), "x").unwrap();
        fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        fs::write(dir.path().join("sub/b.log"), "x").unwrap();
        fs::write(dir.path().join("sub/deeper/c.log"), "x").unwrap();

        let pattern = format!("{}/**/*.log", dir.path().display());
        let mut found = matches(&pattern, 8).unwrap();
        found.sort();
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn finder_applies_exclude_regex() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.log"), "x").unwrap();
        fs::write(dir.path().join("app.log.gz"), "x").unwrap();
        fs::write(dir.path().join("debug.log"), "x").unwrap();

        let pattern = format!("{}/*", dir.path().display());
        let finder = FileFinder::new(
            vec![pattern],
            &[r"\.gz$".to_string(), "debug".to_string()],
            8,
        )
        .unwrap();

        let files = finder.find_files();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("app.log"));
    }

    #[test]
    fn finder_dedupes_overlapping_patterns() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.log"), "x").unwrap();

        let p1 = format!("{}/*.log", dir.path().display());
        let p2 = format!("{}/a.*", dir.path().display());
        let finder = FileFinder::new(vec![p1, p2], &[], 8).unwrap();
        assert_eq!(finder.find_files().len(), 1);
    }

    #[test]
    fn finder_rejects_bad_exclude_regex() {
        assert!(FileFinder::new(vec!["/tmp/*".to_string()], &["(".to_string()], 8).is_err());
    }
}
