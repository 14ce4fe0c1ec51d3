// SPDX-License-Identifier: Apache-2.0

//! Durable file identity.
//!
//! The raw identity of a file is its device + inode pair, which survives
//! renames and rotations. The identity *strategy* maps that (plus the path,
//! plus an optional marker token) to the string key the registry tracks the
//! file under.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{IdentityKind, TailerConfig};
use crate::error::{Error, Result};

/// Raw identity of a file: device ID + inode number.
///
/// Stable across renames, which makes it the anchor for tracking log files
/// through rotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdent {
    dev: u64,
    ino: u64,
}

impl FileIdent {
    /// From raw values, used when loading persisted state.
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    pub fn from_file(file: &File) -> io::Result<Self> {
        Ok(Self::from_metadata(&file.metadata()?))
    }

    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::from_metadata(&fs::metadata(path)?))
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }
}

impl std::fmt::Display for FileIdent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

/// Get the current path of an open file handle.
///
/// Used to detect renames: the handle keeps working after a rename, but the
/// kernel-side path changes. Returns an error (path ends in " (deleted)" on
/// Linux, or the readlink fails) once the file is gone.
#[cfg(target_os = "linux")]
pub fn get_path_from_file(file: &File) -> io::Result<PathBuf> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    let link_path = format!("/proc/self/fd/{}", fd);
    fs::read_link(&link_path)
}

#[cfg(target_os = "macos")]
pub fn get_path_from_file(file: &File) -> io::Result<PathBuf> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();

    // F_GETPATH returns the path in a buffer
    let mut buf = vec![0u8; libc::PATH_MAX as usize];
    let result = unsafe { libc::fcntl(fd, libc::F_GETPATH, buf.as_mut_ptr()) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let path_str = std::str::from_utf8(&buf[..len])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    Ok(PathBuf::from(path_str))
}

/// Maps a file's raw identity and path to the registry key.
pub trait IdentityStrategy: Send + Sync {
    /// Strategy name, persisted alongside each state.
    fn name(&self) -> &'static str;

    /// Registry key for a file.
    fn identify(&self, path: &Path, ident: FileIdent) -> String;
}

/// Device + inode. The default; keys survive renames.
pub struct NativeIdentity;

impl IdentityStrategy for NativeIdentity {
    fn name(&self) -> &'static str {
        "native"
    }

    fn identify(&self, _path: &Path, ident: FileIdent) -> String {
        format!("native::{}-{}", ident.ino(), ident.dev())
    }
}

/// Absolute path. A rename makes a new identity; useful when inodes are
/// recycled aggressively.
pub struct PathIdentity;

impl IdentityStrategy for PathIdentity {
    fn name(&self) -> &'static str {
        "path"
    }

    fn identify(&self, path: &Path, _ident: FileIdent) -> String {
        format!("path::{}", path.display())
    }
}

/// Inode plus a token read from a marker file, for shared filesystems where
/// device IDs are not stable across mounts.
pub struct MarkerIdentity {
    marker: String,
}

impl MarkerIdentity {
    pub fn new(marker_path: &Path) -> Result<Self> {
        let marker = fs::read_to_string(marker_path).map_err(|e| {
            Error::Config(format!(
                "failed to read marker file {}: {}",
                marker_path.display(),
                e
            ))
        })?;
        Ok(Self {
            marker: marker.trim().to_string(),
        })
    }
}

impl IdentityStrategy for MarkerIdentity {
    fn name(&self) -> &'static str {
        "marker"
    }

    fn identify(&self, _path: &Path, ident: FileIdent) -> String {
        format!("marker::{}-{}", ident.ino(), self.marker)
    }
}

/// Build the configured strategy.
pub fn build_strategy(config: &TailerConfig) -> Result<Arc<dyn IdentityStrategy>> {
    Ok(match config.identity {
        IdentityKind::Native => Arc::new(NativeIdentity),
        IdentityKind::Path => Arc::new(PathIdentity),
        IdentityKind::Marker => {
            let marker_path = config
                .marker_path
                .as_deref()
                .ok_or_else(|| Error::Config("marker identity requires a marker path".into()))?;
            Arc::new(MarkerIdentity::new(marker_path)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn ident_from_file_and_path_agree() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();
        file.flush().unwrap();

        let f = file.reopen().unwrap();
        let from_file = FileIdent::from_file(&f).unwrap();
        let from_path = FileIdent::from_path(file.path()).unwrap();
        assert_eq!(from_file, from_path);
    }

    #[test]
    fn ident_stable_across_rename() {
        let dir = tempfile::TempDir::new().unwrap();
        let old = dir.path().join("a.log");
        let new = dir.path().join("a.log.1");
        fs::write(&old, b"x").unwrap();

        let before = FileIdent::from_path(&old).unwrap();
        fs::rename(&old, &new).unwrap();
        let after = FileIdent::from_path(&new).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn ident_differs_between_files() {
        let file1 = NamedTempFile::new().unwrap();
        let file2 = NamedTempFile::new().unwrap();
        let id1 = FileIdent::from_path(file1.path()).unwrap();
        let id2 = FileIdent::from_path(file2.path()).unwrap();
        assert_ne!(id1, id2);
    }

    #[test]
    fn native_key_survives_rename_path_key_does_not() {
        let ident = FileIdent::new(10, 20);
        let native = NativeIdentity;
        let path = PathIdentity;

        let a = Path::new("/var/log/a.log");
        let b = Path::new("/var/log/a.log.1");

        assert_eq!(native.identify(a, ident), native.identify(b, ident));
        assert_ne!(path.identify(a, ident), path.identify(b, ident));
    }

    #[test]
    fn keys_are_namespaced_per_strategy() {
        let ident = FileIdent::new(1, 2);
        let p = Path::new("/x");
        let native = NativeIdentity.identify(p, ident);
        let path = PathIdentity.identify(p, ident);
        assert!(native.starts_with("native::"));
        assert!(path.starts_with("path::"));
        assert_ne!(native, path);
    }

    #[test]
    fn marker_reads_trimmed_token() {
        let mut marker = NamedTempFile::new().unwrap();
        marker.write_all(b"node-7\n").unwrap();
        marker.flush().unwrap();

        let strategy = MarkerIdentity::new(marker.path()).unwrap();
        let key = strategy.identify(Path::new("/x"), FileIdent::new(1, 42));
        assert_eq!(key, "marker::42-node-7");
    }

    #[test]
    fn get_path_from_file_resolves() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();
        file.flush().unwrap();

        let original_path = file.path().to_path_buf();
        let f = file.reopen().unwrap();

        let retrieved_path = get_path_from_file(&f).unwrap();
        let original_canonical = original_path.canonicalize().unwrap();
        let retrieved_canonical = retrieved_path.canonicalize().unwrap_or(retrieved_path);
        assert_eq!(original_canonical, retrieved_canonical);
    }
}
