// SPDX-License-Identifier: Apache-2.0

//! Durable registry file. The on-disk copy is rewritten atomically
//! (write-to-temp-then-rename), so a crash leaves either the old or the new
//! registry, never a torn one.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::registry::{State, StateRegistry, Ttl};

/// Flushes the in-memory registry to disk on an interval and at shutdown.
pub struct Registrar {
    registry: Arc<StateRegistry>,
    path: PathBuf,
    flush_interval: Duration,
}

impl Registrar {
    pub fn new(registry: Arc<StateRegistry>, path: PathBuf, flush_interval: Duration) -> Self {
        Self {
            registry,
            path,
            flush_interval,
        }
    }

    /// Load persisted states into the registry. Every loaded state starts
    /// finished (no harvester owns it yet) with an unmanaged TTL; the scanner
    /// re-arms TTLs once a configured pattern reclaims the file.
    pub fn load(&self) -> Result<usize> {
        let states = match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice::<Vec<State>>(&bytes)
                .map_err(|e| Error::Persistence(format!("corrupt registry file: {}", e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No registry file, starting fresh");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let mut loaded = Vec::with_capacity(states.len());
        for mut state in states {
            if !state.finished {
                warn!(
                    id = %state.id,
                    source = %state.source.display(),
                    "Registry entry was not marked finished; prior shutdown was unclean"
                );
                state.finished = true;
            }
            state.ttl = Ttl::Never;
            loaded.push(state);
        }

        let count = loaded.len();
        self.registry.replace_all(loaded);
        info!(states = count, path = %self.path.display(), "Loaded registry");
        Ok(count)
    }

    /// Rewrite the registry file from the current in-memory snapshot.
    pub fn flush(&self) -> Result<()> {
        let snapshot = self.registry.snapshot();
        atomic_write(&self.path, &snapshot)?;
        debug!(states = snapshot.len(), "Flushed registry");
        Ok(())
    }

    /// Flush loop, runs on a dedicated thread until the stop channel closes
    /// or receives a signal. Always flushes once more on the way out.
    pub fn run(self, stop_rx: Receiver<()>) {
        loop {
            match stop_rx.recv_timeout(self.flush_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            if let Err(e) = self.flush() {
                warn!(error = %e, path = %self.path.display(), "Registry flush failed");
            }
        }

        if let Err(e) = self.flush() {
            warn!(error = %e, path = %self.path.display(), "Final registry flush failed");
        }
    }
}

/// Write states to the registry file atomically (write to temp, then rename).
fn atomic_write(path: &Path, states: &[State]) -> Result<()> {
    use portable_atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create parent directory: {}", e))
            })?;
        }
    }

    // Unique temp file name so concurrent writers cannot trample each other
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let file = File::create(&temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, states)
        .map_err(|e| Error::Persistence(format!("failed to write registry: {}", e)))?;

    use std::io::Write;
    writer
        .flush()
        .map_err(|e| Error::Persistence(format!("failed to flush registry: {}", e)))?;
    drop(writer);

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::Persistence(format!("failed to rename registry into place: {}", e))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::identity::FileIdent;
    use std::time::Duration;
    use tempfile::TempDir;

    fn state(id: &str, offset: u64, finished: bool) -> State {
        let mut s = State::new(
            id.to_string(),
            PathBuf::from(format!("/tmp/{id}.log")),
            FileIdent::default(),
            "native",
        );
        s.offset = offset;
        s.finished = finished;
        s
    }

    #[test]
    fn flush_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");

        let registry = Arc::new(StateRegistry::new());
        registry.update(state("a", 100, true));
        registry.update(state("b", 5, true));

        let registrar = Registrar::new(registry, path.clone(), Duration::from_secs(1));
        registrar.flush().unwrap();

        let fresh = Arc::new(StateRegistry::new());
        let registrar = Registrar::new(fresh.clone(), path, Duration::from_secs(1));
        assert_eq!(registrar.load().unwrap(), 2);
        assert_eq!(fresh.find("a").offset, 100);
        assert_eq!(fresh.find("b").offset, 5);
    }

    #[test]
    fn load_forces_finished_and_unmanaged_ttl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");

        let registry = Arc::new(StateRegistry::new());
        let mut s = state("crashed", 42, false);
        s.ttl = Ttl::After(Duration::from_secs(60));
        registry.update(s);

        Registrar::new(registry, path.clone(), Duration::from_secs(1))
            .flush()
            .unwrap();

        let fresh = Arc::new(StateRegistry::new());
        Registrar::new(fresh.clone(), path, Duration::from_secs(1))
            .load()
            .unwrap();

        let loaded = fresh.find("crashed");
        assert!(loaded.finished);
        assert_eq!(loaded.ttl, Ttl::Never);
        assert_eq!(loaded.offset, 42);
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(StateRegistry::new());
        let registrar = Registrar::new(
            registry.clone(),
            dir.path().join("missing.json"),
            Duration::from_secs(1),
        );
        assert_eq!(registrar.load().unwrap(), 0);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn load_corrupt_file_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, b"{not json").unwrap();

        let registrar = Registrar::new(
            Arc::new(StateRegistry::new()),
            path,
            Duration::from_secs(1),
        );
        assert!(registrar.load().is_err());
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        atomic_write(&path, &[state("a", 1, true)]).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("registry.json")]);
    }
}
