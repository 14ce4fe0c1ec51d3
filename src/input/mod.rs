// SPDX-License-Identifier: Apache-2.0

//! The scanner/reconciler: maps the filesystem onto registered state once
//! per interval and decides, per file, whether to start a harvester, resume
//! one, restart after truncation, rewrite a renamed path, or do nothing.

pub mod finder;
pub mod identity;

use std::collections::HashSet;
use std::fs::Metadata;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, error, info, warn};

use crate::config::{ScanOrder, ScanSort, TailerConfig};
use crate::error::{Error, Result};
use crate::harvester::{Harvester, HarvesterHandle, LineFilters};
use crate::input::finder::{FileFinder, RECURSIVE_GLOB_DEPTH};
use crate::input::identity::{build_strategy, FileIdent, IdentityStrategy};
use crate::output::Outlet;
use crate::registry::{State, StateRegistry, Ttl};

pub struct Input {
    config: Arc<TailerConfig>,
    states: Arc<StateRegistry>,
    outlet: Arc<dyn Outlet>,
    identity: Arc<dyn IdentityStrategy>,
    finder: FileFinder,
    filters: Arc<LineFilters>,
    running: Arc<AtomicUsize>,
    handles: Vec<HarvesterHandle>,
    first_scan: bool,
}

impl Input {
    /// Build the input, validating everything that can fail at startup:
    /// configuration cross-checks, glob patterns, regexes, the identity
    /// strategy. Persisted states matching our patterns are reclaimed here.
    pub fn new(
        config: TailerConfig,
        states: Arc<StateRegistry>,
        outlet: Arc<dyn Outlet>,
    ) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let glob_depth = if config.recursive_glob {
            RECURSIVE_GLOB_DEPTH
        } else {
            0
        };
        let finder = FileFinder::new(config.paths.clone(), &config.exclude_files, glob_depth)?;
        let identity = build_strategy(&config)?;
        let filters = Arc::new(LineFilters::compile(
            &config.include_lines,
            &config.exclude_lines,
        )?);

        let input = Self {
            config: Arc::new(config),
            states,
            outlet,
            identity,
            finder,
            filters,
            running: Arc::new(AtomicUsize::new(0)),
            handles: Vec::new(),
            first_scan: true,
        };
        input.reclaim_states();
        Ok(input)
    }

    /// Re-arm TTLs on loaded states that belong to this input's patterns.
    /// States left at the unmanaged sentinel are someone else's (or stale
    /// paths) and are never cleaned by us.
    fn reclaim_states(&self) {
        for mut state in self.states.snapshot() {
            if state.identifier != self.identity.name() {
                continue;
            }
            state.ttl = match self.config.clean_inactive {
                Some(clean_inactive) => Ttl::After(clean_inactive),
                None => Ttl::Never,
            };
            let timestamp = state.timestamp;
            self.states.update_with_timestamp(state, timestamp);
        }
    }

    /// Scan loop. Runs on a dedicated thread; one pass per interval, one
    /// final pass when stop arrives, then all harvesters are stopped
    /// synchronously.
    pub fn run(mut self, stop_rx: Receiver<()>) {
        info!(
            paths = ?self.config.paths,
            frequency = ?self.config.scan_frequency,
            "Input started"
        );

        loop {
            self.scan();
            self.reap_finished();

            match stop_rx.recv_timeout(self.config.scan_frequency) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        // one last pass so freshly rotated files get their bookkeeping
        self.scan();
        self.stop_harvesters();
        info!("Input stopped");
    }

    fn stop_harvesters(&mut self) {
        let count = self.handles.len();
        for handle in self.handles.drain(..) {
            handle.stop();
        }
        debug!(harvesters = count, "All harvesters stopped");
    }

    /// Join harvester threads that already exited, dropping their handles.
    fn reap_finished(&mut self) {
        let mut live = Vec::with_capacity(self.handles.len());
        for handle in self.handles.drain(..) {
            if handle.is_finished() {
                handle.stop();
            } else {
                live.push(handle);
            }
        }
        self.handles = live;
    }

    /// One reconciliation pass.
    fn scan(&mut self) {
        let candidates = self.get_files();
        debug!(files = candidates.len(), "Scan pass");

        for (path, meta) in candidates {
            let ident = FileIdent::from_metadata(&meta);
            let id = self.identity.identify(&path, ident);
            let prior = self.states.find(&id);

            if self.older_than_ignore(&meta) {
                self.handle_ignore_older(prior, path, meta, id, ident);
                continue;
            }

            if prior.is_empty() {
                // first sighting; tail_files applies to the first pass only
                let offset = if self.first_scan && self.config.tail_files {
                    meta.len()
                } else {
                    0
                };
                self.start_harvester(path, id, ident, offset);
            } else {
                self.harvest_existing(prior, path, meta, id, ident);
            }
        }

        if self.config.clean_removed {
            self.retire_removed();
        }

        let (removed, pending) = self.states.cleanup();
        if removed > 0 {
            debug!(removed, pending, "Registry cleanup");
        }

        self.first_scan = false;
    }

    /// Decision arms for a file with prior state.
    fn harvest_existing(
        &mut self,
        prior: State,
        path: PathBuf,
        meta: Metadata,
        id: String,
        ident: FileIdent,
    ) {
        if !prior.finished {
            // a harvester owns this file, nothing to do
            return;
        }

        let size = meta.len();
        if size > prior.offset {
            debug!(
                source = %path.display(),
                offset = prior.offset,
                size,
                "Resuming harvester"
            );
            self.start_harvester(path, id, ident, prior.offset);
        } else if size < prior.offset {
            info!(
                source = %path.display(),
                offset = prior.offset,
                size,
                "File truncated, restarting from the beginning"
            );
            self.start_harvester(path, id, ident, 0);
        } else if prior.source != path {
            // same identity at a new path: rotation; rewrite only
            info!(
                old = %prior.source.display(),
                new = %path.display(),
                "File renamed, updating stored path"
            );
            let mut renamed = prior;
            renamed.source = path;
            self.states.update(renamed);
        }
        // size == offset at the same path: fully read, leave untouched
    }

    /// Files past ignore_older never get a harvester, but the registry is
    /// kept consistent with an offset-at-EOF state so a later resume (after
    /// new writes) starts in the right place.
    fn handle_ignore_older(
        &mut self,
        prior: State,
        path: PathBuf,
        meta: Metadata,
        id: String,
        ident: FileIdent,
    ) {
        if !prior.is_empty() {
            if !prior.finished {
                warn!(
                    source = %path.display(),
                    "File is past ignore_older but its harvester has not finished"
                );
            }
            return;
        }

        // older than clean_inactive already: writing a state now would just
        // be removed again, skip entirely
        if let Some(clean_inactive) = self.config.clean_inactive {
            if self.file_age(&meta) >= clean_inactive {
                return;
            }
        }

        let mut state = State::new(id, path, ident, self.identity.name());
        state.offset = meta.len();
        state.finished = true;
        state.ttl = match self.config.clean_inactive {
            Some(clean_inactive) => Ttl::After(clean_inactive),
            None => Ttl::Never,
        };
        let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());
        self.states.update_with_timestamp(state, modified);
    }

    /// Arm removal TTLs for registered states whose file is gone or whose
    /// on-disk identity no longer matches. Only finished states are armed;
    /// cleanup() enforces that rule anyway, this avoids churning TTLs on
    /// live harvesters.
    fn retire_removed(&self) {
        for mut state in self.states.snapshot() {
            if !state.finished || state.ttl == Ttl::Immediate {
                continue;
            }
            let gone = match FileIdent::from_path(&state.source) {
                Err(_) => true,
                Ok(ident) => ident != state.ident,
            };
            if gone {
                debug!(
                    source = %state.source.display(),
                    id = %state.id,
                    "File removed from disk, retiring its state"
                );
                state.ttl = Ttl::Immediate;
                let timestamp = state.timestamp;
                self.states.update_with_timestamp(state, timestamp);
            }
        }
    }

    fn older_than_ignore(&self, meta: &Metadata) -> bool {
        match self.config.ignore_older {
            Some(ignore_older) => self.file_age(meta) > ignore_older,
            None => false,
        }
    }

    fn file_age(&self, meta: &Metadata) -> std::time::Duration {
        meta.modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or_default()
    }

    /// Candidate files for this pass: glob matches minus directories,
    /// disallowed symlinks, and identities already claimed by an earlier
    /// pattern (first path wins).
    fn get_files(&self) -> Vec<(PathBuf, Metadata)> {
        let mut claimed: HashSet<FileIdent> = HashSet::new();
        let mut files = Vec::new();

        for path in self.finder.find_files() {
            let lstat = match std::fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Stat failed, skipping this pass");
                    continue;
                }
            };

            if lstat.is_dir() {
                continue;
            }

            let meta = if lstat.file_type().is_symlink() {
                if !self.config.symlinks {
                    debug!(path = %path.display(), "Skipping symlink");
                    continue;
                }
                match std::fs::metadata(&path) {
                    Ok(meta) => meta,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "Broken symlink, skipping");
                        continue;
                    }
                }
            } else {
                lstat
            };

            if !meta.is_file() {
                continue;
            }

            let ident = FileIdent::from_metadata(&meta);
            if !claimed.insert(ident) {
                debug!(
                    path = %path.display(),
                    "Same file already claimed this pass, skipping"
                );
                continue;
            }

            files.push((path, meta));
        }

        self.sort_files(&mut files);
        files
    }

    fn sort_files(&self, files: &mut [(PathBuf, Metadata)]) {
        match self.config.scan_sort {
            ScanSort::None => return,
            ScanSort::Filename => files.sort_by(|a, b| a.0.cmp(&b.0)),
            ScanSort::Modtime => files.sort_by_key(|(_, meta)| {
                meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)
            }),
        }
        if self.config.scan_order == ScanOrder::Desc {
            files.reverse();
        }
    }

    /// Claim the state and spawn a harvester thread, subject to the
    /// harvester ceiling. The counter is incremented optimistically before
    /// the spawn and rolled back on refusal or failure; the thread itself
    /// decrements it on exit.
    fn start_harvester(&mut self, path: PathBuf, id: String, ident: FileIdent, offset: u64) {
        let limit = self.config.harvester_limit;
        let prev = self.running.fetch_add(1, Ordering::SeqCst);
        if limit > 0 && prev >= limit {
            self.running.fetch_sub(1, Ordering::SeqCst);
            debug!(
                source = %path.display(),
                limit,
                "Harvester limit reached, retrying next scan"
            );
            return;
        }

        let mut state = State::new(id, path, ident, self.identity.name());
        state.offset = offset;
        state.finished = false;
        state.ttl = match self.config.clean_inactive {
            Some(clean_inactive) => Ttl::After(clean_inactive),
            None => Ttl::Never,
        };

        // claim before the thread exists so no second scan can start a
        // harvester for the same id
        self.states.update(state.clone());

        let harvester = Harvester::new(
            self.config.clone(),
            state.clone(),
            self.states.clone(),
            self.outlet.clone(),
            self.filters.clone(),
        );
        match harvester.spawn(self.running.clone()) {
            Ok(handle) => self.handles.push(handle),
            Err(e) => {
                error!(source = %state.source.display(), error = %e, "Failed to start harvester");
                state.finished = true;
                self.states.update(state);
                self.running.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::{bounded, BoundedReceiver};
    use crate::output::{ChannelOutlet, Event};
    use std::fs;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> TailerConfig {
        TailerConfig {
            paths: vec![format!("{}/*.log", dir.path().display())],
            scan_frequency: Duration::from_millis(50),
            backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            close_eof: true,
            ..Default::default()
        }
    }

    fn new_input(
        config: TailerConfig,
        states: Arc<StateRegistry>,
    ) -> (Input, BoundedReceiver<Event>) {
        let (tx, rx) = bounded(256);
        let input = Input::new(config, states, Arc::new(ChannelOutlet::new(tx))).unwrap();
        (input, rx)
    }

    fn drain_messages(rx: &BoundedReceiver<Event>, wait: Duration) -> Vec<String> {
        let deadline = std::time::Instant::now() + wait;
        let mut lines = Vec::new();
        while std::time::Instant::now() < deadline {
            if let Some(event) = rx.recv_timeout(Duration::from_millis(20)) {
                if let Some(message) = event.message {
                    lines.push(message);
                }
            }
        }
        lines
    }

    #[test]
    fn rejects_invalid_config() {
        let states = Arc::new(StateRegistry::new());
        let (tx, _rx) = bounded(4);
        let result = Input::new(
            TailerConfig::default(),
            states,
            Arc::new(ChannelOutlet::new(tx)),
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_bad_exclude_regex() {
        let states = Arc::new(StateRegistry::new());
        let (tx, _rx) = bounded(4);
        let config = TailerConfig {
            paths: vec!["/tmp/*.log".to_string()],
            exclude_files: vec!["(".to_string()],
            ..Default::default()
        };
        assert!(Input::new(config, states, Arc::new(ChannelOutlet::new(tx))).is_err());
    }

    #[test]
    fn scan_starts_harvesters_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.log"), "line a\n").unwrap();
        fs::write(dir.path().join("b.log"), "line b\n").unwrap();

        let states = Arc::new(StateRegistry::new());
        let (mut input, rx) = new_input(test_config(&dir), states.clone());

        input.scan();
        let mut lines = drain_messages(&rx, Duration::from_millis(300));
        lines.sort();
        assert_eq!(lines, vec!["line a", "line b"]);
        assert_eq!(states.count(), 2);

        // unchanged filesystem: second scan starts nothing new
        input.scan();
        let lines = drain_messages(&rx, Duration::from_millis(200));
        assert!(lines.is_empty(), "unexpected re-reads: {:?}", lines);

        input.stop_harvesters();
    }

    #[test]
    fn appended_bytes_resume_from_prior_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "first\n").unwrap();

        let states = Arc::new(StateRegistry::new());
        let (mut input, rx) = new_input(test_config(&dir), states.clone());

        input.scan();
        assert_eq!(
            drain_messages(&rx, Duration::from_millis(300)),
            vec!["first"]
        );

        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        use std::io::Write;
        f.write_all(b"second\n").unwrap();
        drop(f);

        input.scan();
        assert_eq!(
            drain_messages(&rx, Duration::from_millis(300)),
            vec!["second"]
        );
        input.stop_harvesters();
    }

    #[test]
    fn truncated_file_restarts_at_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "a much longer original line\n").unwrap();

        let states = Arc::new(StateRegistry::new());
        let (mut input, rx) = new_input(test_config(&dir), states.clone());

        input.scan();
        drain_messages(&rx, Duration::from_millis(300));

        fs::write(&path, "short\n").unwrap();
        input.scan();
        assert_eq!(
            drain_messages(&rx, Duration::from_millis(300)),
            vec!["short"]
        );

        input.stop_harvesters();
    }

    #[test]
    fn renamed_file_updates_path_without_rereading() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.paths = vec![format!("{}/*", dir.path().display())];
        let path = dir.path().join("a.log");
        fs::write(&path, "content line\n").unwrap();

        let states = Arc::new(StateRegistry::new());
        let (mut input, rx) = new_input(config, states.clone());

        input.scan();
        drain_messages(&rx, Duration::from_millis(300));
        input.reap_finished();

        let rotated = dir.path().join("a.log.rotated");
        fs::rename(&path, &rotated).unwrap();

        input.scan();
        let lines = drain_messages(&rx, Duration::from_millis(200));
        assert!(lines.is_empty(), "rename must not re-read: {:?}", lines);

        let snapshot = states.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].source, rotated);

        input.stop_harvesters();
    }

    #[test]
    fn harvester_limit_defers_starts() {
        let dir = TempDir::new().unwrap();
        for i in 0..4 {
            fs::write(dir.path().join(format!("{i}.log")), format!("line {i}\n")).unwrap();
        }

        let mut config = test_config(&dir);
        config.harvester_limit = 2;
        let states = Arc::new(StateRegistry::new());
        let (mut input, rx) = new_input(config, states.clone());

        input.scan();
        // only two staged this pass
        assert!(input.running.load(Ordering::SeqCst) <= 2);

        // remaining files are picked up by later passes
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut lines = Vec::new();
        while lines.len() < 4 && std::time::Instant::now() < deadline {
            lines.extend(drain_messages(&rx, Duration::from_millis(100)));
            input.reap_finished();
            input.scan();
        }
        lines.sort();
        lines.dedup();
        assert_eq!(lines.len(), 4);

        input.stop_harvesters();
    }

    #[test]
    fn ignore_older_writes_eof_state_without_harvesting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.log");
        fs::write(&path, "ancient line\n").unwrap();

        let mut config = test_config(&dir);
        config.ignore_older = Some(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));

        let states = Arc::new(StateRegistry::new());
        let (mut input, rx) = new_input(config, states.clone());

        input.scan();
        let lines = drain_messages(&rx, Duration::from_millis(200));
        assert!(lines.is_empty());

        let snapshot = states.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].finished);
        assert_eq!(snapshot[0].offset, 13);

        input.stop_harvesters();
    }

    #[test]
    fn clean_removed_retires_states_of_deleted_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "line\n").unwrap();

        let states = Arc::new(StateRegistry::new());
        let (mut input, rx) = new_input(test_config(&dir), states.clone());

        input.scan();
        drain_messages(&rx, Duration::from_millis(300));
        input.reap_finished();
        assert_eq!(states.count(), 1);

        fs::remove_file(&path).unwrap();
        input.scan();
        assert_eq!(states.count(), 0);

        input.stop_harvesters();
    }

    #[test]
    fn tail_files_starts_at_eof_on_first_scan_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "history\n").unwrap();

        let mut config = test_config(&dir);
        config.tail_files = true;
        let states = Arc::new(StateRegistry::new());
        let (mut input, rx) = new_input(config, states.clone());

        input.scan();
        let lines = drain_messages(&rx, Duration::from_millis(200));
        assert!(lines.is_empty(), "tail_files must skip history: {:?}", lines);

        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        use std::io::Write;
        f.write_all(b"fresh\n").unwrap();
        drop(f);

        input.scan();
        assert_eq!(
            drain_messages(&rx, Duration::from_millis(300)),
            vec!["fresh"]
        );

        input.stop_harvesters();
    }

    #[test]
    fn symlinks_skipped_unless_enabled() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("real.txt");
        fs::write(&target, "via symlink\n").unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("a.log")).unwrap();

        let states = Arc::new(StateRegistry::new());
        let (mut input, rx) = new_input(test_config(&dir), states.clone());
        input.scan();
        assert!(drain_messages(&rx, Duration::from_millis(200)).is_empty());
        input.stop_harvesters();

        let mut config = test_config(&dir);
        config.symlinks = true;
        let states = Arc::new(StateRegistry::new());
        let (mut input, rx) = new_input(config, states.clone());
        input.scan();
        assert_eq!(
            drain_messages(&rx, Duration::from_millis(300)),
            vec!["via symlink"]
        );
        input.stop_harvesters();
    }

    #[test]
    fn symlink_to_claimed_file_is_deduped() {
        let dir = TempDir::new().unwrap();
        let real = dir.path().join("a.log");
        fs::write(&real, "once only\n").unwrap();
        std::os::unix::fs::symlink(&real, dir.path().join("b.log")).unwrap();

        let mut config = test_config(&dir);
        config.symlinks = true;
        let states = Arc::new(StateRegistry::new());
        let (mut input, rx) = new_input(config, states.clone());

        input.scan();
        assert_eq!(
            drain_messages(&rx, Duration::from_millis(300)),
            vec!["once only"]
        );
        assert_eq!(states.count(), 1);
        input.stop_harvesters();
    }

    #[test]
    fn run_loop_stops_on_signal() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.log"), "line\n").unwrap();

        let states = Arc::new(StateRegistry::new());
        let (input, rx) = new_input(test_config(&dir), states.clone());

        let (stop_tx, stop_rx) = mpsc::channel();
        let join = std::thread::spawn(move || input.run(stop_rx));

        assert_eq!(
            drain_messages(&rx, Duration::from_millis(400)),
            vec!["line"]
        );

        stop_tx.send(()).unwrap();
        join.join().unwrap();
        assert!(states.snapshot().iter().all(|s| s.finished));
    }
}
