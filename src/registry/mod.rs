// SPDX-License-Identifier: Apache-2.0

//! In-memory registry of per-file states, shared between the scanner,
//! the harvesters and the registrar.

pub mod registrar;
pub mod state;

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::SystemTime;

use tracing::warn;

pub use state::{State, Ttl};

/// Concurrency-safe store of [`State`] records keyed by identity.
///
/// Reads hand out clones; holders never observe later mutations. Backed by
/// a vector plus an id index so cleanup can swap-remove without reshuffling
/// the whole map.
#[derive(Debug, Default)]
pub struct StateRegistry {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    states: Vec<State>,
    index: HashMap<String, usize>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the state for its identity, stamping it with the
    /// current time.
    pub fn update(&self, state: State) {
        self.update_with_timestamp(state, SystemTime::now());
    }

    /// Insert or overwrite the state, with an explicit timestamp. Used when
    /// the activity time must reflect the file's mtime rather than "now".
    pub fn update_with_timestamp(&self, mut state: State, timestamp: SystemTime) {
        state.timestamp = timestamp;

        let mut inner = self.inner.write().unwrap();
        match inner.index.get(&state.id) {
            Some(&i) => inner.states[i] = state,
            None => {
                let i = inner.states.len();
                inner.index.insert(state.id.clone(), i);
                inner.states.push(state);
            }
        }
    }

    /// Look up a state by identity. Returns the empty sentinel when absent.
    pub fn find(&self, id: &str) -> State {
        let inner = self.inner.read().unwrap();
        match inner.index.get(id) {
            Some(&i) => inner.states[i].clone(),
            None => State::empty(),
        }
    }

    /// Copy of every state, for scans and registry flushes.
    pub fn snapshot(&self) -> Vec<State> {
        self.inner.read().unwrap().states.clone()
    }

    /// Replace the whole registry, used when loading persisted states at
    /// startup.
    pub fn replace_all(&self, states: Vec<State>) {
        let mut inner = self.inner.write().unwrap();
        inner.index.clear();
        inner.index.reserve(states.len());
        for (i, state) in states.iter().enumerate() {
            inner.index.insert(state.id.clone(), i);
        }
        inner.states = states;
    }

    pub fn count(&self) -> usize {
        self.inner.read().unwrap().states.len()
    }

    /// Evict expired states. Returns (removed, pending), where pending counts
    /// states with a finite TTL that are not yet removable. A state still
    /// owned by a harvester (finished == false) is never removed, no matter
    /// how stale its TTL says it is.
    pub fn cleanup(&self) -> (usize, usize) {
        let now = SystemTime::now();
        let mut removed = 0;
        let mut pending = 0;

        let mut inner = self.inner.write().unwrap();
        let mut i = 0;
        while i < inner.states.len() {
            let state = &inner.states[i];
            if state.is_expired(now) {
                if !state.finished {
                    warn!(
                        id = %state.id,
                        source = %state.source.display(),
                        "State expired before the harvester finished; keeping it"
                    );
                    pending += 1;
                    i += 1;
                    continue;
                }

                let old = inner.states.swap_remove(i);
                inner.index.remove(&old.id);
                // swap_remove moved the tail entry into slot i
                if i < inner.states.len() {
                    let moved_id = inner.states[i].id.clone();
                    inner.index.insert(moved_id, i);
                }
                removed += 1;
            } else {
                if matches!(state.ttl, Ttl::After(_)) {
                    pending += 1;
                }
                i += 1;
            }
        }

        (removed, pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::identity::FileIdent;
    use std::path::PathBuf;
    use std::time::Duration;

    fn state(id: &str, path: &str) -> State {
        State::new(
            id.to_string(),
            PathBuf::from(path),
            FileIdent::default(),
            "native",
        )
    }

    #[test]
    fn update_is_idempotent_per_id() {
        let registry = StateRegistry::new();

        let mut s = state("a", "/tmp/a.log");
        s.offset = 10;
        registry.update(s.clone());
        s.offset = 20;
        registry.update(s);

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.find("a").offset, 20);
    }

    #[test]
    fn find_missing_returns_empty() {
        let registry = StateRegistry::new();
        assert!(registry.find("nope").is_empty());
    }

    #[test]
    fn cleanup_removes_only_finished_expired() {
        let registry = StateRegistry::new();

        let mut expired_done = state("done", "/tmp/done.log");
        expired_done.finished = true;
        expired_done.ttl = Ttl::Immediate;
        registry.update(expired_done);

        let mut expired_busy = state("busy", "/tmp/busy.log");
        expired_busy.finished = false;
        expired_busy.ttl = Ttl::Immediate;
        registry.update(expired_busy);

        let mut waiting = state("waiting", "/tmp/waiting.log");
        waiting.finished = true;
        waiting.ttl = Ttl::After(Duration::from_secs(3600));
        registry.update(waiting);

        let (removed, pending) = registry.cleanup();
        assert_eq!(removed, 1);
        assert_eq!(pending, 2);

        assert!(registry.find("done").is_empty());
        assert!(!registry.find("busy").is_empty());
        assert!(!registry.find("waiting").is_empty());

        // the swap-removed slot must still be findable through the index
        assert_eq!(registry.find("waiting").id, "waiting");
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn cleanup_repairs_index_after_swap_remove() {
        let registry = StateRegistry::new();

        for i in 0..5 {
            let mut s = state(&format!("id-{i}"), &format!("/tmp/{i}.log"));
            s.finished = true;
            s.offset = i as u64;
            if i % 2 == 0 {
                s.ttl = Ttl::Immediate;
            }
            registry.update(s);
        }

        let (removed, _) = registry.cleanup();
        assert_eq!(removed, 3);
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.find("id-1").offset, 1);
        assert_eq!(registry.find("id-3").offset, 3);
    }

    #[test]
    fn replace_all_rebuilds_index() {
        let registry = StateRegistry::new();
        registry.update(state("old", "/tmp/old.log"));

        registry.replace_all(vec![state("a", "/a"), state("b", "/b")]);
        assert_eq!(registry.count(), 2);
        assert!(registry.find("old").is_empty());
        assert_eq!(registry.find("b").id, "b");
    }

    #[test]
    fn update_with_timestamp_preserves_explicit_time() {
        let registry = StateRegistry::new();
        let ts = SystemTime::now() - Duration::from_secs(500);
        registry.update_with_timestamp(state("a", "/a"), ts);
        assert_eq!(registry.find("a").timestamp, ts);
    }
}
