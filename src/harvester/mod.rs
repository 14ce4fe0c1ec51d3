// SPDX-License-Identifier: Apache-2.0

//! One harvester per open file. A harvester owns its file descriptor, its
//! reader pipeline and a private copy of its state; the registry only ever
//! sees published snapshots, so a crash mid-read recovers at the last
//! published offset, never a half-read one.

pub mod source;
pub mod tail;

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

use regex::bytes::Regex;
use tracing::{debug, error, info, warn};

use crate::config::TailerConfig;
use crate::error::{Error, Result};
use crate::harvester::source::Source;
use crate::harvester::tail::{TailPolicy, TailReader};
use crate::input::identity::FileIdent;
use crate::output::{Event, Outlet};
use crate::reader::docker::DockerJsonReader;
use crate::reader::json::JsonReader;
use crate::reader::limit::LimitReader;
use crate::reader::line::LineReader;
use crate::reader::multiline::MultilineReader;
use crate::reader::strip::StripNewline;
use crate::reader::{ReadError, Reader};
use crate::registry::{State, StateRegistry, Ttl};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Compiled include/exclude line filters. Include wins first: a non-empty
/// include list drops everything it does not match, then excludes are
/// applied.
pub struct LineFilters {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl LineFilters {
    pub fn compile(include: &[String], exclude: &[String]) -> Result<Self> {
        let compile = |sources: &[String]| -> Result<Vec<Regex>> {
            sources
                .iter()
                .map(|s| Regex::new(s).map_err(|e| Error::Regex(e.to_string())))
                .collect()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    pub fn should_export(&self, line: &[u8]) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(line)) {
            return false;
        }
        !self.exclude.iter().any(|re| re.is_match(line))
    }
}

/// Decrements the running-harvester count when the thread exits, on every
/// path including panics.
struct CounterGuard(Arc<AtomicUsize>);

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle owned by the scanner. Stopping is synchronous: it returns only
/// once the harvester thread has exited and published its final state.
pub struct HarvesterHandle {
    stop_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl HarvesterHandle {
    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.join.join();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Compose the reader pipeline over a byte source. Order is fixed: framing
/// and decode, container unwrap, JSON, newline strip, multiline, size cap.
pub fn build_pipeline(source: Box<dyn Source>, config: &TailerConfig) -> Result<Box<dyn Reader>> {
    let mut reader: Box<dyn Reader> = Box::new(LineReader::new(
        source,
        config.encoding,
        config.buffer_size,
        config.max_bytes,
    ));

    if let Some(docker) = &config.docker_json {
        reader = Box::new(DockerJsonReader::new(reader, docker.stream.clone()));
    }
    if let Some(json) = &config.json {
        reader = Box::new(JsonReader::new(reader, json.clone()));
    }
    reader = Box::new(StripNewline::new(reader));
    if let Some(multiline) = &config.multiline {
        reader = Box::new(MultilineReader::new(reader, multiline, config.max_bytes)?);
    }
    reader = Box::new(LimitReader::new(reader, config.max_bytes));

    Ok(reader)
}

pub struct Harvester {
    config: Arc<TailerConfig>,
    state: State,
    states: Arc<StateRegistry>,
    outlet: Arc<dyn Outlet>,
    filters: Arc<LineFilters>,
}

impl Harvester {
    pub fn new(
        config: Arc<TailerConfig>,
        state: State,
        states: Arc<StateRegistry>,
        outlet: Arc<dyn Outlet>,
        filters: Arc<LineFilters>,
    ) -> Self {
        Self {
            config,
            state,
            states,
            outlet,
            filters,
        }
    }

    /// Spawn the harvester on its own thread. The running counter must have
    /// been incremented by the caller (admission control); the thread
    /// decrements it on exit.
    pub fn spawn(self, running: Arc<AtomicUsize>) -> Result<HarvesterHandle> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let name = format!("harvest-{}", self.state.ident);
        let join = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                let _guard = CounterGuard(running);
                self.run(stop_rx);
            })
            .map_err(|e| Error::Harvester(format!("failed to spawn harvester thread: {}", e)))?;

        Ok(HarvesterHandle { stop_tx, join })
    }

    /// Open and validate the file, seek to the starting offset. The identity
    /// is re-checked against the one captured at scan time; a mismatch means
    /// the path was swapped underneath us and this harvester must not start.
    fn open(&mut self, stop_rx: Receiver<()>) -> Result<TailReader> {
        let mut file = OpenOptions::new().read(true).open(&self.state.source)?;
        let meta = file.metadata()?;

        if !meta.is_file() {
            return Err(Error::Harvester(format!(
                "{} is not a regular file",
                self.state.source.display()
            )));
        }

        let ident = FileIdent::from_metadata(&meta);
        if ident != self.state.ident {
            return Err(Error::Harvester(format!(
                "{} changed identity between scan and open (was {}, found {})",
                self.state.source.display(),
                self.state.ident,
                ident
            )));
        }

        if self.state.offset > meta.len() {
            warn!(
                source = %self.state.source.display(),
                offset = self.state.offset,
                size = meta.len(),
                "File shrank before open, restarting from the beginning"
            );
            self.state.offset = 0;
        }
        file.seek(SeekFrom::Start(self.state.offset))?;

        Ok(TailReader::new(
            file,
            self.state.source.clone(),
            ident,
            self.state.offset,
            TailPolicy::from(self.config.as_ref()),
            stop_rx,
        ))
    }

    fn run(mut self, stop_rx: Receiver<()>) {
        let source = match self.open(stop_rx) {
            Ok(source) => source,
            Err(e) => {
                error!(
                    source = %self.state.source.display(),
                    error = %e,
                    "Harvester could not open file"
                );
                self.finalize(true);
                return;
            }
        };

        info!(
            source = %self.state.source.display(),
            offset = self.state.offset,
            "Harvester started"
        );
        self.run_with_source(Box::new(source));
    }

    /// The per-message loop, shared between file and pipe harvesters. The
    /// source's capabilities are read once here: offsets are published only
    /// for sources with state, and end-of-input is reported differently for
    /// sources that cannot grow.
    pub fn run_with_source(mut self, source: Box<dyn Source>) {
        let source_name = source.name();
        let stateful = source.has_state();
        let continuable = source.continuable();
        let mut pipeline = match build_pipeline(source, &self.config) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!(source = %source_name, error = %e, "Failed to build reader pipeline");
                self.finalize(stateful);
                return;
            }
        };

        let mut at_start = self.state.offset == 0;
        loop {
            let mut msg = match pipeline.next() {
                Ok(msg) => msg,
                Err(ReadError::Timeout) => continue,
                Err(e) => {
                    self.handle_close(&e, &source_name, continuable);
                    break;
                }
            };

            if at_start {
                if msg.content.starts_with(UTF8_BOM) {
                    msg.content.drain(..UTF8_BOM.len());
                }
                at_start = false;
            }

            // The offset advances exactly once per consumed message, whether
            // or not the line survives filtering; otherwise replays after a
            // restart would duplicate or skip lines.
            let mut next_state = self.state.clone();
            next_state.offset += msg.bytes as u64;

            let message = if !msg.is_empty() && self.filters.should_export(&msg.content) {
                Some(String::from_utf8_lossy(&msg.content).into_owned())
            } else {
                None
            };

            let event = Event {
                timestamp: msg.timestamp,
                message,
                fields: msg.fields.take(),
                state: next_state.clone(),
            };

            if !self.outlet.on_event(event) {
                debug!(source = %source_name, "Outlet closed, stopping harvester");
                break;
            }

            if stateful {
                self.states.update(next_state.clone());
            }
            self.state = next_state;
        }

        self.finalize(stateful);
    }

    fn handle_close(&mut self, e: &ReadError, source_name: &str, continuable: bool) {
        match e {
            ReadError::Truncated => {
                info!(source = %source_name, "File was truncated, next scan restarts at zero");
                self.state.offset = 0;
            }
            ReadError::Eof if continuable => {
                debug!(source = %source_name, "Closing on end of file")
            }
            ReadError::Eof => debug!(source = %source_name, "Input exhausted"),
            ReadError::Inactive => {
                debug!(source = %source_name, "Closing inactive file")
            }
            ReadError::Removed => debug!(source = %source_name, "Closing removed file"),
            ReadError::Renamed => debug!(source = %source_name, "Closing renamed file"),
            ReadError::Deadline => {
                info!(source = %source_name, "Harvester lifetime cap reached")
            }
            ReadError::Stopped => debug!(source = %source_name, "Harvester stop requested"),
            ReadError::Timeout => {}
            ReadError::Io(err) => {
                error!(source = %source_name, error = %err, "Read failed, closing file")
            }
        }
    }

    /// Terminal path, runs exactly once per harvester: release the state and
    /// let downstream know this file has no owner anymore.
    fn finalize(&mut self, stateful: bool) {
        self.state.finished = true;
        if let Some(clean_inactive) = self.config.clean_inactive {
            if self.state.ttl == Ttl::Never {
                self.state.ttl = Ttl::After(clean_inactive);
            }
        }

        if stateful {
            self.states.update(self.state.clone());
            let _ = self.outlet.on_event(Event::state_only(self.state.clone()));
        }

        info!(
            source = %self.state.source.display(),
            offset = self.state.offset,
            "Harvester stopped"
        );
    }
}
