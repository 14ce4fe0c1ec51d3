// SPDX-License-Identifier: Apache-2.0

//! The tailing byte source: owns the open file, polls for growth with an
//! exponential backoff, and turns the close_* policies into read signals.

use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

use crate::config::TailerConfig;
use crate::harvester::source::Source;
use crate::input::identity::{self, FileIdent};
use crate::reader::{ByteSource, ReadError};

/// Close and backoff policy, carved out of the input configuration.
#[derive(Debug, Clone)]
pub struct TailPolicy {
    pub close_inactive: Duration,
    pub close_eof: bool,
    pub close_removed: bool,
    pub close_renamed: bool,
    pub close_timeout: Option<Duration>,
    pub backoff: Duration,
    pub backoff_factor: u32,
    pub max_backoff: Duration,
    /// Quiet-period tick for multiline flushing
    pub flush_timeout: Option<Duration>,
}

impl From<&TailerConfig> for TailPolicy {
    fn from(config: &TailerConfig) -> Self {
        Self {
            close_inactive: config.close_inactive,
            close_eof: config.close_eof,
            close_removed: config.close_removed,
            close_renamed: config.close_renamed,
            close_timeout: config.close_timeout,
            backoff: config.backoff,
            backoff_factor: config.backoff_factor,
            max_backoff: config.max_backoff,
            flush_timeout: config.multiline.as_ref().map(|ml| ml.timeout),
        }
    }
}

/// Next step on the backoff curve: multiply, clamp at the ceiling.
pub fn next_backoff(current: Duration, factor: u32, max: Duration) -> Duration {
    current.saturating_mul(factor).min(max)
}

pub struct TailReader {
    file: File,
    path: PathBuf,
    ident: FileIdent,
    offset: u64,
    policy: TailPolicy,
    last_read: Instant,
    current_backoff: Duration,
    /// Accumulated wait since the last byte arrived
    quiet: Duration,
    deadline: Option<Instant>,
    stop_rx: Receiver<()>,
}

impl TailReader {
    pub fn new(
        file: File,
        path: PathBuf,
        ident: FileIdent,
        offset: u64,
        policy: TailPolicy,
        stop_rx: Receiver<()>,
    ) -> Self {
        let deadline = policy.close_timeout.map(|cap| Instant::now() + cap);
        let current_backoff = policy.backoff;
        Self {
            file,
            path,
            ident,
            offset,
            policy,
            last_read: Instant::now(),
            current_backoff,
            quiet: Duration::ZERO,
            deadline,
            stop_rx,
        }
    }

    /// Decide what to do at end-of-file: close, report truncation, or sleep
    /// one backoff step. Returns Ok(()) when the caller should retry the
    /// read immediately.
    fn wait_for_data(&mut self) -> Result<(), ReadError> {
        if self.policy.close_eof {
            return Err(ReadError::Eof);
        }

        let meta = self.file.metadata()?;
        if meta.len() < self.offset {
            return Err(ReadError::Truncated);
        }
        if meta.len() > self.offset {
            // grew between the read and the stat
            return Ok(());
        }

        if self.last_read.elapsed() >= self.policy.close_inactive {
            return Err(ReadError::Inactive);
        }

        self.check_moved()?;

        let mut wait = self.current_backoff;
        if let Some(deadline) = self.deadline {
            wait = wait.min(deadline.saturating_duration_since(Instant::now()));
        }
        if !wait.is_zero() {
            match self.stop_rx.recv_timeout(wait) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return Err(ReadError::Stopped),
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        self.quiet += wait;
        self.current_backoff = next_backoff(
            self.current_backoff,
            self.policy.backoff_factor,
            self.policy.max_backoff,
        );

        if let Some(flush) = self.policy.flush_timeout {
            if self.quiet >= flush {
                self.quiet = Duration::ZERO;
                return Err(ReadError::Timeout);
            }
        }

        Ok(())
    }

    /// Removal/rename detection. Only stats when one of the close options
    /// asks for it, to keep the idle path cheap.
    fn check_moved(&self) -> Result<(), ReadError> {
        if !self.policy.close_removed && !self.policy.close_renamed {
            return Ok(());
        }

        match fs::metadata(&self.path) {
            Err(_) => {
                // nothing at the old path anymore: the fd keeps working
                // after a rename and its kernel-side path moves with it,
                // which tells a rename apart from a delete
                if self.policy.close_renamed {
                    if let Ok(current) = identity::get_path_from_file(&self.file) {
                        if current != self.path {
                            return Err(ReadError::Renamed);
                        }
                    }
                }
                if self.policy.close_removed {
                    return Err(ReadError::Removed);
                }
            }
            Ok(meta) => {
                if self.policy.close_renamed && FileIdent::from_metadata(&meta) != self.ident {
                    return Err(ReadError::Renamed);
                }
            }
        }
        Ok(())
    }
}

impl ByteSource for TailReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReadError> {
        loop {
            match self.stop_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return Err(ReadError::Stopped),
                Err(TryRecvError::Empty) => {}
            }

            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    return Err(ReadError::Deadline);
                }
            }

            match self.file.read(buf) {
                Ok(0) => self.wait_for_data()?,
                Ok(n) => {
                    self.offset += n as u64;
                    self.last_read = Instant::now();
                    self.current_backoff = self.policy.backoff;
                    self.quiet = Duration::ZERO;
                    return Ok(n);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Source for TailReader {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn continuable(&self) -> bool {
        true
    }

    fn has_state(&self) -> bool {
        true
    }
}
