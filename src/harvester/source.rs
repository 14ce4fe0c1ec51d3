// SPDX-License-Identifier: Apache-2.0

use std::io::Read;

use crate::reader::{ByteSource, ReadError};

/// A byte producer a harvester can own: a tailed file or a pipe.
pub trait Source: ByteSource {
    /// Human-readable name, used in logs and events.
    fn name(&self) -> String;

    /// Whether reading can continue past end-of-input (files grow, pipes
    /// do not).
    fn continuable(&self) -> bool;

    /// Whether offsets for this source are worth persisting.
    fn has_state(&self) -> bool;
}

impl ByteSource for Box<dyn Source> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReadError> {
        (**self).read(buf)
    }
}

/// Standard input. No backoff, no state; end of the pipe ends the
/// harvester.
pub struct PipeSource {
    stdin: std::io::Stdin,
}

impl PipeSource {
    pub fn stdin() -> Self {
        Self {
            stdin: std::io::stdin(),
        }
    }
}

impl ByteSource for PipeSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReadError> {
        match self.stdin.read(buf) {
            Ok(0) => Err(ReadError::Eof),
            Ok(n) => Ok(n),
            Err(e) => Err(e.into()),
        }
    }
}

impl Source for PipeSource {
    fn name(&self) -> String {
        "-".to_string()
    }

    fn continuable(&self) -> bool {
        false
    }

    fn has_state(&self) -> bool {
        false
    }
}
