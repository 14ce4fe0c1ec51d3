// SPDX-License-Identifier: Apache-2.0

//! Composed reader pipeline turning raw file bytes into framed messages.
//!
//! Stages wrap each other and pull lazily: line framing (with character
//! decode) → optional Docker JSON unwrap → optional JSON decode → newline
//! strip → optional multiline aggregation → size limit. Every message
//! carries the exact number of underlying bytes consumed to produce it;
//! that count is what drives offset accounting, so it includes stripped
//! delimiters and bytes dropped by truncation.

pub mod docker;
pub mod json;
pub mod limit;
pub mod line;
pub mod multiline;
pub mod strip;

use serde_json::{Map, Value};
use std::time::SystemTime;
use thiserror::Error;

/// Signals surfaced by the byte source or a pipeline stage. Everything here
/// is an orderly end-of-stream condition for the harvester, not a crash.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("end of file reached")]
    Eof,

    #[error("file was truncated")]
    Truncated,

    #[error("file was removed")]
    Removed,

    #[error("file was renamed")]
    Renamed,

    #[error("file was inactive too long")]
    Inactive,

    #[error("harvester lifetime cap reached")]
    Deadline,

    #[error("quiet period elapsed")]
    Timeout,

    #[error("stop requested")]
    Stopped,

    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}

/// One framed message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Decoded payload, delimiters stripped by the pipeline
    pub content: Vec<u8>,
    /// Underlying bytes consumed to produce this message
    pub bytes: usize,
    /// Structured fields attached by decoding stages
    pub fields: Option<Map<String, Value>>,
    /// When the message was read
    pub timestamp: SystemTime,
}

impl Message {
    pub fn new(content: Vec<u8>, bytes: usize) -> Self {
        Self {
            content,
            bytes,
            fields: None,
            timestamp: SystemTime::now(),
        }
    }

    /// True when there is no payload to ship. The consumed byte count still
    /// matters: offsets advance for empty messages too.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn add_field(&mut self, key: &str, value: Value) {
        self.fields
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value);
    }
}

/// A pull-based stage producing one message per call.
pub trait Reader: Send {
    fn next(&mut self) -> Result<Message, ReadError>;
}

/// Raw byte producer underneath the pipeline. Blocking; returns only when
/// bytes are available or a terminal/tick signal fires.
pub trait ByteSource: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReadError>;
}

impl ByteSource for Box<dyn ByteSource> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReadError> {
        (**self).read(buf)
    }
}
