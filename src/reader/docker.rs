// SPDX-License-Identifier: Apache-2.0

//! Docker json-file log driver unwrap.
//!
//! Each line looks like `{"log":"...","stream":"stdout","time":"..."}`.
//! The payload becomes the message content; the stream name is kept as a
//! field. Lines from a filtered-out stream are emitted empty so their bytes
//! still advance the offset.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::reader::{Message, ReadError, Reader};

#[derive(Deserialize)]
struct DockerLine {
    log: String,
    stream: String,
    time: Option<String>,
}

pub struct DockerJsonReader {
    inner: Box<dyn Reader>,
    /// "all", "stdout" or "stderr"
    stream: String,
}

impl DockerJsonReader {
    pub fn new(inner: Box<dyn Reader>, stream: String) -> Self {
        Self { inner, stream }
    }
}

impl Reader for DockerJsonReader {
    fn next(&mut self) -> Result<Message, ReadError> {
        let mut msg = self.inner.next()?;

        let parsed: DockerLine = match serde_json::from_slice(&msg.content) {
            Ok(parsed) => parsed,
            Err(e) => {
                // not a json-file line, pass it through untouched
                debug!(error = %e, "Line is not docker json, keeping raw content");
                return Ok(msg);
            }
        };

        if self.stream != "all" && parsed.stream != self.stream {
            msg.content.clear();
            return Ok(msg);
        }

        msg.content = parsed.log.into_bytes();
        msg.add_field("stream", Value::String(parsed.stream));
        if let Some(time) = parsed.time {
            msg.add_field("time", Value::String(time));
        }
        Ok(msg)
    }
}
