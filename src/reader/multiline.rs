// SPDX-License-Identifier: Apache-2.0

//! Pattern-based multiline aggregation.
//!
//! In after-mode a non-matching line anchors a new event and matching lines
//! attach to it; in before-mode matching lines accumulate until a
//! non-matching anchor arrives and closes the event. Aggregates are also
//! flushed by max_lines/max_bytes caps and by the quiet-period tick the
//! byte source raises when nothing arrives for the configured timeout.

use regex::bytes::Regex;

use crate::config::MultilineConfig;
use crate::error::Error;
use crate::reader::{Message, ReadError, Reader};

struct Aggregate {
    message: Message,
    lines: usize,
}

impl Aggregate {
    fn start(msg: Message) -> Self {
        Self {
            message: msg,
            lines: 1,
        }
    }

    /// Fold another line in. Content beyond the caps is dropped, but its
    /// bytes are always counted.
    fn append(&mut self, msg: Message, max_lines: usize, max_bytes: usize) {
        self.message.bytes += msg.bytes;
        if self.lines < max_lines && self.message.content.len() < max_bytes {
            self.message.content.push(b'\n');
            let room = max_bytes - self.message.content.len();
            self.message
                .content
                .extend_from_slice(&msg.content[..msg.content.len().min(room)]);
        }
        self.lines += 1;
    }
}

pub struct MultilineReader {
    inner: Box<dyn Reader>,
    pattern: Regex,
    negate: bool,
    match_after: bool,
    max_lines: usize,
    max_bytes: usize,
    pending: Option<Aggregate>,
    /// Terminal signal held back while a finished aggregate is delivered
    deferred: Option<ReadError>,
}

impl MultilineReader {
    pub fn new(
        inner: Box<dyn Reader>,
        config: &MultilineConfig,
        max_bytes: usize,
    ) -> crate::error::Result<Self> {
        let pattern = Regex::new(&config.pattern).map_err(|e| Error::Regex(e.to_string()))?;
        Ok(Self {
            inner,
            pattern,
            negate: config.negate,
            match_after: config.match_after,
            max_lines: config.max_lines,
            max_bytes: max_bytes.max(1),
            pending: None,
            deferred: None,
        })
    }

    fn matches(&self, msg: &Message) -> bool {
        self.pattern.is_match(&msg.content) != self.negate
    }

    fn flush(&mut self) -> Option<Message> {
        self.pending.take().map(|agg| agg.message)
    }
}

impl Reader for MultilineReader {
    fn next(&mut self) -> Result<Message, ReadError> {
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }

        loop {
            let msg = match self.inner.next() {
                Ok(msg) => msg,
                Err(ReadError::Timeout) => match self.flush() {
                    Some(done) => return Ok(done),
                    None => return Err(ReadError::Timeout),
                },
                Err(e) => match self.flush() {
                    // deliver what we have, replay the signal on the next pull
                    Some(done) => {
                        self.deferred = Some(e);
                        return Ok(done);
                    }
                    None => return Err(e),
                },
            };

            if self.match_after {
                // continuation lines match; anything else anchors a new event
                match &mut self.pending {
                    None => self.pending = Some(Aggregate::start(msg)),
                    Some(agg) => {
                        if self.pattern.is_match(&msg.content) != self.negate {
                            agg.append(msg, self.max_lines, self.max_bytes);
                        } else {
                            let done = self.flush().unwrap();
                            self.pending = Some(Aggregate::start(msg));
                            return Ok(done);
                        }
                    }
                }
            } else {
                // before-mode: matching lines lead, the first non-matching
                // line closes the event
                if self.matches(&msg) {
                    match &mut self.pending {
                        None => self.pending = Some(Aggregate::start(msg)),
                        Some(agg) => agg.append(msg, self.max_lines, self.max_bytes),
                    }
                } else {
                    match &mut self.pending {
                        None => return Ok(msg),
                        Some(agg) => {
                            agg.append(msg, self.max_lines, self.max_bytes);
                            return Ok(self.flush().unwrap());
                        }
                    }
                }
            }

            // cap reached mid-aggregate in after-mode: keep folding bytes,
            // content stays clamped by append()
        }
    }
}
