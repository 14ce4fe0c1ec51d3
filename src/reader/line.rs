// SPDX-License-Identifier: Apache-2.0

//! Newline framing over a raw byte source.

use std::time::SystemTime;

use crate::config::Encoding;
use crate::reader::{ByteSource, Message, ReadError, Reader};

/// Splits the byte stream on `\n`, emitting one message per line including
/// its terminator. Lines longer than `max_line_bytes` are clamped: the
/// overflow is consumed (and counted) but not buffered.
pub struct LineReader<S: ByteSource> {
    source: S,
    encoding: Encoding,
    buf: Vec<u8>,
    chunk: Vec<u8>,
    /// Bytes consumed but dropped because the pending line hit the clamp
    skipped: usize,
    max_line_bytes: usize,
}

impl<S: ByteSource> LineReader<S> {
    pub fn new(source: S, encoding: Encoding, buffer_size: usize, max_line_bytes: usize) -> Self {
        Self {
            source,
            encoding,
            buf: Vec::new(),
            chunk: vec![0u8; buffer_size.max(1)],
            skipped: 0,
            max_line_bytes: max_line_bytes.max(1),
        }
    }

    fn decode(&self, content: Vec<u8>) -> Vec<u8> {
        match self.encoding {
            Encoding::Plain => content,
            Encoding::Utf8 => match String::from_utf8(content) {
                Ok(s) => s.into_bytes(),
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned().into_bytes(),
            },
        }
    }

    fn emit(&mut self, mut content: Vec<u8>, consumed: usize) -> Message {
        // carried-over chunk remainders can exceed the clamp on their own
        content.truncate(self.max_line_bytes);
        let mut msg = Message::new(self.decode(content), consumed);
        msg.timestamp = SystemTime::now();
        msg
    }
}

impl<S: ByteSource> Reader for LineReader<S> {
    fn next(&mut self) -> Result<Message, ReadError> {
        // a complete line may already be buffered from the previous chunk
        if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let rest = self.buf.split_off(pos + 1);
            let line = std::mem::replace(&mut self.buf, rest);
            let consumed = line.len();
            return Ok(self.emit(line, consumed));
        }

        loop {
            let n = self.source.read(&mut self.chunk)?;
            if n == 0 {
                continue;
            }

            let newline = self.chunk[..n].iter().position(|&b| b == b'\n');
            match newline {
                Some(pos) => {
                    let consumed = self.buf.len() + self.skipped + pos + 1;
                    let mut line = std::mem::take(&mut self.buf);
                    let room = self.max_line_bytes.saturating_sub(line.len());
                    line.extend_from_slice(&self.chunk[..pos.min(room)]);
                    if pos < room {
                        line.push(b'\n');
                    }

                    self.buf = self.chunk[pos + 1..n].to_vec();
                    self.skipped = 0;
                    return Ok(self.emit(line, consumed));
                }
                None => {
                    let room = self.max_line_bytes.saturating_sub(self.buf.len());
                    let take = n.min(room);
                    self.buf.extend_from_slice(&self.chunk[..take]);
                    self.skipped += n - take;
                }
            }
        }
    }
}
