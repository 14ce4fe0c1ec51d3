// SPDX-License-Identifier: Apache-2.0

use crate::reader::{Message, ReadError, Reader};

/// Removes the trailing line terminator (`\n` or `\r\n`) from each message.
/// The consumed byte count is untouched; offsets still cover the delimiter.
pub struct StripNewline {
    inner: Box<dyn Reader>,
}

impl StripNewline {
    pub fn new(inner: Box<dyn Reader>) -> Self {
        Self { inner }
    }
}

impl Reader for StripNewline {
    fn next(&mut self) -> Result<Message, ReadError> {
        let mut msg = self.inner.next()?;
        if msg.content.last() == Some(&b'\n') {
            msg.content.pop();
            if msg.content.last() == Some(&b'\r') {
                msg.content.pop();
            }
        }
        Ok(msg)
    }
}
