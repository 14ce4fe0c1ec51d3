// SPDX-License-Identifier: Apache-2.0

use crate::reader::{Message, ReadError, Reader};

/// Hard cap on emitted message size. Oversized content is truncated, never
/// buffered or rejected; the consumed byte count is preserved.
pub struct LimitReader {
    inner: Box<dyn Reader>,
    max_bytes: usize,
}

impl LimitReader {
    pub fn new(inner: Box<dyn Reader>, max_bytes: usize) -> Self {
        Self { inner, max_bytes }
    }
}

impl Reader for LimitReader {
    fn next(&mut self) -> Result<Message, ReadError> {
        let mut msg = self.inner.next()?;
        if msg.content.len() > self.max_bytes {
            msg.content.truncate(self.max_bytes);
            msg.add_field("truncated", serde_json::Value::Bool(true));
        }
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Message>);

    impl Reader for Fixed {
        fn next(&mut self) -> Result<Message, ReadError> {
            if self.0.is_empty() {
                return Err(ReadError::Eof);
            }
            Ok(self.0.remove(0))
        }
    }

    #[test]
    fn truncates_and_flags_oversized_messages() {
        let mut reader = LimitReader::new(
            Box::new(Fixed(vec![Message::new(vec![b'x'; 100], 101)])),
            10,
        );

        let msg = reader.next().unwrap();
        assert_eq!(msg.content.len(), 10);
        assert_eq!(msg.bytes, 101);
        assert_eq!(msg.fields.unwrap()["truncated"], true);
    }

    #[test]
    fn small_messages_untouched() {
        let mut reader = LimitReader::new(
            Box::new(Fixed(vec![Message::new(b"ok".to_vec(), 3)])),
            10,
        );
        let msg = reader.next().unwrap();
        assert_eq!(msg.content, b"ok");
        assert!(msg.fields.is_none());
    }
}
