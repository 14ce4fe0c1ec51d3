// SPDX-License-Identifier: Apache-2.0

//! JSON line decoding. The decoded object rides along as message fields;
//! event assembly decides whether they live under a `json` key or at the
//! top level.

use serde_json::{Map, Value};

use crate::config::JsonConfig;
use crate::reader::{Message, ReadError, Reader};

pub struct JsonReader {
    inner: Box<dyn Reader>,
    config: JsonConfig,
}

impl JsonReader {
    pub fn new(inner: Box<dyn Reader>, config: JsonConfig) -> Self {
        Self { inner, config }
    }
}

impl Reader for JsonReader {
    fn next(&mut self) -> Result<Message, ReadError> {
        let mut msg = self.inner.next()?;
        if msg.is_empty() {
            return Ok(msg);
        }

        let decoded: Map<String, Value> = match serde_json::from_slice(&msg.content) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                if self.config.add_error_key {
                    msg.add_field(
                        "error",
                        Value::String(format!("json document is not an object: {}", other)),
                    );
                }
                return Ok(msg);
            }
            Err(e) => {
                if self.config.add_error_key {
                    msg.add_field("error", Value::String(format!("json decode failed: {}", e)));
                }
                return Ok(msg);
            }
        };

        if let Some(key) = &self.config.message_key {
            if let Some(Value::String(text)) = decoded.get(key) {
                msg.content = text.clone().into_bytes();
            }
        }

        let fields = msg.fields.get_or_insert_with(Map::new);
        for (key, value) in decoded {
            fields.insert(key, value);
        }

        Ok(msg)
    }
}
