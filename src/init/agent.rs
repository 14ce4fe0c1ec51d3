// SPDX-License-Identifier: Apache-2.0

//! Agent wiring: registry load, the scanner and registrar threads, and the
//! async consumer that serializes events to stdout as NDJSON.

use std::error::Error as StdError;
use std::io::Write;
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bounded_channel::bounded;
use crate::config::{InputType, RegistryConfig, TailerConfig};
use crate::harvester::source::PipeSource;
use crate::harvester::{Harvester, LineFilters};
use crate::input::identity::FileIdent;
use crate::input::Input;
use crate::output::{ChannelOutlet, Event};
use crate::registry::registrar::Registrar;
use crate::registry::{State, StateRegistry};

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

const EVENT_CHANNEL_SIZE: usize = 1024;

pub struct Agent {
    config: TailerConfig,
    registry_config: RegistryConfig,
}

impl Agent {
    pub fn new(config: TailerConfig, registry_config: RegistryConfig) -> Self {
        Self {
            config,
            registry_config,
        }
    }

    /// Run until the cancellation token fires or the input drains (stdin).
    /// Shutdown order matters: harvesters are stopped while the consumer is
    /// still draining, so a full channel can never deadlock the stop, and
    /// the registrar flushes last so the final offsets land on disk.
    pub async fn run(self, cancel_token: CancellationToken) -> Result<(), BoxError> {
        let registry = Arc::new(StateRegistry::new());
        let registrar = Registrar::new(
            registry.clone(),
            self.registry_config.path.clone(),
            self.registry_config.flush,
        );
        let loaded = registrar.load()?;
        if loaded > 0 {
            info!(states = loaded, "Restored registry");
        }

        let (event_tx, event_rx) = bounded::<Event>(EVENT_CHANNEL_SIZE);
        let outlet = Arc::new(ChannelOutlet::new(event_tx));

        let (input_stop_tx, input_stop_rx) = mpsc::channel();
        let input_handle: JoinHandle<()> = match self.config.input_type {
            InputType::Log => {
                let input = Input::new(self.config.clone(), registry.clone(), outlet)?;
                std::thread::Builder::new()
                    .name("tailer-input".into())
                    .spawn(move || input.run(input_stop_rx))?
            }
            InputType::Stdin => {
                self.config.validate()?;
                let filters = Arc::new(LineFilters::compile(
                    &self.config.include_lines,
                    &self.config.exclude_lines,
                )?);
                let state = State::new(
                    "pipe::stdin".to_string(),
                    "-".into(),
                    FileIdent::default(),
                    "pipe",
                );
                let harvester = Harvester::new(
                    Arc::new(self.config.clone()),
                    state,
                    registry.clone(),
                    outlet,
                    filters,
                );
                std::thread::Builder::new()
                    .name("tailer-stdin".into())
                    .spawn(move || harvester.run_with_source(Box::new(PipeSource::stdin())))?
            }
        };

        let (registrar_stop_tx, registrar_stop_rx) = mpsc::channel();
        let registrar_handle = std::thread::Builder::new()
            .name("tailer-registrar".into())
            .spawn(move || registrar.run(registrar_stop_rx))?;

        let emitter = Emitter::new(self.config.json.as_ref().is_some_and(|j| j.keys_under_root));
        let mut event_rx = event_rx;

        loop {
            tokio::select! {
                event = event_rx.next() => match event {
                    Some(event) => emitter.emit(&event),
                    // all senders gone: the input drained on its own
                    None => break,
                },
                _ = cancel_token.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        // Stop the input off the async runtime; harvesters block on channel
        // capacity, so keep consuming until the stop completes.
        let stopper = tokio::task::spawn_blocking(move || {
            let _ = input_stop_tx.send(());
            if let Err(e) = input_handle.join() {
                error!(?e, "Input thread panicked");
            }
        });
        tokio::pin!(stopper);
        loop {
            tokio::select! {
                event = event_rx.next() => match event {
                    Some(event) => emitter.emit(&event),
                    None => break,
                },
                result = &mut stopper => {
                    if let Err(e) = result {
                        warn!(error = %e, "Input stop task failed");
                    }
                    break;
                }
            }
        }
        while let Some(event) = event_rx.try_recv() {
            emitter.emit(&event);
        }
        drop(event_rx);

        let _ = registrar_stop_tx.send(());
        if registrar_handle.join().is_err() {
            error!("Registrar thread panicked");
        }

        info!("Agent stopped");
        Ok(())
    }
}

/// NDJSON serializer for the stdout sink. One object per accepted line;
/// state-only events are consumed silently.
struct Emitter {
    keys_under_root: bool,
}

impl Emitter {
    fn new(keys_under_root: bool) -> Self {
        Self { keys_under_root }
    }

    fn emit(&self, event: &Event) {
        let Some(doc) = self.render(event) else {
            return;
        };
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        if serde_json::to_writer(&mut out, &doc)
            .map_err(std::io::Error::from)
            .and_then(|()| out.write_all(b"\n"))
            .is_err()
        {
            // stdout gone (broken pipe); nothing sensible left to do but
            // keep offsets moving
        }
    }

    fn render(&self, event: &Event) -> Option<Value> {
        if event.message.is_none() && event.fields.is_none() {
            return None;
        }

        let mut doc = Map::new();
        doc.insert(
            "@timestamp".to_string(),
            Value::String(format_timestamp(event.timestamp)),
        );
        doc.insert(
            "source".to_string(),
            Value::String(event.state.source.display().to_string()),
        );
        doc.insert(
            "offset".to_string(),
            Value::Number(event.state.offset.into()),
        );

        if let Some(message) = &event.message {
            doc.insert("message".to_string(), Value::String(message.clone()));
        }

        if let Some(fields) = &event.fields {
            if self.keys_under_root {
                for (key, value) in fields {
                    // reserved keys keep their event-level values
                    if !doc.contains_key(key) {
                        doc.insert(key.clone(), value.clone());
                    }
                }
            } else if !fields.is_empty() {
                doc.insert("fields".to_string(), Value::Object(fields.clone()));
            }
        }

        Some(Value::Object(doc))
    }
}

fn format_timestamp(t: SystemTime) -> String {
    humantime::format_rfc3339_millis(t.max(UNIX_EPOCH)).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;

    fn event(message: Option<&str>, fields: Option<Map<String, Value>>) -> Event {
        let mut state = State::new(
            "id".to_string(),
            PathBuf::from("/var/log/app.log"),
            FileIdent::new(1, 2),
            "native",
        );
        state.offset = 42;
        Event {
            timestamp: UNIX_EPOCH + Duration::from_millis(1_700_000_000_123),
            message: message.map(|m| m.to_string()),
            fields,
            state,
        }
    }

    #[test]
    fn renders_message_with_source_and_offset() {
        let emitter = Emitter::new(false);
        let doc = emitter.render(&event(Some("hello"), None)).unwrap();
        assert_eq!(doc["message"], "hello");
        assert_eq!(doc["source"], "/var/log/app.log");
        assert_eq!(doc["offset"], 42);
        assert_eq!(doc["@timestamp"], "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn state_only_events_render_nothing() {
        let emitter = Emitter::new(false);
        assert!(emitter.render(&event(None, None)).is_none());
    }

    #[test]
    fn fields_nest_by_default_and_lift_under_root() {
        let mut fields = Map::new();
        fields.insert("stream".to_string(), json!("stderr"));
        fields.insert("offset".to_string(), json!(999));

        let emitter = Emitter::new(false);
        let doc = emitter.render(&event(Some("x"), Some(fields.clone()))).unwrap();
        assert_eq!(doc["fields"]["stream"], "stderr");

        let emitter = Emitter::new(true);
        let doc = emitter.render(&event(Some("x"), Some(fields))).unwrap();
        assert_eq!(doc["stream"], "stderr");
        // event-level keys win over decoded ones
        assert_eq!(doc["offset"], 42);
    }
}
