// SPDX-License-Identifier: Apache-2.0

//! Per-file tailing state: identity, source path, committed offset.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::input::identity::FileIdent;

/// Time-to-live of a state once its file goes inactive.
///
/// Persisted as whole milliseconds: -1 never expires, 0 expires immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Kept until explicitly removed (also used for just-loaded states that
    /// no configured pattern has reclaimed yet)
    Never,
    /// Removed by the next cleanup pass
    Immediate,
    /// Removed once the state has been idle for this long
    After(Duration),
}

impl Serialize for Ttl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let millis: i64 = match self {
            Ttl::Never => -1,
            Ttl::Immediate => 0,
            Ttl::After(d) => d.as_millis() as i64,
        };
        serializer.serialize_i64(millis)
    }
}

impl<'de> Deserialize<'de> for Ttl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        Ok(match millis {
            m if m < 0 => Ttl::Never,
            0 => Ttl::Immediate,
            m => Ttl::After(Duration::from_millis(m as u64)),
        })
    }
}

/// State of one tailed file, keyed by its durable identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    /// Durable identity string produced by the identity strategy
    pub id: String,
    /// Last known path of the file
    pub source: PathBuf,
    /// Committed read offset in bytes
    pub offset: u64,
    /// True while no harvester owns this state
    pub finished: bool,
    /// Last activity on this state
    #[serde(with = "unix_millis")]
    pub timestamp: SystemTime,
    /// Expiry once idle
    pub ttl: Ttl,
    /// Raw identity of the file at the time the state was written
    pub ident: FileIdent,
    /// Name of the strategy that produced `id`
    pub identifier: String,
}

impl State {
    pub fn new(id: String, source: PathBuf, ident: FileIdent, identifier: &str) -> Self {
        Self {
            id,
            source,
            offset: 0,
            finished: false,
            timestamp: SystemTime::now(),
            ttl: Ttl::Never,
            ident,
            identifier: identifier.to_string(),
        }
    }

    /// Placeholder for "no previous state".
    pub fn empty() -> Self {
        Self {
            id: String::new(),
            source: PathBuf::new(),
            offset: 0,
            finished: false,
            timestamp: SystemTime::now(),
            ttl: Ttl::Never,
            ident: FileIdent::default(),
            identifier: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    /// Whether the TTL has elapsed relative to `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        match self.ttl {
            Ttl::Never => false,
            Ttl::Immediate => true,
            Ttl::After(ttl) => now
                .duration_since(self.timestamp)
                .map(|idle| idle > ttl)
                .unwrap_or(false),
        }
    }
}

mod unix_millis {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = ts
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?
            .as_millis() as u64;
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_millis(millis))
    }
}
