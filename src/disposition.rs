// src/disposition.rs
//! Turns one inbound cue on one channel into the action the packager takes.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::lock::{compute_expiry, Clock, LockStore, LockWrite, SignalLock};
use crate::models::{ChannelConfig, DefaultBehavior, Mode};
use crate::rules::{self, Outcome};

/// Handled normally: rule, priority or default applied, or lock active.
pub const STATUS_OK: u16 = 0;
/// Something failed and a fallback was used.
pub const STATUS_DEGRADED: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action { Replace, Delete, Noop }

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Replace => "replace",
            Action::Delete => "delete",
            Action::Noop => "noop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Disposition {
    pub action: Action,
    /// Replacement bytes for `replace`, the inbound cue for `noop`.
    pub cue_bytes: Option<Vec<u8>>,
    pub status_code: u16,
    pub status_note: String,
}

impl Disposition {
    fn new(action: Action, cue_bytes: Option<Vec<u8>>, degraded: bool, note: impl Into<String>) -> Self {
        Self {
            action,
            cue_bytes,
            status_code: if degraded { STATUS_DEGRADED } else { STATUS_OK },
            status_note: note.into(),
        }
    }
}

pub trait ConfigStore: Send + Sync {
    fn channel_config(&self, channel_id: &str) -> Result<Option<ChannelConfig>, StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    channels: HashMap<String, ChannelConfig>,
}

impl MemoryConfigStore {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, channel_id: impl Into<String>, config: ChannelConfig) {
        self.channels.insert(channel_id.into(), config);
    }
}

impl ConfigStore for MemoryConfigStore {
    fn channel_config(&self, channel_id: &str) -> Result<Option<ChannelConfig>, StoreError> {
        Ok(self.channels.get(channel_id).cloned())
    }
}

#[derive(Clone)]
pub struct Resolver {
    pub locks: Arc<dyn LockStore>,
    pub clock: Arc<dyn Clock>,
    pub lock_write: LockWrite,
}

impl Resolver {
    pub fn new(locks: Arc<dyn LockStore>, clock: Arc<dyn Clock>, lock_write: LockWrite) -> Self {
        Self { locks, clock, lock_write }
    }

    pub fn resolve_with(&self, store: &dyn ConfigStore, channel_id: &str, raw: &[u8]) -> Disposition {
        self.resolve(channel_id, raw, store.channel_config(channel_id))
    }

    /// Never fails; every error becomes a degraded disposition.
    pub fn resolve(
        &self,
        channel_id: &str,
        raw: &[u8],
        config_lookup: Result<Option<ChannelConfig>, StoreError>,
    ) -> Disposition {
        let disposition = self.decide(channel_id, raw, config_lookup);
        info!(
            "channel={} action={} status={} note={}",
            channel_id,
            disposition.action.as_str(),
            disposition.status_code,
            disposition.status_note
        );
        disposition
    }

    fn decide(
        &self,
        channel_id: &str,
        raw: &[u8],
        config_lookup: Result<Option<ChannelConfig>, StoreError>,
    ) -> Disposition {
        let config = match config_lookup {
            Ok(Some(c)) => c,
            Ok(None) => {
                warn!("channel '{}' not registered", channel_id);
                return Disposition::new(Action::Noop, Some(raw.to_vec()), true, "channel not registered");
            }
            Err(e) => {
                warn!("config lookup for '{}' failed: {}", channel_id, e);
                return Disposition::new(
                    Action::Noop,
                    Some(raw.to_vec()),
                    true,
                    format!("configuration store unavailable: {e}"),
                );
            }
        };

        let stateful = config.mode == Mode::Stateful;
        let now = self.clock.now();
        let mut extra: Vec<String> = Vec::new();
        let mut degraded = false;

        if stateful {
            match self.locks.get(channel_id) {
                Ok(Some(lock)) if lock.active_at(now) => {
                    return Disposition::new(Action::Delete, None, false, "locked until previous cue expires");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("lock read for '{}' failed, treating as unlocked: {}", channel_id, e);
                    extra.push(format!("lock read failed: {e}"));
                    degraded = true;
                }
            }
        }

        let eval = rules::evaluate(&config, raw);
        degraded |= eval.is_degraded();
        let mut notes = vec![eval.note];

        let mut disposition = match eval.outcome {
            Outcome::Deleted => Disposition::new(Action::Delete, None, false, ""),
            Outcome::DefaultBehavior => match config.default_behavior {
                DefaultBehavior::Noop => Disposition::new(Action::Noop, Some(raw.to_vec()), false, ""),
                DefaultBehavior::Delete => Disposition::new(Action::Delete, None, false, ""),
            },
            Outcome::Replaced { cue, bytes, announced_break } if stateful => {
                let expiry = compute_expiry(now, announced_break, cue.info.pts_adjustment);
                let lock = SignalLock { channel_id: channel_id.to_string(), expiry };
                let written = match self.lock_write {
                    LockWrite::CompareAndSwap => self.locks.put_if_expired(lock, now),
                    LockWrite::LastWriterWins => self.locks.put(lock).map(|()| true),
                };
                match written {
                    Ok(true) => {
                        notes.push(format!("locked until {expiry}"));
                        Disposition::new(Action::Replace, Some(bytes), false, "")
                    }
                    Ok(false) => {
                        notes.push("dropped: a concurrent cue holds the lock".into());
                        Disposition::new(Action::Delete, None, false, "")
                    }
                    Err(e) => {
                        warn!("lock write for '{}' failed: {}", channel_id, e);
                        notes.push(format!("lock write failed: {e}"));
                        degraded = true;
                        Disposition::new(Action::Replace, Some(bytes), false, "")
                    }
                }
            }
            Outcome::Replaced { bytes, .. } => Disposition::new(Action::Replace, Some(bytes), false, ""),
        };

        notes.extend(extra);
        disposition.status_note = notes.join("; ");
        if degraded {
            disposition.status_code = STATUS_DEGRADED;
        }
        disposition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::MemoryLockStore;

    fn resolver() -> Resolver {
        Resolver::new(Arc::new(MemoryLockStore::new()), Arc::new(|| 1_000u64), LockWrite::default())
    }

    #[test]
    fn unregistered_channel_is_degraded_noop() {
        let d = resolver().resolve_with(&MemoryConfigStore::new(), "nope", b"\xFC");
        assert_eq!(d.action, Action::Noop);
        assert_eq!(d.status_code, STATUS_DEGRADED);
        assert_eq!(d.status_note, "channel not registered");
        assert_eq!(d.cue_bytes.as_deref(), Some(&b"\xFC"[..]));
    }

    #[test]
    fn store_failure_is_degraded_noop() {
        let d = resolver().resolve("ch", b"", Err(StoreError::Unavailable("db locked".into())));
        assert_eq!((d.action, d.status_code), (Action::Noop, STATUS_DEGRADED));
        assert!(d.status_note.starts_with("configuration store unavailable"));
    }

    #[test]
    fn default_behavior_maps_to_action() {
        let cfg: ChannelConfig = serde_json::from_str(r#"{"default_behavior":"delete"}"#).unwrap();
        let d = resolver().resolve("ch", b"anything", Ok(Some(cfg)));
        assert_eq!((d.action, d.status_code), (Action::Delete, STATUS_OK));
        assert_eq!(d.cue_bytes, None);
    }

    #[test]
    fn disposition_serializes_lowercase_action() {
        let d = Disposition::new(Action::Replace, Some(vec![1]), false, "ok");
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["action"], "replace");
        assert_eq!(v["status_code"], 0);
    }
}
