// src/lock.rs
//! Per-channel signal lock used in stateful mode.
//!
//! A replaced cue locks its channel until the break it announces is over;
//! cues arriving before then are dropped.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use serde::Serialize;

use crate::cue::{pts_to_seconds, ticks_to_seconds};
use crate::error::StoreError;

/// Break length assumed when a cue carries no duration.
pub const DEFAULT_BREAK_SECONDS: f64 = 30.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalLock {
    pub channel_id: String,
    /// Absolute UTC seconds.
    pub expiry: u64,
}

impl SignalLock {
    pub fn active_at(&self, now: u64) -> bool { now < self.expiry }
}

pub trait LockStore: Send + Sync {
    fn get(&self, channel_id: &str) -> Result<Option<SignalLock>, StoreError>;

    fn put(&self, lock: SignalLock) -> Result<(), StoreError>;

    /// Stores `lock` unless the channel holds a lock still active at `now`.
    /// Returns whether it was stored.
    fn put_if_expired(&self, lock: SignalLock, now: u64) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockWrite {
    #[default]
    CompareAndSwap,
    LastWriterWins,
}

impl FromStr for LockWrite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cas" | "compare-and-swap" => Ok(LockWrite::CompareAndSwap),
            "lww" | "last-writer-wins" => Ok(LockWrite::LastWriterWins),
            other => Err(format!("unknown lock write policy '{other}' (cas|last-writer-wins)")),
        }
    }
}

/// Source of the current UTC time in seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

impl<F> Clock for F
where
    F: Fn() -> u64 + Send + Sync,
{
    fn now(&self) -> u64 { self() }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 { chrono::Utc::now().timestamp().max(0) as u64 }
}

/// `now` plus the announced break (in ticks, 30 s if none) and the
/// pts_adjustment, rounded up to whole seconds.
pub fn compute_expiry(now: u64, announced_break: Option<u64>, pts_adjustment: u64) -> u64 {
    let hold = announced_break.map_or(DEFAULT_BREAK_SECONDS, ticks_to_seconds) + pts_to_seconds(pts_adjustment);
    now.saturating_add(hold.ceil() as u64)
}

/// In-process lock table shared by request handlers.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    locks: Mutex<HashMap<String, SignalLock>>,
}

impl MemoryLockStore {
    pub fn new() -> Self { Self::default() }

    fn table(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, SignalLock>>, StoreError> {
        self.locks.lock().map_err(|_| StoreError::Unavailable("lock table poisoned".into()))
    }
}

impl LockStore for MemoryLockStore {
    fn get(&self, channel_id: &str) -> Result<Option<SignalLock>, StoreError> {
        Ok(self.table()?.get(channel_id).cloned())
    }

    fn put(&self, lock: SignalLock) -> Result<(), StoreError> {
        self.table()?.insert(lock.channel_id.clone(), lock);
        Ok(())
    }

    fn put_if_expired(&self, lock: SignalLock, now: u64) -> Result<bool, StoreError> {
        let mut table = self.table()?;
        if table.get(&lock.channel_id).is_some_and(|held| held.active_at(now)) {
            return Ok(false);
        }
        table.insert(lock.channel_id.clone(), lock);
        Ok(true)
    }
}
