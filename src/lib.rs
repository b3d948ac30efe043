//! SCTE-35 cue conditioning for an ESAM placement opportunity server.
//!
//! A packager posts each cue it sees; the channel's rules decide whether
//! the cue passes untouched (`noop`), is dropped (`delete`) or is rewritten
//! (`replace`). See [`disposition::Resolver`] for the entry point.

pub mod bitstream;
pub mod config;
pub mod cue;
pub mod disposition;
pub mod error;
pub mod esam;
pub mod fields;
pub mod lock;
pub mod models;
pub mod rules;
pub mod scte35;
pub mod store;

pub use cue::Cue;
pub use disposition::{Action, ConfigStore, Disposition, MemoryConfigStore, Resolver};
pub use error::{BitstreamError, CodecError, ConditionError, EsamError, RuleError, StoreError};
pub use lock::{Clock, LockStore, LockWrite, MemoryLockStore, SignalLock, SystemClock};
pub use models::ChannelConfig;
