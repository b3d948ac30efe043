// src/config.rs
use std::path::PathBuf;

use crate::lock::LockWrite;

/// Process settings read from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub db_url: String,
    pub port: u16,
    /// JSON file of channel configs upserted before serving.
    pub channels_file: Option<PathBuf>,
    pub lock_write: LockWrite,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let port = match get("POIS_PORT") {
            Some(p) => p.trim().parse::<u16>().map_err(|e| anyhow::anyhow!("POIS_PORT '{p}': {e}"))?,
            None => 8080,
        };
        let lock_write = match get("POIS_LOCK_WRITE") {
            Some(v) => v.parse::<LockWrite>().map_err(anyhow::Error::msg)?,
            None => LockWrite::default(),
        };
        Ok(Self {
            db_url: get("POIS_DB").unwrap_or_else(|| "sqlite://pois.db".to_string()),
            port,
            channels_file: get("POIS_CHANNELS").filter(|s| !s.is_empty()).map(PathBuf::from),
            lock_write,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> anyhow::Result<Settings> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.db_url, "sqlite://pois.db");
        assert_eq!(s.port, 8080);
        assert_eq!(s.channels_file, None);
        assert_eq!(s.lock_write, LockWrite::CompareAndSwap);
    }

    #[test]
    fn reads_overrides_and_rejects_garbage() {
        let s = settings(&[
            ("POIS_PORT", "9090"),
            ("POIS_CHANNELS", "/etc/pois/channels.json"),
            ("POIS_LOCK_WRITE", "last-writer-wins"),
        ])
        .unwrap();
        assert_eq!(s.port, 9090);
        assert_eq!(s.channels_file, Some(PathBuf::from("/etc/pois/channels.json")));
        assert_eq!(s.lock_write, LockWrite::LastWriterWins);

        assert!(settings(&[("POIS_PORT", "http")]).is_err());
        assert!(settings(&[("POIS_LOCK_WRITE", "queue")]).is_err());
    }
}
