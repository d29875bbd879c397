//! Durable connection-failure counter.
//!
//! Persisted across restarts so a supervisor-driven restart loop cannot
//! retry timeouts forever: the session manager reads it at startup, writes
//! it on every timeout close and deletes it on a successful open (or when
//! the retry ceiling trips).

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Result;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCounter {
    pub count: u32,
    pub last_error_timestamp: i64,
}

impl FailureCounter {
    /// Missing or unreadable file counts as zero failures.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("failure counter unreadable, resetting: {e}");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn delete(path: &Path) {
        if path.exists() {
            if let Err(e) = fs::remove_file(path) {
                warn!("failed to delete failure counter: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}.json"))
    }

    #[test]
    fn round_trips_count_and_timestamp() {
        let path = tmp_file("hornet-counter");
        let c = FailureCounter {
            count: 2,
            last_error_timestamp: 1_700_000_000_000,
        };
        c.save(&path).unwrap();

        // Simulated restart: reload from disk.
        let reloaded = FailureCounter::load(&path);
        assert_eq!(reloaded, c);

        FailureCounter::delete(&path);
        assert_eq!(FailureCounter::load(&path), FailureCounter::default());
    }

    #[test]
    fn missing_file_is_zero() {
        let path = tmp_file("hornet-counter-missing");
        assert_eq!(FailureCounter::load(&path), FailureCounter::default());
    }
}
