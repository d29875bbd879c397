//! Shared scaffolding for unit tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;

/// Unique scratch directory under /tmp.
pub fn tmp_dir(prefix: &str) -> PathBuf {
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let pid = std::process::id();
    let dir = PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// A config rooted in a scratch directory, with short delays so state-machine
/// tests run fast.
pub fn config(root: &Path) -> Config {
    Config {
        bot_name: "hornet".into(),
        owner_name: "owner".into(),
        owner_number: "254700000001".into(),
        prefix: "!".into(),
        session_token: None,
        session_dir: root.join("session"),
        env_file: root.join(".env"),
        data_dir: root.to_path_buf(),
        settings_file: root.join("settings.json"),
        failure_counter_file: root.join("failure-count.json"),
        gateway_path: PathBuf::from("hornet-gateway-bridge"),
        broadcast_channel: None,
        auto_follow_channels: vec![],
        auto_join_groups: vec![],
        dedup_ttl: Duration::from_secs(60),
        abuse_window: Duration::from_secs(1),
        abuse_message_limit: 2,
        max_timeout_retries: 3,
        reconnect_delay: Duration::from_millis(10),
        reresolve_delay: Duration::from_millis(10),
        startup_retry_delay: Duration::from_millis(10),
        logout_cooldown: Duration::from_millis(10),
        stabilize_delay: Duration::from_millis(0),
        auto_read_override: None,
        auto_react_override: None,
        auto_typing_override: None,
        auto_recording_override: None,
        reaction_emoji_override: None,
        test_mode: true,
    }
}
