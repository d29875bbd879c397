//! Durable key-value settings: bot mode plus the feature toggles owner
//! commands can flip at runtime.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::{config::Config, Result};

/// Which tier of commands non-owner senders can reach.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotMode {
    #[default]
    Public,
    SelfOnly,
}

impl BotMode {
    pub fn label(&self) -> &'static str {
        match self {
            BotMode::Public => "public",
            BotMode::SelfOnly => "self",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bot_mode: BotMode,

    /// Flood/abuse blocking. When off, floods are logged but never blocked.
    pub abuse_protection: bool,

    // Ambient automation
    pub auto_read: bool,
    pub auto_react: bool,
    pub auto_typing: bool,
    pub auto_recording: bool,
    pub reaction_emoji: String,

    /// Per-group denylist-word guard toggle, keyed by group address.
    pub badword_guard: HashMap<String, bool>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bot_mode: BotMode::Public,
            abuse_protection: false,
            auto_read: false,
            auto_react: false,
            auto_typing: false,
            auto_recording: false,
            reaction_emoji: "\u{2764}\u{fe0f}".to_string(),
            badword_guard: HashMap::new(),
        }
    }
}

/// Process-wide settings handle with write-through persistence.
///
/// Mutations are infrequent (owner commands), so a single coarse lock is
/// enough; readers take a cheap snapshot.
pub struct SettingsStore {
    path: PathBuf,
    inner: Mutex<Settings>,
}

impl SettingsStore {
    /// Load from disk; a missing or corrupt file falls back to defaults.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = read_settings(&path).unwrap_or_else(|e| {
            warn!("settings file unreadable, using defaults: {e}");
            Settings::default()
        });
        Self {
            path,
            inner: Mutex::new(settings),
        }
    }

    /// Apply the startup environment overrides for automation toggles.
    /// Overrides are not persisted: they win for this process only.
    pub async fn apply_env_overrides(&self, cfg: &Config) {
        let mut s = self.inner.lock().await;
        if let Some(v) = cfg.auto_read_override {
            s.auto_read = v;
        }
        if let Some(v) = cfg.auto_react_override {
            s.auto_react = v;
        }
        if let Some(v) = cfg.auto_typing_override {
            s.auto_typing = v;
        }
        if let Some(v) = cfg.auto_recording_override {
            s.auto_recording = v;
        }
        if let Some(v) = &cfg.reaction_emoji_override {
            s.reaction_emoji = v.clone();
        }
    }

    pub async fn snapshot(&self) -> Settings {
        self.inner.lock().await.clone()
    }

    pub async fn bot_mode(&self) -> BotMode {
        self.inner.lock().await.bot_mode
    }

    /// Mutate and persist. The lock is held across the write so concurrent
    /// updates cannot interleave half-saved states.
    pub async fn update(&self, apply: impl FnOnce(&mut Settings)) -> Result<()> {
        let mut s = self.inner.lock().await;
        apply(&mut s);
        write_settings(&self.path, &s)
    }
}

fn read_settings(path: &Path) -> Result<Settings> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}
