use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::Jid, errors::Error, Result};

/// Typed configuration, loaded once at startup from `.env` + environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Identity
    pub bot_name: String,
    pub owner_name: String,
    pub owner_number: String,
    pub prefix: String,

    // Credential material
    pub session_token: Option<String>,
    pub session_dir: PathBuf,
    pub env_file: PathBuf,

    // Durable state
    pub data_dir: PathBuf,
    pub settings_file: PathBuf,
    pub failure_counter_file: PathBuf,

    // Transport
    pub gateway_path: PathBuf,
    pub broadcast_channel: Option<Jid>,
    pub auto_follow_channels: Vec<Jid>,
    pub auto_join_groups: Vec<String>,

    // Dispatch windows
    pub dedup_ttl: Duration,
    pub abuse_window: Duration,
    pub abuse_message_limit: usize,

    // Reconnect policy (fixed delays, no exponential backoff)
    pub max_timeout_retries: u32,
    pub reconnect_delay: Duration,
    pub reresolve_delay: Duration,
    pub startup_retry_delay: Duration,
    pub logout_cooldown: Duration,
    pub stabilize_delay: Duration,

    // Startup overrides for persisted automation toggles
    pub auto_read_override: Option<bool>,
    pub auto_react_override: Option<bool>,
    pub auto_typing_override: Option<bool>,
    pub auto_recording_override: Option<bool>,
    pub reaction_emoji_override: Option<String>,

    // Test mode: load everything, skip the transport connection.
    pub test_mode: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let owner_number = env_str("OWNER_NUMBER")
            .and_then(non_empty)
            .map(|s| digits_only(&s))
            .ok_or_else(|| {
                Error::Config("OWNER_NUMBER environment variable is required".to_string())
            })?;
        if owner_number.is_empty() {
            return Err(Error::Config(
                "OWNER_NUMBER must contain at least one digit".to_string(),
            ));
        }

        let bot_name = env_str("BOT_NAME").and_then(non_empty).unwrap_or_else(|| "hornet".to_string());
        let owner_name = env_str("OWNER_NAME")
            .and_then(non_empty)
            .unwrap_or_else(|| format!("{bot_name} owner"));
        let prefix = env_str("BOT_PREFIX").and_then(non_empty).unwrap_or_else(|| "!".to_string());

        let session_token = env_str("SESSION_ID").and_then(non_empty);
        let session_dir = env_path("SESSION_DIR").unwrap_or_else(|| PathBuf::from("session"));
        let env_file = env_path("ENV_FILE").unwrap_or_else(|| PathBuf::from(".env"));

        let data_dir = env_path("DATA_DIR").unwrap_or_else(|| PathBuf::from("data"));
        fs::create_dir_all(&data_dir)?;
        let settings_file = data_dir.join("settings.json");
        let failure_counter_file = data_dir.join("failure-count.json");

        let gateway_path = env_path("GATEWAY_PATH")
            .or_else(|| which_in_path("hornet-gateway-bridge"))
            .unwrap_or_else(|| PathBuf::from("/usr/local/bin/hornet-gateway-bridge"));

        let broadcast_channel = env_str("BROADCAST_CHANNEL").and_then(non_empty).map(Jid::new);
        let auto_follow_channels = parse_csv(env_str("AUTO_FOLLOW_CHANNELS"))
            .into_iter()
            .map(Jid::new)
            .collect();
        let auto_join_groups = parse_csv(env_str("AUTO_JOIN_GROUPS"));

        let dedup_ttl = Duration::from_secs(env_u64("DEDUP_TTL_SECS").unwrap_or(60));
        let abuse_window = Duration::from_millis(env_u64("ABUSE_WINDOW_MS").unwrap_or(1000));
        let abuse_message_limit = env_usize("ABUSE_MESSAGE_LIMIT").unwrap_or(2);

        let max_timeout_retries = env_u32("MAX_TIMEOUT_RETRIES").unwrap_or(3);
        let reconnect_delay = Duration::from_secs(env_u64("RECONNECT_DELAY_SECS").unwrap_or(5));
        let reresolve_delay = Duration::from_secs(env_u64("RERESOLVE_DELAY_SECS").unwrap_or(20));
        let startup_retry_delay =
            Duration::from_secs(env_u64("STARTUP_RETRY_DELAY_SECS").unwrap_or(15));
        let logout_cooldown = Duration::from_secs(env_u64("LOGOUT_COOLDOWN_SECS").unwrap_or(5));
        let stabilize_delay = Duration::from_secs(env_u64("STABILIZE_DELAY_SECS").unwrap_or(3));

        Ok(Self {
            bot_name,
            owner_name,
            owner_number,
            prefix,
            session_token,
            session_dir,
            env_file,
            data_dir,
            settings_file,
            failure_counter_file,
            gateway_path,
            broadcast_channel,
            auto_follow_channels,
            auto_join_groups,
            dedup_ttl,
            abuse_window,
            abuse_message_limit,
            max_timeout_retries,
            reconnect_delay,
            reresolve_delay,
            startup_retry_delay,
            logout_cooldown,
            stabilize_delay,
            auto_read_override: env_bool("AUTO_READ"),
            auto_react_override: env_bool("AUTO_REACT"),
            auto_typing_override: env_bool("AUTO_TYPING"),
            auto_recording_override: env_bool("AUTO_RECORDING"),
            reaction_emoji_override: env_str("REACTION_EMOJI").and_then(non_empty),
            test_mode: env_bool("TEST_MODE_ONLY").unwrap_or(false),
        })
    }

    /// The owner's direct-user address.
    pub fn owner_jid(&self) -> Jid {
        Jid::user(&self.owner_number)
    }
}

pub fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn which_in_path(binary: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    for dir in env::split_paths(&path) {
        let candidate = dir.join(binary);
        if is_executable_file(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable_file(p: &Path) -> bool {
    if !p.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(md) = fs::metadata(p) {
            return (md.permissions().mode() & 0o111) != 0;
        }
    }
    true
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.trim().to_string())
    }
}
