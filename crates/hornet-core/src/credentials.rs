//! Credential resolution.
//!
//! Decides how the session obtains its stored authentication material, in
//! strict precedence order: externally supplied encoded token, previously
//! persisted local store, interactive pairing/token entry. The credential
//! blob itself is opaque; only the transport can interpret it.

use std::{
    fs,
    io::{self, BufRead, IsTerminal, Write},
    path::PathBuf,
};

use base64::Engine;
use regex::Regex;
use tracing::{info, warn};

use crate::{
    config::{digits_only, Config},
    counter::FailureCounter,
    errors::Error,
    transport::Credential,
    Result,
};

/// Required format marker for externally supplied tokens. A token must start
/// with the prefix; the base64 payload follows the separator.
pub const TOKEN_PREFIX: &str = "HORNET";
pub const TOKEN_MARKER: &str = "HORNET:~";

const CREDS_FILE: &str = "creds.json";
const LOGIN_FILE: &str = "login.json";

pub fn creds_path(cfg: &Config) -> PathBuf {
    cfg.session_dir.join(CREDS_FILE)
}

fn login_path(cfg: &Config) -> PathBuf {
    cfg.session_dir.join(LOGIN_FILE)
}

/// Presence of the credential material alone determines "session exists".
pub fn session_exists(cfg: &Config) -> bool {
    creds_path(cfg).exists()
}

/// Wipe all local credential state, including the failure counter.
pub fn clear_session(cfg: &Config) {
    info!("clearing session directory");
    if cfg.session_dir.exists() {
        if let Err(e) = fs::remove_dir_all(&cfg.session_dir) {
            warn!("failed to remove session directory: {e}");
        }
    }
    FailureCounter::delete(&cfg.failure_counter_file);
}

/// Purge an inconsistent on-disk state: a session directory that exists but
/// lacks a complete credential file must never be handed to the transport.
/// Returns true when a purge happened (callers pause briefly afterwards).
pub fn purge_incomplete_session(cfg: &Config) -> bool {
    if cfg.session_dir.exists() && !session_exists(cfg) {
        warn!("incomplete session files detected, cleaning up");
        clear_session(cfg);
        return true;
    }
    false
}

#[derive(serde::Serialize, serde::Deserialize)]
struct LoginRecord {
    method: String,
}

fn save_login_method(cfg: &Config, method: &str) -> Result<()> {
    fs::create_dir_all(&cfg.session_dir)?;
    let record = LoginRecord {
        method: method.to_string(),
    };
    fs::write(login_path(cfg), serde_json::to_string_pretty(&record)?)?;
    Ok(())
}

fn load_login_method(cfg: &Config) -> Option<String> {
    let raw = fs::read_to_string(login_path(cfg)).ok()?;
    let record: LoginRecord = serde_json::from_str(&raw).ok()?;
    Some(record.method)
}

/// A token is well-formed when it starts with the prefix and carries a
/// non-empty payload after the marker.
pub fn token_payload(token: &str) -> Option<&str> {
    let token = token.trim();
    if !token.starts_with(TOKEN_PREFIX) {
        return None;
    }
    match token.split_once(TOKEN_MARKER) {
        Some((_, payload)) if !payload.is_empty() => Some(payload),
        _ => None,
    }
}

/// Decode the token payload into the credential file.
fn materialize_token(cfg: &Config, token: &str) -> Result<()> {
    let payload = token_payload(token)
        .ok_or_else(|| Error::Credential("token is missing its payload marker".to_string()))?;
    let blob = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::Credential(format!("token payload is not valid base64: {e}")))?;
    fs::create_dir_all(&cfg.session_dir)?;
    fs::write(creds_path(cfg), blob)?;
    info!("session credential saved from external token");
    Ok(())
}

/// Remove the `SESSION_ID=` value from the env file, keeping the key so the
/// operator can paste a corrected token. Best-effort: a read-only env file
/// is reported but does not mask the original error.
fn scrub_env_token(cfg: &Config) {
    let Ok(contents) = fs::read_to_string(&cfg.env_file) else {
        return;
    };
    let scrubbed: Vec<String> = contents
        .lines()
        .map(|line| {
            if line.trim_start().starts_with("SESSION_ID=") {
                "SESSION_ID=".to_string()
            } else {
                line.to_string()
            }
        })
        .collect();
    if let Err(e) = fs::write(&cfg.env_file, scrubbed.join("\n") + "\n") {
        warn!("failed to scrub SESSION_ID from env file: {e}");
    } else {
        info!("scrubbed malformed SESSION_ID from env file");
    }
}

/// E.164-like: 7..=15 digits, no leading zero.
pub fn validate_phone(input: &str) -> Option<String> {
    let digits = digits_only(input);
    let re = Regex::new("^[1-9][0-9]{6,14}$").ok()?;
    if re.is_match(&digits) {
        Some(digits)
    } else {
        None
    }
}

/// Resolve the credential for this startup.
///
/// Precedence: (1) external token from the environment, (2) persisted local
/// store, (3) interactive entry. A present-but-malformed external token is a
/// fatal configuration error: it is scrubbed from the env file and never
/// silently falls through.
pub fn resolve(cfg: &Config) -> Result<Credential> {
    // 1. External token.
    if let Some(token) = cfg.session_token.as_deref() {
        if token_payload(token).is_none() {
            scrub_env_token(cfg);
            return Err(Error::Credential(format!(
                "SESSION_ID is malformed: it must start with \"{TOKEN_PREFIX}\" and carry a \
                 \"{TOKEN_MARKER}\" payload; the value was scrubbed, set a valid token and restart"
            )));
        }
        // A fresh token always replaces whatever store exists.
        clear_session(cfg);
        materialize_token(cfg, token)?;
        save_login_method(cfg, Credential::ExternalToken.origin_tag())?;
        return Ok(Credential::ExternalToken);
    }

    // 2. Persisted local store, only when the method record matches it.
    if session_exists(cfg) {
        if load_login_method(cfg).is_some() {
            info!("reusing persisted session store");
            return Ok(Credential::LocalStore);
        }
        warn!("session store has no login record, purging for a clean re-login");
        clear_session(cfg);
    } else if login_path(cfg).exists() {
        // Stale preference without credentials: remove it before prompting.
        let _ = fs::remove_file(login_path(cfg));
    }

    // 3. Interactive resolution.
    if !io::stdin().is_terminal() {
        return Err(Error::Credential(
            "no credential available and stdin is not interactive".to_string(),
        ));
    }
    let credential = prompt_login_method(cfg)?;
    save_login_method(cfg, credential.origin_tag())?;
    Ok(credential)
}

fn prompt_login_method(cfg: &Config) -> Result<Credential> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        println!("Choose login method:");
        println!("  1) Enter phone number (pairing code)");
        println!("  2) Paste session token");
        print!("Enter option number (1 or 2): ");
        io::stdout().flush()?;

        let choice = match lines.next() {
            Some(line) => line?,
            None => {
                return Err(Error::Credential(
                    "stdin closed during interactive login".to_string(),
                ))
            }
        };

        match choice.trim() {
            "1" => {
                print!("Enter your phone number (e.g. 254700000001): ");
                io::stdout().flush()?;
                let raw = match lines.next() {
                    Some(line) => line?,
                    None => continue,
                };
                match validate_phone(&raw) {
                    Some(phone) => return Ok(Credential::PairingFlow { phone }),
                    None => {
                        println!("Invalid phone number.");
                        continue;
                    }
                }
            }
            "2" => {
                print!("Paste your session token: ");
                io::stdout().flush()?;
                let token = match lines.next() {
                    Some(line) => line?,
                    None => continue,
                };
                if !token.contains(TOKEN_MARKER) {
                    return Err(Error::Credential(format!(
                        "invalid session token: must contain \"{TOKEN_MARKER}\""
                    )));
                }
                materialize_token(cfg, token.trim())?;
                return Ok(Credential::ExternalToken);
            }
            _ => {
                println!("Invalid option, choose 1 or 2.");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{config as test_config, tmp_dir};

    #[test]
    fn token_payload_requires_prefix_and_marker() {
        assert_eq!(token_payload("HORNET:~abcd"), Some("abcd"));
        assert_eq!(token_payload("  HORNET:~abcd  "), Some("abcd"));
        assert!(token_payload("WASP:~abcd").is_none());
        assert!(token_payload("HORNET").is_none());
        assert!(token_payload("HORNET:~").is_none());
    }

    #[test]
    fn phone_validation_is_e164_like() {
        assert_eq!(
            validate_phone("+254 700-000-001"),
            Some("254700000001".to_string())
        );
        assert!(validate_phone("012345678").is_none()); // leading zero
        assert!(validate_phone("12345").is_none()); // too short
        assert!(validate_phone("1234567890123456").is_none()); // too long
    }

    #[test]
    fn malformed_env_token_is_fatal_and_scrubbed() {
        let root = tmp_dir("hornet-cred-malformed");
        let mut cfg = test_config(&root);
        std::fs::write(&cfg.env_file, "OWNER_NUMBER=1\nSESSION_ID=garbage\n").unwrap();
        cfg.session_token = Some("garbage".to_string());

        let err = resolve(&cfg).unwrap_err();
        assert!(matches!(err, Error::Credential(_)));

        let env = std::fs::read_to_string(&cfg.env_file).unwrap();
        assert!(env.contains("SESSION_ID=\n"));
        assert!(env.contains("OWNER_NUMBER=1"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn valid_env_token_materializes_credentials() {
        let root = tmp_dir("hornet-cred-token");
        let mut cfg = test_config(&root);
        let payload = base64::engine::general_purpose::STANDARD.encode(b"{\"noise\":1}");
        cfg.session_token = Some(format!("{TOKEN_MARKER}{payload}"));

        let cred = resolve(&cfg).unwrap();
        assert_eq!(cred, Credential::ExternalToken);
        assert!(session_exists(&cfg));
        assert_eq!(
            std::fs::read(creds_path(&cfg)).unwrap(),
            b"{\"noise\":1}".to_vec()
        );

        // A restart with no env token now reuses the store.
        cfg.session_token = None;
        assert_eq!(resolve(&cfg).unwrap(), Credential::LocalStore);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn incomplete_store_is_purged() {
        let root = tmp_dir("hornet-cred-incomplete");
        let cfg = test_config(&root);
        std::fs::create_dir_all(&cfg.session_dir).unwrap();
        std::fs::write(cfg.session_dir.join("keys.json"), "{}").unwrap();

        assert!(purge_incomplete_session(&cfg));
        assert!(!cfg.session_dir.exists());
        assert!(!purge_incomplete_session(&cfg));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn store_without_login_record_is_purged_on_resolve() {
        let root = tmp_dir("hornet-cred-norecord");
        let cfg = test_config(&root);
        std::fs::create_dir_all(&cfg.session_dir).unwrap();
        std::fs::write(creds_path(&cfg), "{}").unwrap();

        // Non-interactive: after the purge there is nothing left to resolve.
        let err = resolve(&cfg).unwrap_err();
        assert!(matches!(err, Error::Credential(_)));
        assert!(!session_exists(&cfg));

        let _ = std::fs::remove_dir_all(&root);
    }
}
