//! Session manager: owns the transport connection and the lifecycle state
//! machine.
//!
//! Recovery policy: timeouts retry with a fixed delay up to a durable
//! ceiling; permanent invalidation wipes credentials and exits so the
//! supervisor restarts the process fresh; anything else schedules a full
//! re-resolution cycle. Unexpected startup failures restart after a delay
//! rather than crash-looping.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    counter::FailureCounter,
    credentials,
    dispatch::{Dispatcher, PipelineHooks},
    errors::Error,
    registry::CommandRegistry,
    settings::SettingsStore,
    state::{ConnectionPhase, SharedState},
    transport::{CloseCode, Credential, TransportEvent, TransportPort, UpsertKind},
    Result,
};

/// Why `run` returned without an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    /// Shutdown signal; transport closed gracefully.
    Graceful,
    /// TEST_MODE_ONLY: registries loaded, connection intentionally skipped.
    TestModeSkip,
}

enum DriveOutcome {
    /// Timeout below the ceiling: reconnect with the same credential.
    Reconnect,
    /// Generic transient close: run the full resolve-and-connect cycle again.
    FullRestart,
    /// Operator shutdown.
    Shutdown,
}

enum Step {
    Resolve,
    Connect,
}

pub struct SessionManager {
    cfg: Arc<Config>,
    transport: Arc<dyn TransportPort>,
    settings: Arc<SettingsStore>,
    state: Arc<SharedState>,
    public: Arc<CommandRegistry>,
    owner: Arc<CommandRegistry>,
    hooks: PipelineHooks,
    shutdown: CancellationToken,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<Config>,
        transport: Arc<dyn TransportPort>,
        settings: Arc<SettingsStore>,
        state: Arc<SharedState>,
        public: Arc<CommandRegistry>,
        owner: Arc<CommandRegistry>,
        hooks: PipelineHooks,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            transport,
            settings,
            state,
            public,
            owner,
            hooks,
            shutdown,
        }
    }

    /// Drive the connection until shutdown or a fatal condition. Fatal
    /// conditions come back as `Err`; the binary maps them to exit code 1.
    pub async fn run(&self) -> Result<ExitStatus> {
        if self.cfg.test_mode {
            info!(
                "test mode: {} public / {} owner commands loaded, skipping transport connection",
                self.public.len(),
                self.owner.len()
            );
            return Ok(ExitStatus::TestModeSkip);
        }

        let counter = FailureCounter::load(&self.cfg.failure_counter_file);
        if counter.count > 0 {
            info!("restored timeout retry count: {}", counter.count);
        }
        self.state
            .seed_timeouts(counter.count, counter.last_error_timestamp)
            .await;

        // The dispatcher (and its dedup/rate windows) outlives reconnects so
        // a redelivered message after a transient close still deduplicates.
        let dispatcher = Arc::new(Dispatcher::new(
            self.cfg.clone(),
            self.transport.clone(),
            self.state.clone(),
            self.settings.clone(),
            self.public.clone(),
            self.owner.clone(),
            self.hooks.clone(),
        ));

        let mut credential: Option<Credential> = None;
        let mut step = Step::Resolve;

        loop {
            if self.shutdown.is_cancelled() {
                self.state.set_phase(ConnectionPhase::Idle).await;
                return Ok(ExitStatus::Graceful);
            }

            match step {
                Step::Resolve => {
                    self.state.set_phase(ConnectionPhase::Resolving).await;
                    if credentials::purge_incomplete_session(&self.cfg) {
                        sleep(self.cfg.stabilize_delay).await;
                    }
                    match credentials::resolve(&self.cfg) {
                        Ok(c) => {
                            credential = Some(c);
                            step = Step::Connect;
                        }
                        Err(e) => {
                            // Configuration/credential failures cannot be
                            // retried from here; cool down and surface them.
                            error!("credential resolution failed: {e}");
                            sleep(self.cfg.logout_cooldown).await;
                            self.state.set_phase(ConnectionPhase::Idle).await;
                            return Err(e);
                        }
                    }
                }
                Step::Connect => {
                    let Some(cred) = credential.clone() else {
                        step = Step::Resolve;
                        continue;
                    };
                    self.state.set_phase(ConnectionPhase::Connecting).await;

                    let events = match self.transport.connect(cred.clone()).await {
                        Ok(events) => events,
                        Err(e) => {
                            warn!(
                                "connection attempt failed: {e}; retrying in {:?}",
                                self.cfg.startup_retry_delay
                            );
                            sleep(self.cfg.startup_retry_delay).await;
                            step = Step::Resolve;
                            continue;
                        }
                    };

                    if let Credential::PairingFlow { phone } = &cred {
                        self.present_pairing_code(phone).await;
                    }

                    match self.drive(events, &dispatcher).await? {
                        DriveOutcome::Reconnect => step = Step::Connect,
                        DriveOutcome::FullRestart => step = Step::Resolve,
                        DriveOutcome::Shutdown => {
                            self.state.set_phase(ConnectionPhase::Idle).await;
                            return Ok(ExitStatus::Graceful);
                        }
                    }
                }
            }
        }
    }

    /// Consume lifecycle + message events until the connection closes.
    async fn drive(
        &self,
        mut events: mpsc::Receiver<TransportEvent>,
        dispatcher: &Arc<Dispatcher>,
    ) -> Result<DriveOutcome> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown signal received, closing transport");
                    if let Err(e) = self.transport.close().await {
                        warn!("graceful close failed: {e}");
                    }
                    return Ok(DriveOutcome::Shutdown);
                }
                ev = events.recv() => {
                    let Some(ev) = ev else {
                        warn!("transport event stream ended, scheduling full reconnect");
                        self.state.set_phase(ConnectionPhase::ClosingTransient).await;
                        sleep(self.cfg.reresolve_delay).await;
                        return Ok(DriveOutcome::FullRestart);
                    };
                    match ev {
                        TransportEvent::Open { self_jid } => self.on_open(self_jid).await,
                        TransportEvent::Messages { kind: UpsertKind::Notify, messages } => {
                            for msg in messages {
                                let d = dispatcher.clone();
                                tokio::spawn(async move { d.dispatch(msg).await });
                            }
                        }
                        TransportEvent::Messages { kind: UpsertKind::History, messages } => {
                            debug!("skipping {} historical sync messages", messages.len());
                        }
                        TransportEvent::Closed { code } => return self.on_close(code).await,
                    }
                }
            }
        }
    }

    async fn on_open(&self, self_jid: crate::domain::Jid) {
        self.state.mark_open().await;
        FailureCounter::delete(&self.cfg.failure_counter_file);
        info!("connected as {self_jid}");

        if self.state.claim_announcement().await {
            let cfg = self.cfg.clone();
            let transport = self.transport.clone();
            let settings = self.settings.clone();
            tokio::spawn(async move {
                let mode = settings.bot_mode().await;
                let text = build_announcement(&cfg, mode.label());
                if let Err(e) = transport.send_text(&self_jid, &text).await {
                    warn!("could not send connection announcement: {e}");
                }

                // Best-effort auto-joins; one failure never blocks the rest.
                for channel in &cfg.auto_follow_channels {
                    sleep(std::time::Duration::from_secs(1)).await;
                    match transport.follow_channel(channel).await {
                        Ok(()) => info!("followed channel {channel}"),
                        Err(e) => warn!("channel follow failed for {channel}: {e}"),
                    }
                }
                for code in &cfg.auto_join_groups {
                    sleep(std::time::Duration::from_secs(1)).await;
                    match transport.accept_group_invite(code).await {
                        Ok(()) => info!("accepted group invite {code}"),
                        Err(e) => warn!("group invite failed for {code}: {e}"),
                    }
                }
            });
        }
    }

    async fn on_close(&self, code: CloseCode) -> Result<DriveOutcome> {
        if code.is_permanent() {
            self.state.set_phase(ConnectionPhase::ClosingPermanent).await;
            error!("session permanently invalidated ({code:?}), wiping credentials");
            credentials::clear_session(&self.cfg);
            self.state.reset_timeouts().await;
            sleep(self.cfg.logout_cooldown).await;
            self.state.set_phase(ConnectionPhase::Idle).await;
            // Never retried: the supervisor restarts us into a fresh login.
            return Err(Error::Credential(
                "session logged out; a fresh login is required".to_string(),
            ));
        }

        match code {
            CloseCode::ConnectionTimeout => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                let streak = self.state.mark_timeout(now_ms).await;
                let counter = FailureCounter {
                    count: streak,
                    last_error_timestamp: now_ms,
                };
                if let Err(e) = counter.save(&self.cfg.failure_counter_file) {
                    warn!("failed to persist failure counter: {e}");
                }
                warn!(
                    "connection timeout ({streak}/{})",
                    self.cfg.max_timeout_retries
                );

                if streak >= self.cfg.max_timeout_retries {
                    error!("timeout retry ceiling reached, exiting to break the restart loop");
                    FailureCounter::delete(&self.cfg.failure_counter_file);
                    self.state.reset_timeouts().await;
                    sleep(self.cfg.logout_cooldown).await;
                    return Err(Error::Transport(
                        "connection timeout retry ceiling reached".to_string(),
                    ));
                }

                sleep(self.cfg.reconnect_delay).await;
                Ok(DriveOutcome::Reconnect)
            }
            CloseCode::Other(status) => {
                self.state.set_phase(ConnectionPhase::ClosingTransient).await;
                warn!("connection closed (status {status}), scheduling full reconnect");
                sleep(self.cfg.reresolve_delay).await;
                Ok(DriveOutcome::FullRestart)
            }
            // Permanent codes are handled above.
            CloseCode::LoggedOut | CloseCode::Unauthorized => unreachable!(),
        }
    }

    async fn present_pairing_code(&self, phone: &str) {
        // Give the socket a moment to stabilize before asking.
        sleep(self.cfg.stabilize_delay).await;
        match self.transport.request_pairing_code(phone).await {
            Ok(code) => {
                let pretty = format_pairing_code(&code);
                info!("pairing code: {pretty}");
                println!("\nYour pairing code: {pretty}");
                println!("Open the app, go to Linked Devices and enter the code above.\n");
            }
            Err(e) => warn!("failed to get pairing code: {e}"),
        }
    }
}

/// Group a raw pairing code into dash-separated blocks of four.
fn format_pairing_code(code: &str) -> String {
    let cleaned: String = code.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if cleaned.is_empty() {
        return code.to_string();
    }
    cleaned
        .as_bytes()
        .chunks(4)
        .map(|c| String::from_utf8_lossy(c).to_string())
        .collect::<Vec<_>>()
        .join("-")
}

fn build_announcement(cfg: &Config, mode: &str) -> String {
    let time = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    format!(
        "{} connected!\n\n\
         Prefix: {}\n\
         Mode: {}\n\
         Platform: {}\n\
         Owner: {}\n\
         Time: {}\n\n\
         Type {}menu to see all commands.",
        cfg.bot_name,
        cfg.prefix,
        mode,
        detect_platform(),
        cfg.owner_name,
        time,
        cfg.prefix
    )
}

fn detect_platform() -> String {
    if std::env::var_os("DYNO").is_some() {
        return "heroku".to_string();
    }
    if std::env::var_os("RENDER").is_some() {
        return "render".to_string();
    }
    if std::env::var_os("LXC").is_some() {
        return "linux container".to_string();
    }
    std::env::consts::OS.to_string()
}
