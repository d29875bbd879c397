//! Inbound message dispatch pipeline.
//!
//! Every event runs the same ordered steps: dedup, abuse-rate check, ambient
//! automation, identity normalization, archive/revocation, content
//! classification, group moderation fan-out, command routing, conversational
//! fallback. Only dedup may reject an event outright; everything downstream
//! isolates its own failures.

use std::{collections::HashMap, sync::Arc, time::Instant};

use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    config::{digits_only, Config},
    domain::Jid,
    errors::Error,
    hooks::{ChatResponder, MessageArchive, ModerationHook},
    registry::{CommandContext, CommandRegistry},
    settings::{BotMode, Settings, SettingsStore},
    state::SharedState,
    transport::{ContentVariant, InboundMessage, Presence, TransportPort},
    windows::{DedupWindow, RateWindow},
};

const REACTION_POOL: &[&str] = &["❤️", "😍", "😊", "👍", "🔥", "💯", "😎", "🤩"];

const DENYLIST_WORDS: &[&str] = &[
    "fuck", "shit", "damn", "bitch", "asshole", "bastard", "idiot", "stupid",
];

/// Collaborators plugged into the pipeline.
#[derive(Clone)]
pub struct PipelineHooks {
    pub archive: Arc<dyn MessageArchive>,
    pub moderation: Vec<Arc<dyn ModerationHook>>,
    pub chat: Option<Arc<dyn ChatResponder>>,
}

pub struct Dispatcher {
    cfg: Arc<Config>,
    transport: Arc<dyn TransportPort>,
    state: Arc<SharedState>,
    settings: Arc<SettingsStore>,
    public: Arc<CommandRegistry>,
    owner: Arc<CommandRegistry>,
    hooks: PipelineHooks,
    dedup: Mutex<DedupWindow>,
    rate: Mutex<RateWindow>,
    quick_replies: HashMap<String, String>,
}

impl Dispatcher {
    pub fn new(
        cfg: Arc<Config>,
        transport: Arc<dyn TransportPort>,
        state: Arc<SharedState>,
        settings: Arc<SettingsStore>,
        public: Arc<CommandRegistry>,
        owner: Arc<CommandRegistry>,
        hooks: PipelineHooks,
    ) -> Self {
        let dedup = Mutex::new(DedupWindow::new(cfg.dedup_ttl));
        let rate = Mutex::new(RateWindow::new(cfg.abuse_window));
        Self {
            cfg,
            transport,
            state,
            settings,
            public,
            owner,
            hooks,
            dedup,
            rate,
            quick_replies: builtin_quick_replies(),
        }
    }

    /// Run the full pipeline for one inbound event. Never fails: every step
    /// downgrades its own errors to logs (plus a user-facing notice where
    /// the step defines one).
    pub async fn dispatch(&self, mut msg: InboundMessage) {
        // Dedup insertion must happen before any side-effecting step.
        if !self
            .dedup
            .lock()
            .await
            .insert(msg.id.clone(), Instant::now())
        {
            return;
        }

        let settings = self.settings.snapshot().await;

        // Abuse-rate check, non-self senders only.
        if !msg.from_self {
            let count = self.rate.lock().await.record(&msg.sender, Instant::now());
            if count > self.cfg.abuse_message_limit {
                if settings.abuse_protection {
                    self.block_flooder(&msg, count).await;
                    return;
                }
                warn!(
                    "flood from {} ({count} messages in window) but abuse protection is off",
                    msg.sender
                );
            }
        }

        // Ambient automation: fire-and-continue, isolated per task.
        if !msg.from_self {
            self.spawn_ambient(&msg, &settings);
        }

        // Linked-device aliases collapse to the canonical direct form.
        msg.conversation = msg.conversation.canonical();
        msg.sender = msg.sender.canonical();

        // Revocation notices route to the archive collaborator and stop here.
        if let ContentVariant::Revocation { target } = msg.content.clone() {
            if let Err(e) = self
                .hooks
                .archive
                .on_revocation(&msg, &target, self.transport.clone())
                .await
            {
                warn!("revocation handling failed: {e}");
            }
            return;
        }
        if let Err(e) = self.hooks.archive.store(&msg).await {
            warn!("message archive store failed: {e}");
        }

        let Some(body) = self.classify(&msg).await else {
            return;
        };

        debug!(
            "[{}] {}: {}",
            if msg.conversation.is_group() { "group" } else { "dm" },
            msg.sender.bare(),
            body
        );

        if msg.conversation.is_group() && !msg.from_self {
            self.run_moderation(&msg, &body, &settings).await;
        }

        if let Some(rest) = body.strip_prefix(&self.cfg.prefix) {
            self.route_command(&msg, rest, &settings).await;
        } else if !msg.from_self {
            if let Some(chat) = &self.hooks.chat {
                if let Err(e) = chat.respond(&msg, &body, self.transport.clone()).await {
                    warn!("chat responder failed: {e}");
                }
            }
        }
    }

    // ============== Step 2: flood blocking ==============

    async fn block_flooder(&self, msg: &InboundMessage, count: usize) {
        warn!("blocking {} for {count} messages inside the abuse window", msg.sender);

        if let Err(e) = self.transport.block(&msg.sender).await {
            warn!("failed to block {}: {e}", msg.sender);
        }
        if msg.conversation.is_group() {
            let text = format!(
                "Flood protection: blocked {} for sending {count} messages in under a second.",
                msg.sender.bare()
            );
            if let Err(e) = self.transport.send_text(&msg.conversation, &text).await {
                warn!("failed to announce flood block: {e}");
            }
        }
        self.rate.lock().await.clear(&msg.sender);
    }

    // ============== Step 3: ambient automation ==============

    fn spawn_ambient(&self, msg: &InboundMessage, settings: &Settings) {
        if settings.auto_read {
            let transport = self.transport.clone();
            let to = msg.conversation.clone();
            let ids = vec![msg.id.clone()];
            tokio::spawn(async move {
                if let Err(e) = transport.read_receipts(&to, &ids).await {
                    debug!("auto read receipt failed: {e}");
                }
            });
        }

        if settings.auto_react {
            let emoji = if settings.reaction_emoji.is_empty() {
                let idx = rand::thread_rng().gen_range(0..REACTION_POOL.len());
                REACTION_POOL[idx].to_string()
            } else {
                settings.reaction_emoji.clone()
            };
            let transport = self.transport.clone();
            let to = msg.conversation.clone();
            let id = msg.id.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.react(&to, &id, &emoji).await {
                    debug!("auto reaction failed: {e}");
                }
            });
        }

        if settings.auto_typing {
            self.spawn_presence_pulse(msg, Presence::Composing, std::time::Duration::from_secs(2));
        }
        if settings.auto_recording {
            self.spawn_presence_pulse(msg, Presence::Recording, std::time::Duration::from_secs(3));
        }
    }

    fn spawn_presence_pulse(
        &self,
        msg: &InboundMessage,
        kind: Presence,
        hold: std::time::Duration,
    ) {
        let transport = self.transport.clone();
        let to = msg.conversation.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.presence(&to, kind).await {
                debug!("presence pulse failed: {e}");
                return;
            }
            tokio::time::sleep(hold).await;
            if let Err(e) = transport.presence(&to, Presence::Paused).await {
                debug!("presence reset failed: {e}");
            }
        });
    }

    // ============== Step 6: content classification ==============

    /// Map the content variant to a command-routable text body. Returns None
    /// for anything that should not continue down the pipeline.
    async fn classify(&self, msg: &InboundMessage) -> Option<String> {
        let body = match &msg.content {
            ContentVariant::Text { text }
            | ContentVariant::ExtendedText { text }
            | ContentVariant::ContextText { text } => text.clone(),
            ContentVariant::ImageCaption { caption }
            | ContentVariant::VideoCaption { caption } => caption.clone(),
            ContentVariant::QuickReply { id } => {
                if id.starts_with(&self.cfg.prefix) {
                    id.clone()
                } else {
                    // Static response table; unmatched ids are silently ignored.
                    if let Some(text) = self.quick_replies.get(id.as_str()) {
                        if let Err(e) = self.transport.send_text(&msg.conversation, text).await {
                            warn!("quick-reply response failed: {e}");
                        }
                    }
                    return None;
                }
            }
            ContentVariant::InteractiveReply { params_json } => {
                // Defensive parse; malformed payloads are dropped silently.
                let id = serde_json::from_str::<serde_json::Value>(params_json)
                    .ok()
                    .and_then(|v| v.get("id").and_then(|i| i.as_str()).map(String::from))?;
                if !id.starts_with(&self.cfg.prefix) {
                    return None;
                }
                id
            }
            ContentVariant::ListReply { id } => {
                if !id.starts_with(&self.cfg.prefix) {
                    return None;
                }
                id.clone()
            }
            ContentVariant::Revocation { .. } => return None, // handled upstream
            ContentVariant::Unsupported { kind } => {
                debug!("skipping unsupported message kind: {kind}");
                return None;
            }
        };

        if body.is_empty() {
            return None;
        }
        Some(body)
    }

    // ============== Step 7: group moderation ==============

    async fn run_moderation(&self, msg: &InboundMessage, body: &str, settings: &Settings) {
        for hook in &self.hooks.moderation {
            if let Err(e) = hook
                .on_group_message(msg, body, self.transport.clone())
                .await
            {
                warn!("moderation hook {} failed: {e}", hook.name());
            }
        }

        let guard_on = settings
            .badword_guard
            .get(msg.conversation.as_str())
            .copied()
            .unwrap_or(false);
        if guard_on {
            if let Err(e) = self.scan_denylist(msg, body).await {
                warn!("denylist scan failed: {e}");
            }
        }
    }

    async fn scan_denylist(&self, msg: &InboundMessage, body: &str) -> crate::Result<()> {
        let lower = body.to_lowercase();
        if !DENYLIST_WORDS.iter().any(|w| lower.contains(w)) {
            return Ok(());
        }

        let meta = self.transport.group_metadata(&msg.conversation).await?;
        let Some(self_jid) = self.transport.self_jid().await else {
            return Ok(());
        };
        // Warn only when the bot can moderate and the sender cannot.
        if meta.is_admin(&self_jid) && !meta.is_admin(&msg.sender) {
            let text = format!("@{} please watch your language!", msg.sender.bare());
            self.transport
                .send_text_mentioning(&msg.conversation, &text, &[msg.sender.clone()])
                .await?;
        }
        Ok(())
    }

    // ============== Step 8: command routing ==============

    async fn route_command(&self, msg: &InboundMessage, rest: &str, settings: &Settings) {
        let mut parts = rest.trim().split_whitespace();
        let Some(raw_name) = parts.next() else {
            let text = format!(
                "Empty command. Try {}menu for available commands.",
                self.cfg.prefix
            );
            self.notify(&msg.conversation, &text).await;
            return;
        };
        let name = raw_name.to_lowercase();
        let args: Vec<String> = parts.map(String::from).collect();

        // Reserved controls, accepted from the bot's own identity only.
        if msg.from_self && self.handle_reserved(msg, &name).await {
            return;
        }

        if !self.state.is_active().await {
            if msg.from_self {
                self.notify(&msg.conversation, "Bot is currently deactivated.")
                    .await;
            }
            return;
        }

        let is_owner =
            msg.from_self || digits_only(msg.sender.bare()) == self.cfg.owner_number;

        // Self-only mode drops outside commands, except in the designated
        // broadcast channel.
        if settings.bot_mode == BotMode::SelfOnly && !is_owner {
            let exempt = self.cfg.broadcast_channel.as_ref() == Some(&msg.conversation);
            if !exempt {
                return;
            }
        }

        let notice_target = if msg.from_self {
            msg.conversation.clone()
        } else {
            Jid::user(msg.sender.bare())
        };

        let record = match settings.bot_mode {
            BotMode::SelfOnly => {
                match self.public.lookup(&name).or_else(|| self.owner.lookup(&name)) {
                    Some(r) => r,
                    // Unmatched names in self mode stay silent.
                    None => return,
                }
            }
            BotMode::Public => match self.public.lookup(&name) {
                Some(r) => r,
                None => {
                    if self.owner.lookup(&name).is_some() {
                        let text = format!(
                            "Bot is in public mode; this command needs self mode. \
                             Use {}self to switch.",
                            self.cfg.prefix
                        );
                        self.notify(&notice_target, &text).await;
                    } else {
                        let text = format!(
                            "Unknown command: {name}\nTry {}menu for available commands.",
                            self.cfg.prefix
                        );
                        self.notify(&notice_target, &text).await;
                    }
                    return;
                }
            },
        };

        let ctx = CommandContext {
            transport: self.transport.clone(),
            settings: self.settings.clone(),
            state: self.state.clone(),
            args,
            is_owner,
            prefix: self.cfg.prefix.clone(),
        };

        if let Err(e) = record.handler.execute(msg, ctx).await {
            warn!("command {} failed: {e}", record.name);
            let text = failure_notice(&record.name, &e);
            self.notify(&msg.conversation, &text).await;
        }
    }

    /// Handle `on`/`off`/`public`/`self`; returns true when consumed.
    async fn handle_reserved(&self, msg: &InboundMessage, name: &str) -> bool {
        match name {
            "off" => {
                self.state.set_active(false).await;
                self.notify(&msg.conversation, "Bot deactivated.").await;
                true
            }
            "on" => {
                self.state.set_active(true).await;
                self.notify(&msg.conversation, "Bot activated.").await;
                true
            }
            "public" => {
                if let Err(e) = self.settings.update(|s| s.bot_mode = BotMode::Public).await {
                    warn!("failed to persist mode switch: {e}");
                }
                self.notify(
                    &msg.conversation,
                    "Switched to public mode. Everyone can use public commands.",
                )
                .await;
                true
            }
            "self" => {
                if let Err(e) = self
                    .settings
                    .update(|s| s.bot_mode = BotMode::SelfOnly)
                    .await
                {
                    warn!("failed to persist mode switch: {e}");
                }
                self.notify(
                    &msg.conversation,
                    "Switched to self mode. Only the owner can use commands.",
                )
                .await;
                true
            }
            _ => false,
        }
    }

    async fn notify(&self, to: &Jid, text: &str) {
        if let Err(e) = self.transport.send_text(to, text).await {
            info!("failed to send notice to {to}: {e}");
        }
    }
}

// ============== Handler failure classification ==============

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FailureClass {
    Timeout,
    Network,
    Permission,
    Generic,
}

fn classify_failure(err: &Error) -> FailureClass {
    let text = err.to_string().to_lowercase();
    if text.contains("timeout") || text.contains("timed out") {
        FailureClass::Timeout
    } else if text.contains("network") || text.contains("dns") || text.contains("connection refused")
    {
        FailureClass::Network
    } else if text.contains("permission") || text.contains("forbidden") {
        FailureClass::Permission
    } else {
        FailureClass::Generic
    }
}

fn failure_notice(command: &str, err: &Error) -> String {
    let detail = match classify_failure(err) {
        FailureClass::Timeout => "Request timed out. Try again in a moment.".to_string(),
        FailureClass::Network => "Network error. Check the connection.".to_string(),
        FailureClass::Permission => "Permission denied. Check the bot's permissions.".to_string(),
        FailureClass::Generic => format!("{err}"),
    };
    format!("Command error: {command}\n{detail}")
}

/// Static quick-reply response table. Selections that match neither this
/// table nor the command prefix are ignored.
fn builtin_quick_replies() -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert(
        "menu_basic".to_string(),
        "Basic tools: ping, dictionary, owner.".to_string(),
    );
    map.insert(
        "menu_group".to_string(),
        "Group tools are enabled automatically in group chats.".to_string(),
    );
    map.insert(
        "status_bot".to_string(),
        "The bot is online and listening.".to_string(),
    );
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;
    use crate::hooks::InMemoryArchive;
    use crate::registry::{CommandHandler, CommandTier, Descriptor, StandardDescriptor};
    use crate::transport::{Credential, GroupMetadata, TransportEvent};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    // ----- recording transport -----

    #[derive(Default)]
    struct MockTransport {
        sent: std::sync::Mutex<Vec<(Jid, String)>>,
        blocked: std::sync::Mutex<Vec<Jid>>,
        reactions: std::sync::Mutex<Vec<(Jid, MessageId, String)>>,
    }

    #[async_trait]
    impl TransportPort for MockTransport {
        async fn connect(
            &self,
            _credential: Credential,
        ) -> crate::Result<mpsc::Receiver<TransportEvent>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn send_text(&self, to: &Jid, text: &str) -> crate::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((to.clone(), text.to_string()));
            Ok(())
        }

        async fn send_text_mentioning(
            &self,
            to: &Jid,
            text: &str,
            _mentions: &[Jid],
        ) -> crate::Result<()> {
            self.send_text(to, text).await
        }

        async fn react(&self, to: &Jid, message: &MessageId, emoji: &str) -> crate::Result<()> {
            self.reactions
                .lock()
                .unwrap()
                .push((to.clone(), message.clone(), emoji.to_string()));
            Ok(())
        }

        async fn presence(&self, _to: &Jid, _presence: Presence) -> crate::Result<()> {
            Ok(())
        }

        async fn read_receipts(&self, _to: &Jid, _messages: &[MessageId]) -> crate::Result<()> {
            Ok(())
        }

        async fn block(&self, jid: &Jid) -> crate::Result<()> {
            self.blocked.lock().unwrap().push(jid.clone());
            Ok(())
        }

        async fn group_metadata(&self, _group: &Jid) -> crate::Result<GroupMetadata> {
            Ok(GroupMetadata::default())
        }

        async fn accept_group_invite(&self, _code: &str) -> crate::Result<()> {
            Ok(())
        }

        async fn follow_channel(&self, _channel: &Jid) -> crate::Result<()> {
            Ok(())
        }

        async fn request_pairing_code(&self, _phone: &str) -> crate::Result<String> {
            Ok("AAAA-BBBB".to_string())
        }

        async fn self_jid(&self) -> Option<Jid> {
            Some(Jid::user("254700000099"))
        }

        async fn close(&self) -> crate::Result<()> {
            Ok(())
        }
    }

    // ----- recording command -----

    #[derive(Default)]
    struct Recorder {
        calls: std::sync::Mutex<Vec<Vec<String>>>,
    }

    struct RecordingCommand(Arc<Recorder>);

    #[async_trait]
    impl CommandHandler for RecordingCommand {
        async fn execute(&self, _msg: &InboundMessage, ctx: CommandContext) -> crate::Result<()> {
            self.0.calls.lock().unwrap().push(ctx.args);
            Ok(())
        }
    }

    struct FailingCommand(&'static str);

    #[async_trait]
    impl CommandHandler for FailingCommand {
        async fn execute(&self, _msg: &InboundMessage, _ctx: CommandContext) -> crate::Result<()> {
            Err(Error::External(self.0.to_string()))
        }
    }

    // ----- fixture -----

    struct Fixture {
        dispatcher: Dispatcher,
        transport: Arc<MockTransport>,
        recorder: Arc<Recorder>,
        settings: Arc<SettingsStore>,
        #[allow(dead_code)]
        root: std::path::PathBuf,
    }

    fn registry_with(
        tier: CommandTier,
        name: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> CommandRegistry {
        let mut reg = CommandRegistry::new(tier);
        reg.register(Descriptor::Standard(StandardDescriptor {
            name: name.to_string(),
            category: "test".to_string(),
            aliases: vec![],
            handler,
        }));
        reg
    }

    async fn fixture() -> Fixture {
        let root = crate::testutil::tmp_dir("hornet-dispatch");
        let cfg = Arc::new(crate::testutil::config(&root));
        let transport = Arc::new(MockTransport::default());
        let state = Arc::new(SharedState::new());
        let settings = Arc::new(SettingsStore::load(cfg.settings_file.clone()));

        let recorder = Arc::new(Recorder::default());
        let public = registry_with(
            CommandTier::Public,
            "dict",
            Arc::new(RecordingCommand(recorder.clone())),
        );
        let mut owner = registry_with(
            CommandTier::OwnerOnly,
            "status",
            Arc::new(RecordingCommand(recorder.clone())),
        );
        owner.register(Descriptor::Standard(StandardDescriptor {
            name: "boom".to_string(),
            category: "test".to_string(),
            aliases: vec![],
            handler: Arc::new(FailingCommand("request timeout while fetching")),
        }));

        let dispatcher = Dispatcher::new(
            cfg,
            transport.clone(),
            state,
            settings.clone(),
            Arc::new(public),
            Arc::new(owner),
            PipelineHooks {
                archive: Arc::new(InMemoryArchive::new(64)),
                moderation: vec![],
                chat: None,
            },
        );

        Fixture {
            dispatcher,
            transport,
            recorder,
            settings,
            root,
        }
    }

    fn text_msg(id: &str, sender: &str, body: &str) -> InboundMessage {
        InboundMessage {
            id: MessageId(id.to_string()),
            conversation: Jid::user(sender),
            sender: Jid::user(sender),
            from_self: false,
            content: ContentVariant::Text {
                text: body.to_string(),
            },
            timestamp: 0,
        }
    }

    fn self_msg(id: &str, body: &str) -> InboundMessage {
        InboundMessage {
            id: MessageId(id.to_string()),
            conversation: Jid::user("254700000099"),
            sender: Jid::user("254700000099"),
            from_self: true,
            content: ContentVariant::Text {
                text: body.to_string(),
            },
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn command_body_invokes_with_parsed_args() {
        let f = fixture().await;
        f.dispatcher
            .dispatch(text_msg("m1", "254700000333", "!dict hello"))
            .await;

        let calls = f.recorder.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![vec!["hello".to_string()]]);
    }

    #[tokio::test]
    async fn duplicate_id_produces_side_effects_once() {
        let f = fixture().await;
        let msg = text_msg("dup", "254700000333", "!dict once");
        f.dispatcher.dispatch(msg.clone()).await;
        f.dispatcher.dispatch(msg).await;

        assert_eq!(f.recorder.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_command_notifies_the_sender_directly() {
        let f = fixture().await;
        f.dispatcher
            .dispatch(text_msg("m2", "254700000333", "!zzz"))
            .await;

        let sent = f.transport.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Jid::user("254700000333"));
        assert!(sent[0].1.contains("Unknown command: zzz"));
    }

    #[tokio::test]
    async fn owner_tier_command_in_public_mode_suggests_mode_switch() {
        let f = fixture().await;
        f.dispatcher
            .dispatch(text_msg("m3", "254700000333", "!status"))
            .await;

        // Not executed, and not reported as unknown.
        assert!(f.recorder.calls.lock().unwrap().is_empty());
        let sent = f.transport.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("self mode"));
        assert!(!sent[0].1.contains("Unknown command"));
    }

    #[tokio::test]
    async fn self_mode_drops_non_owner_commands_silently() {
        let f = fixture().await;
        f.settings
            .update(|s| s.bot_mode = BotMode::SelfOnly)
            .await
            .unwrap();

        f.dispatcher
            .dispatch(text_msg("m4", "254700000333", "!dict hello"))
            .await;

        assert!(f.recorder.calls.lock().unwrap().is_empty());
        assert!(f.transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn self_mode_reaches_both_tiers_for_the_owner() {
        let f = fixture().await;
        f.settings
            .update(|s| s.bot_mode = BotMode::SelfOnly)
            .await
            .unwrap();

        // The configured owner number, not the bot itself.
        f.dispatcher
            .dispatch(text_msg("m5", "254700000001", "!status"))
            .await;

        assert_eq!(f.recorder.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reserved_controls_require_self_origin() {
        let f = fixture().await;

        // From a stranger, "off" is just an unknown command.
        f.dispatcher
            .dispatch(text_msg("m6", "254700000333", "!off"))
            .await;
        assert!(f.dispatcher.state.is_active().await);

        // From the bot itself it deactivates.
        f.dispatcher.dispatch(self_msg("m7", "!off")).await;
        assert!(!f.dispatcher.state.is_active().await);

        // While deactivated only self gets an acknowledgment.
        f.transport.sent.lock().unwrap().clear();
        f.dispatcher
            .dispatch(text_msg("m8", "254700000333", "!dict hi"))
            .await;
        assert!(f.transport.sent.lock().unwrap().is_empty());
        assert!(f.recorder.calls.lock().unwrap().is_empty());

        f.dispatcher.dispatch(self_msg("m9", "!dict hi")).await;
        let sent = f.transport.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("deactivated"));
    }

    #[tokio::test]
    async fn mode_switch_persists_through_settings() {
        let f = fixture().await;
        f.dispatcher.dispatch(self_msg("m10", "!self")).await;
        assert_eq!(f.settings.bot_mode().await, BotMode::SelfOnly);

        f.dispatcher.dispatch(self_msg("m11", "!public")).await;
        assert_eq!(f.settings.bot_mode().await, BotMode::Public);
    }

    #[tokio::test]
    async fn flood_blocks_only_when_protection_enabled() {
        let f = fixture().await;
        let sender = "254700000444";

        // Disabled (default): three fast messages, nobody blocked.
        for i in 0..3 {
            f.dispatcher
                .dispatch(text_msg(&format!("f{i}"), sender, "hello"))
                .await;
        }
        assert!(f.transport.blocked.lock().unwrap().is_empty());

        // Enabled: the third message in the window trips the block.
        f.settings
            .update(|s| s.abuse_protection = true)
            .await
            .unwrap();
        for i in 0..3 {
            f.dispatcher
                .dispatch(text_msg(&format!("g{i}"), sender, "hello"))
                .await;
        }
        let blocked = f.transport.blocked.lock().unwrap().clone();
        assert_eq!(blocked, vec![Jid::user(sender)]);
    }

    #[tokio::test]
    async fn handler_failures_surface_a_classified_notice() {
        let f = fixture().await;
        f.settings
            .update(|s| s.bot_mode = BotMode::SelfOnly)
            .await
            .unwrap();

        f.dispatcher.dispatch(self_msg("m12", "!boom")).await;

        let sent = f.transport.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Command error: boom"));
        assert!(sent[0].1.contains("timed out"));
    }

    #[tokio::test]
    async fn linked_alias_sender_is_canonicalized() {
        let f = fixture().await;
        let mut msg = text_msg("m13", "254700000333", "!zzz");
        msg.conversation = Jid::new("254700000333@alias");
        msg.sender = Jid::new("254700000333@alias");

        f.dispatcher.dispatch(msg).await;

        let sent = f.transport.sent.lock().unwrap().clone();
        assert_eq!(sent[0].0, Jid::user("254700000333"));
    }

    #[tokio::test]
    async fn non_prefix_quick_reply_consults_static_table_only() {
        let f = fixture().await;
        let mut msg = text_msg("m14", "254700000333", "");
        msg.content = ContentVariant::QuickReply {
            id: "menu_basic".to_string(),
        };
        f.dispatcher.dispatch(msg).await;

        let sent = f.transport.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Basic tools"));

        // Unmatched ids stay silent even when they look like words.
        let mut msg = text_msg("m15", "254700000333", "");
        msg.content = ContentVariant::QuickReply {
            id: "something_else".to_string(),
        };
        f.dispatcher.dispatch(msg).await;
        assert_eq!(f.transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_interactive_payload_is_dropped_silently() {
        let f = fixture().await;
        let mut msg = text_msg("m16", "254700000333", "");
        msg.content = ContentVariant::InteractiveReply {
            params_json: "{broken".to_string(),
        };
        f.dispatcher.dispatch(msg).await;

        assert!(f.transport.sent.lock().unwrap().is_empty());
        assert!(f.recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn interactive_payload_with_command_id_routes() {
        let f = fixture().await;
        let mut msg = text_msg("m17", "254700000333", "");
        msg.content = ContentVariant::InteractiveReply {
            params_json: r#"{"id":"!dict ping"}"#.to_string(),
        };
        f.dispatcher.dispatch(msg).await;

        let calls = f.recorder.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![vec!["ping".to_string()]]);
    }

    #[test]
    fn failure_classification_by_substring() {
        let timeout = Error::External("request timeout".into());
        let network = Error::External("network unreachable".into());
        let permission = Error::External("forbidden by group policy".into());
        let generic = Error::External("boom".into());

        assert_eq!(classify_failure(&timeout), FailureClass::Timeout);
        assert_eq!(classify_failure(&network), FailureClass::Network);
        assert_eq!(classify_failure(&permission), FailureClass::Permission);
        assert_eq!(classify_failure(&generic), FailureClass::Generic);
    }
}
