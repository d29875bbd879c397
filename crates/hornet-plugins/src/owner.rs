//! Owner-tier commands: connection status plus the runtime toggles.

use std::sync::Arc;

use async_trait::async_trait;

use hornet_core::{
    registry::{
        CommandContext, CommandHandler, Descriptor, DescriptorExport, StandardDescriptor,
    },
    settings::Settings,
    transport::InboundMessage,
    Result,
};

/// Everything the owner plugin directory exports.
pub fn owner_exports() -> Vec<DescriptorExport> {
    vec![
        DescriptorExport::One(status()),
        DescriptorExport::Named(vec![
            (
                "automation".to_string(),
                DescriptorExport::Many(vec![
                    DescriptorExport::One(toggle(
                        "autoread",
                        "read receipts",
                        |s| s.auto_read,
                        |s, v| s.auto_read = v,
                    )),
                    DescriptorExport::One(toggle(
                        "autoreact",
                        "auto reactions",
                        |s| s.auto_react,
                        |s, v| s.auto_react = v,
                    )),
                    DescriptorExport::One(toggle(
                        "autotyping",
                        "typing presence",
                        |s| s.auto_typing,
                        |s, v| s.auto_typing = v,
                    )),
                    DescriptorExport::One(toggle(
                        "autorecording",
                        "recording presence",
                        |s| s.auto_recording,
                        |s, v| s.auto_recording = v,
                    )),
                ]),
            ),
            (
                "guards".to_string(),
                DescriptorExport::Many(vec![
                    DescriptorExport::One(toggle(
                        "abuseguard",
                        "flood blocking",
                        |s| s.abuse_protection,
                        |s, v| s.abuse_protection = v,
                    )),
                    DescriptorExport::One(badwords()),
                ]),
            ),
        ]),
        DescriptorExport::One(setemoji()),
    ]
}

// ============== status ==============

struct Status;

#[async_trait]
impl CommandHandler for Status {
    async fn execute(&self, msg: &InboundMessage, ctx: CommandContext) -> Result<()> {
        let phase = ctx.state.phase().await;
        let timeouts = ctx.state.consecutive_timeouts().await;
        let settings = ctx.settings.snapshot().await;

        let text = format!(
            "Status\n\nConnection: {}\nMode: {}\nActive: {}\n\
             Timeout streak: {timeouts}\nFlood blocking: {}",
            phase.label(),
            settings.bot_mode.label(),
            if ctx.state.is_active().await { "yes" } else { "no" },
            if settings.abuse_protection { "on" } else { "off" },
        );
        ctx.transport.send_text(&msg.conversation, &text).await
    }
}

fn status() -> Descriptor {
    Descriptor::Standard(StandardDescriptor {
        name: "status".to_string(),
        category: "self".to_string(),
        aliases: vec!["state".to_string()],
        handler: Arc::new(Status),
    })
}

// ============== settings toggles ==============

struct Toggle {
    label: &'static str,
    read: fn(&Settings) -> bool,
    write: fn(&mut Settings, bool),
}

#[async_trait]
impl CommandHandler for Toggle {
    async fn execute(&self, msg: &InboundMessage, ctx: CommandContext) -> Result<()> {
        let text = match ctx.args.first().map(|s| s.as_str()) {
            Some("on") => {
                ctx.settings.update(|s| (self.write)(s, true)).await?;
                format!("Enabled {}.", self.label)
            }
            Some("off") => {
                ctx.settings.update(|s| (self.write)(s, false)).await?;
                format!("Disabled {}.", self.label)
            }
            _ => {
                let current = (self.read)(&ctx.settings.snapshot().await);
                format!(
                    "{} is {}. Use on/off to change it.",
                    self.label,
                    if current { "on" } else { "off" }
                )
            }
        };
        ctx.transport.send_text(&msg.conversation, &text).await
    }
}

fn toggle(
    name: &str,
    label: &'static str,
    read: fn(&Settings) -> bool,
    write: fn(&mut Settings, bool),
) -> Descriptor {
    Descriptor::Standard(StandardDescriptor {
        name: name.to_string(),
        category: "self".to_string(),
        aliases: vec![],
        handler: Arc::new(Toggle { label, read, write }),
    })
}

// ============== per-group badword guard ==============

struct Badwords;

#[async_trait]
impl CommandHandler for Badwords {
    async fn execute(&self, msg: &InboundMessage, ctx: CommandContext) -> Result<()> {
        if !msg.conversation.is_group() {
            return ctx
                .transport
                .send_text(&msg.conversation, "This command only works in groups.")
                .await;
        }

        let key = msg.conversation.as_str().to_string();
        let text = match ctx.args.first().map(|s| s.as_str()) {
            Some("on") => {
                ctx.settings
                    .update(|s| {
                        s.badword_guard.insert(key.clone(), true);
                    })
                    .await?;
                "Word guard enabled for this group.".to_string()
            }
            Some("off") => {
                ctx.settings
                    .update(|s| {
                        s.badword_guard.insert(key.clone(), false);
                    })
                    .await?;
                "Word guard disabled for this group.".to_string()
            }
            _ => {
                let on = ctx
                    .settings
                    .snapshot()
                    .await
                    .badword_guard
                    .get(&key)
                    .copied()
                    .unwrap_or(false);
                format!(
                    "Word guard is {} here. Use on/off to change it.",
                    if on { "on" } else { "off" }
                )
            }
        };
        ctx.transport.send_text(&msg.conversation, &text).await
    }
}

fn badwords() -> Descriptor {
    Descriptor::Standard(StandardDescriptor {
        name: "badwords".to_string(),
        category: "self".to_string(),
        aliases: vec!["antibadword".to_string()],
        handler: Arc::new(Badwords),
    })
}

// ============== reaction emoji ==============

struct SetEmoji;

#[async_trait]
impl CommandHandler for SetEmoji {
    async fn execute(&self, msg: &InboundMessage, ctx: CommandContext) -> Result<()> {
        let text = match ctx.args.first().map(|s| s.as_str()) {
            Some("random") => {
                ctx.settings
                    .update(|s| s.reaction_emoji = String::new())
                    .await?;
                "Auto reactions will use a random emoji.".to_string()
            }
            Some(emoji) => {
                let emoji = emoji.to_string();
                ctx.settings
                    .update(|s| s.reaction_emoji = emoji.clone())
                    .await?;
                format!("Auto reactions will use {emoji}.")
            }
            None => {
                let current = ctx.settings.snapshot().await.reaction_emoji;
                if current.is_empty() {
                    "Auto reactions use a random emoji.".to_string()
                } else {
                    format!("Auto reactions use {current}.")
                }
            }
        };
        ctx.transport.send_text(&msg.conversation, &text).await
    }
}

fn setemoji() -> Descriptor {
    Descriptor::Standard(StandardDescriptor {
        name: "setemoji".to_string(),
        category: "self".to_string(),
        aliases: vec![],
        handler: Arc::new(SetEmoji),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hornet_core::registry::{CommandRegistry, CommandTier};

    #[test]
    fn owner_exports_register_all_commands() {
        let reg = CommandRegistry::load(CommandTier::OwnerOnly, owner_exports());

        for name in [
            "status",
            "autoread",
            "autoreact",
            "autotyping",
            "autorecording",
            "abuseguard",
            "badwords",
            "setemoji",
        ] {
            assert!(reg.lookup(name).is_some(), "missing command: {name}");
        }
        assert!(Arc::ptr_eq(
            &reg.lookup("badwords").unwrap(),
            &reg.lookup("antibadword").unwrap()
        ));
    }

    #[test]
    fn public_exports_register_all_commands() {
        let reg = CommandRegistry::load(CommandTier::Public, crate::public_exports());

        for name in ["ping", "dictionary", "owner", "menu", "say"] {
            assert!(reg.lookup(name).is_some(), "missing command: {name}");
        }
        // Legacy descriptor registered through the adapter, aliases intact.
        assert!(Arc::ptr_eq(
            &reg.lookup("say").unwrap(),
            &reg.lookup("echo").unwrap()
        ));
        assert!(Arc::ptr_eq(
            &reg.lookup("dictionary").unwrap(),
            &reg.lookup("dict").unwrap()
        ));
    }
}
