//! Group moderation collaborators.
//!
//! Each hook is independent: the pipeline invokes all of them per group
//! message and isolates failures, so a hook only has to care about its own
//! pattern. All three warn rather than remove; removal stays with the
//! platform's own admin tools.

use std::sync::Arc;

use async_trait::async_trait;

use hornet_core::{
    hooks::ModerationHook,
    transport::{InboundMessage, TransportPort},
    Result,
};

/// How many distinct mentions in one message count as mention-bombing.
const MENTION_LIMIT: usize = 5;

/// Build the standard hook set, in invocation order.
pub fn moderation_hooks() -> Vec<Arc<dyn ModerationHook>> {
    vec![
        Arc::new(TagGuard),
        Arc::new(MentionGuard),
        Arc::new(LinkGuard),
    ]
}

/// Can the bot moderate here, and is the sender an ordinary member?
async fn bot_outranks_sender(
    msg: &InboundMessage,
    transport: &Arc<dyn TransportPort>,
) -> Result<bool> {
    let meta = transport.group_metadata(&msg.conversation).await?;
    let Some(self_jid) = transport.self_jid().await else {
        return Ok(false);
    };
    Ok(meta.is_admin(&self_jid) && !meta.is_admin(&msg.sender))
}

async fn warn_sender(
    msg: &InboundMessage,
    transport: &Arc<dyn TransportPort>,
    text: &str,
) -> Result<()> {
    transport
        .send_text_mentioning(&msg.conversation, text, &[msg.sender.clone()])
        .await
}

// ============== tag abuse ==============

pub struct TagGuard;

#[async_trait]
impl ModerationHook for TagGuard {
    fn name(&self) -> &'static str {
        "tag-guard"
    }

    async fn on_group_message(
        &self,
        msg: &InboundMessage,
        body: &str,
        transport: Arc<dyn TransportPort>,
    ) -> Result<()> {
        let lower = body.to_lowercase();
        if !lower.contains("@everyone") && !lower.contains("@all") {
            return Ok(());
        }
        if bot_outranks_sender(msg, &transport).await? {
            let text = format!(
                "@{} tagging the whole group is not allowed here.",
                msg.sender.bare()
            );
            warn_sender(msg, &transport, &text).await?;
        }
        Ok(())
    }
}

// ============== mention bombing ==============

pub struct MentionGuard;

#[async_trait]
impl ModerationHook for MentionGuard {
    fn name(&self) -> &'static str {
        "mention-guard"
    }

    async fn on_group_message(
        &self,
        msg: &InboundMessage,
        body: &str,
        transport: Arc<dyn TransportPort>,
    ) -> Result<()> {
        if count_mentions(body) <= MENTION_LIMIT {
            return Ok(());
        }
        if bot_outranks_sender(msg, &transport).await? {
            let text = format!(
                "@{} please do not mention-bomb the group.",
                msg.sender.bare()
            );
            warn_sender(msg, &transport, &text).await?;
        }
        Ok(())
    }
}

/// `@<digits>` runs, the transport's mention syntax.
fn count_mentions(body: &str) -> usize {
    let mut count = 0;
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'@' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit() {
            count += 1;
            while i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit() {
                i += 1;
            }
        }
        i += 1;
    }
    count
}

// ============== link abuse ==============

pub struct LinkGuard;

#[async_trait]
impl ModerationHook for LinkGuard {
    fn name(&self) -> &'static str {
        "link-guard"
    }

    async fn on_group_message(
        &self,
        msg: &InboundMessage,
        body: &str,
        transport: Arc<dyn TransportPort>,
    ) -> Result<()> {
        if !contains_link(body) {
            return Ok(());
        }
        if bot_outranks_sender(msg, &transport).await? {
            let text = format!(
                "@{} links are not allowed in this group.",
                msg.sender.bare()
            );
            warn_sender(msg, &transport, &text).await?;
        }
        Ok(())
    }
}

fn contains_link(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("http://") || lower.contains("https://") || lower.contains("invite.code/")
}
