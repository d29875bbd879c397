//! Collaborator seams consumed by the dispatch pipeline.
//!
//! Moderation, revocation tracking and conversational fallback are external
//! concerns; the pipeline only needs a call shape with isolated failures.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    domain::MessageId,
    transport::{ContentVariant, InboundMessage, TransportPort},
    Result,
};

/// Group-chat moderation collaborator (tag-abuse, mention-abuse, link-abuse).
/// A hook failure is logged by the pipeline and never aborts processing.
#[async_trait]
pub trait ModerationHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_group_message(
        &self,
        msg: &InboundMessage,
        body: &str,
        transport: Arc<dyn TransportPort>,
    ) -> Result<()>;
}

/// Conversational fallback for non-command bodies, best-effort.
#[async_trait]
pub trait ChatResponder: Send + Sync {
    async fn respond(
        &self,
        msg: &InboundMessage,
        body: &str,
        transport: Arc<dyn TransportPort>,
    ) -> Result<()>;
}

/// Short-lived message store consumed by revocation tracking.
#[async_trait]
pub trait MessageArchive: Send + Sync {
    async fn store(&self, msg: &InboundMessage) -> Result<()>;

    /// A revocation notice arrived for `target`; emit whatever deletion
    /// notice the collaborator wants. Ends the event's processing.
    async fn on_revocation(
        &self,
        notice: &InboundMessage,
        target: &MessageId,
        transport: Arc<dyn TransportPort>,
    ) -> Result<()>;
}

/// Bounded in-memory archive: remembers recent message bodies and reports
/// deletions of other senders' messages back into the conversation.
pub struct InMemoryArchive {
    capacity: usize,
    inner: Mutex<ArchiveInner>,
}

#[derive(Default)]
struct ArchiveInner {
    by_id: HashMap<MessageId, InboundMessage>,
    order: Vec<MessageId>,
}

impl InMemoryArchive {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(ArchiveInner::default()),
        }
    }

    fn body_of(msg: &InboundMessage) -> Option<&str> {
        match &msg.content {
            ContentVariant::Text { text }
            | ContentVariant::ExtendedText { text }
            | ContentVariant::ContextText { text } => Some(text),
            ContentVariant::ImageCaption { caption }
            | ContentVariant::VideoCaption { caption } => Some(caption),
            _ => None,
        }
    }
}

#[async_trait]
impl MessageArchive for InMemoryArchive {
    async fn store(&self, msg: &InboundMessage) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.by_id.insert(msg.id.clone(), msg.clone()).is_none() {
            inner.order.push(msg.id.clone());
        }
        while inner.order.len() > self.capacity {
            let oldest = inner.order.remove(0);
            inner.by_id.remove(&oldest);
        }
        Ok(())
    }

    async fn on_revocation(
        &self,
        notice: &InboundMessage,
        target: &MessageId,
        transport: Arc<dyn TransportPort>,
    ) -> Result<()> {
        let stored = {
            let inner = self.inner.lock().await;
            inner.by_id.get(target).cloned()
        };

        let Some(stored) = stored else {
            info!("revocation for untracked message {}", target.as_str());
            return Ok(());
        };
        if stored.from_self {
            return Ok(());
        }

        let who = stored.sender.bare();
        let text = match Self::body_of(&stored) {
            Some(body) => format!("Deleted message from {who}:\n{body}"),
            None => format!("{who} deleted a message."),
        };
        transport.send_text(&notice.conversation, &text).await
    }
}
