use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    domain::{Jid, MessageId},
    transport::types::{Credential, GroupMetadata, Presence, TransportEvent},
    Result,
};

/// Transport port.
///
/// The wire protocol and its cryptography live entirely behind this trait.
/// `connect` hands back the event stream; every other operation is an
/// independently fallible call against the live connection. Callers must not
/// assume one failed send affects any other pending operation.
#[async_trait]
pub trait TransportPort: Send + Sync {
    /// Open the connection using the resolved credential. Lifecycle and
    /// message events arrive on the returned channel until the connection
    /// closes.
    async fn connect(&self, credential: Credential) -> Result<mpsc::Receiver<TransportEvent>>;

    async fn send_text(&self, to: &Jid, text: &str) -> Result<()>;

    /// Send a text that explicitly mentions the given identities.
    async fn send_text_mentioning(&self, to: &Jid, text: &str, mentions: &[Jid]) -> Result<()>;

    async fn react(&self, to: &Jid, message: &MessageId, emoji: &str) -> Result<()>;

    async fn presence(&self, to: &Jid, presence: Presence) -> Result<()>;

    async fn read_receipts(&self, to: &Jid, messages: &[MessageId]) -> Result<()>;

    async fn block(&self, jid: &Jid) -> Result<()>;

    async fn group_metadata(&self, group: &Jid) -> Result<GroupMetadata>;

    async fn accept_group_invite(&self, code: &str) -> Result<()>;

    async fn follow_channel(&self, channel: &Jid) -> Result<()>;

    /// Request a pairing code for the phone captured during interactive
    /// resolution. Only meaningful while a pairing-flow login is in progress.
    async fn request_pairing_code(&self, phone: &str) -> Result<String>;

    /// The bot's own identity once the connection is open.
    async fn self_jid(&self) -> Option<Jid>;

    /// Graceful shutdown of the connection.
    async fn close(&self) -> Result<()>;
}
