//! Transport-facing data model.
//!
//! The adapter normalizes raw wire events into these types; nothing in the
//! core ever sees the transport's own message shapes.

use serde::{Deserialize, Serialize};

use crate::domain::{Jid, MessageId};

/// How the session is authenticated. The credential material itself is an
/// opaque blob living in the session directory; the transport is the only
/// component that can interpret it. The resolver's job is to decide which of
/// these applies and to materialize the blob where needed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credential {
    /// Reuse the previously persisted session directory.
    LocalStore,
    /// An externally supplied encoded token, already decoded into the
    /// session directory by the resolver.
    ExternalToken,
    /// Fresh login via a phone-number pairing flow.
    PairingFlow { phone: String },
}

impl Credential {
    /// Tag persisted alongside the store so restarts know what produced it.
    pub fn origin_tag(&self) -> &'static str {
        match self {
            Credential::LocalStore => "store",
            Credential::ExternalToken => "token",
            Credential::PairingFlow { .. } => "pairing",
        }
    }
}

/// Connection-close status taxonomy. Everything the state machine does not
/// recognize by name is a generic transient code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseCode {
    LoggedOut,
    Unauthorized,
    ConnectionTimeout,
    Other(u16),
}

impl CloseCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => CloseCode::Unauthorized,
            403 => CloseCode::LoggedOut,
            408 => CloseCode::ConnectionTimeout,
            other => CloseCode::Other(other),
        }
    }

    /// Permanent invalidation: the stored credential must never be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, CloseCode::LoggedOut | CloseCode::Unauthorized)
    }
}

/// Batch discriminator: live messages vs historical sync replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertKind {
    Notify,
    History,
}

/// Connection-lifecycle and inbound-message events emitted by the transport.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    Open { self_jid: Jid },
    Closed { code: CloseCode },
    Messages { kind: UpsertKind, messages: Vec<InboundMessage> },
}

/// The supported inbound content shapes, in classification-precedence order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentVariant {
    Text { text: String },
    ExtendedText { text: String },
    ImageCaption { caption: String },
    VideoCaption { caption: String },
    ContextText { text: String },
    /// Quick-reply button selection; `id` may or may not be a command body.
    QuickReply { id: String },
    /// Interactive flow selection carrying a nested JSON payload.
    InteractiveReply { params_json: String },
    /// List row selection.
    ListReply { id: String },
    /// Deletion notice for a previously delivered message.
    Revocation { target: MessageId },
    Unsupported { kind: String },
}

/// Normalized view over one raw transport message event. Transient: built
/// per event and dropped once the pipeline finishes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: MessageId,
    pub conversation: Jid,
    pub sender: Jid,
    pub from_self: bool,
    pub content: ContentVariant,
    pub timestamp: i64,
}

/// Presence pulses the automation layer can emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presence {
    Composing,
    Recording,
    Paused,
}

impl Presence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Composing => "composing",
            Presence::Recording => "recording",
            Presence::Paused => "paused",
        }
    }
}

/// Minimal group metadata the moderation layer consumes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub subject: String,
    pub participant_count: usize,
    pub admins: Vec<Jid>,
}

impl GroupMetadata {
    pub fn is_admin(&self, jid: &Jid) -> bool {
        self.admins.iter().any(|a| a == jid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_taxonomy() {
        assert_eq!(CloseCode::from_status(401), CloseCode::Unauthorized);
        assert_eq!(CloseCode::from_status(403), CloseCode::LoggedOut);
        assert_eq!(CloseCode::from_status(408), CloseCode::ConnectionTimeout);
        assert_eq!(CloseCode::from_status(500), CloseCode::Other(500));
    }

    #[test]
    fn permanence_covers_logout_and_unauthorized_only() {
        assert!(CloseCode::LoggedOut.is_permanent());
        assert!(CloseCode::Unauthorized.is_permanent());
        assert!(!CloseCode::ConnectionTimeout.is_permanent());
        assert!(!CloseCode::Other(515).is_permanent());
    }

    #[test]
    fn content_variant_round_trips_from_wire_json() {
        let raw = r#"{"type":"quick_reply","id":"!menu"}"#;
        let v: ContentVariant = serde_json::from_str(raw).unwrap();
        assert_eq!(v, ContentVariant::QuickReply { id: "!menu".to_string() });
    }
}
