pub mod port;
pub mod types;

pub use port::TransportPort;
pub use types::{
    CloseCode, ContentVariant, Credential, GroupMetadata, InboundMessage, Presence, TransportEvent,
    UpsertKind,
};
