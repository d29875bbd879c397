//! Compiled-in command plugins.
//!
//! Two source sets mirror the two plugin directories the registry is
//! populated from: `public` for everyone (subject to bot mode) and `owner`
//! for the self/owner tier. Sources intentionally export a mix of shapes
//! (single descriptors, sequences, nested named maps, legacy descriptors) so
//! the registry's recursive discovery is exercised by real registrations.

pub mod moderation;
pub mod owner;
pub mod public;

pub use moderation::moderation_hooks;
pub use owner::owner_exports;
pub use public::public_exports;
