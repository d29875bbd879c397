//! Core domain + application logic for the hornet messaging bot.
//!
//! This crate is intentionally transport-agnostic. The actual wire protocol
//! lives behind the `TransportPort` trait implemented in adapter crates; the
//! core owns the connection state machine, the inbound dispatch pipeline and
//! the command registry.

pub mod config;
pub mod counter;
pub mod credentials;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod hooks;
pub mod logging;
pub mod registry;
pub mod session;
pub mod settings;
pub mod state;
pub mod transport;
pub mod windows;

#[cfg(test)]
pub(crate) mod testutil;

pub use errors::{Error, Result};
