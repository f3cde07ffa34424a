//! Core of the content relay bot.
//!
//! Framework-agnostic: the Bot API, the delegated-session gateway and storage
//! live behind ports (traits) implemented in adapter crates.

pub mod batch;
pub mod cleanup;
pub mod config;
pub mod content;
pub mod customize;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod link;
pub mod logging;
pub mod messaging;
pub mod ports;
pub mod progress;
pub mod session;
pub mod store;
pub mod transfer;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
