//! Outbound messaging abstractions used for status and reply text.

pub mod port;
pub mod throttled;
pub mod types;
