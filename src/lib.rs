//! Previewly - time-bounded HLS preview sessions
//!
//! This library crate exposes the server, session registry and
//! configuration for the binary and for integration testing.

pub mod config;
pub mod server;
pub mod session;
