//! hearthd service wiring
//!
//! Connects the IPC server to the oversight engine:
//! - Role checks per connection
//! - Per-connection rate limiting
//! - Priority dispatch of emergency stops
//! - Periodic approval expiry

mod daemon;
mod handler;

pub use daemon::*;
pub use handler::*;
