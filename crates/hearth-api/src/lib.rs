//! Protocol types for hearthd IPC
//!
//! This crate defines the stable API between hearthd and its clients
//! (platform adapter bridges and family apps):
//! - Commands (requests from clients)
//! - Responses
//! - Events (service -> family subscribers)
//! - Domain views shared by every layer
//! - Versioning

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
