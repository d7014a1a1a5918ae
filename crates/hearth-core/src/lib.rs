//! Real-time oversight engine for hearthd
//!
//! This crate is the heart of hearthd, containing:
//! - Session tracking and screen-time accounting
//! - Purchase interception against per-child spend policy
//! - The purchase approval state machine (Pending -> Approved | Denied | Expired)
//! - A read-through live status cache with invalidation on every mutation
//! - Family-scoped event fan-out and the emergency stop path
//! - Per-child critical sections and a priority dispatch lane

mod approval;
mod broadcast;
mod cache;
mod context;
mod directory;
mod dispatch;
mod emergency;
mod engine;
mod locks;
mod purchase;
mod session;

#[cfg(test)]
mod test_support;

pub use approval::*;
pub use broadcast::*;
pub use cache::*;
pub use context::*;
pub use directory::*;
pub use dispatch::*;
pub use emergency::*;
pub use engine::*;
pub use locks::*;
pub use purchase::*;
pub use session::{SessionTracker, Termination};
