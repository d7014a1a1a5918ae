//! Shared utilities for hearthd
//!
//! This crate provides:
//! - ID types (ChildId, FamilyId, UserId, SessionId, ApprovalId, ...)
//! - `Amount`, an exact money type in minor units
//! - Time utilities (mockable wall clock, day/month boundaries)
//! - The `HearthError` taxonomy shared by every layer
//! - Rate limiting helpers
//! - Default paths for socket, config, and data directories

mod error;
mod ids;
mod money;
mod paths;
mod rate_limit;
mod time;

pub use error::*;
pub use ids::*;
pub use money::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
