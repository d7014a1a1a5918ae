//! Event types for hearthd -> subscriber streaming

use chrono::{DateTime, Local};
use hearth_util::{Amount, ApprovalId, ChildId, FamilyId, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ApprovalStatus, Platform, SessionEndReason, API_VERSION};

/// Event envelope. Every event is scoped to one family group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub family_id: FamilyId,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(family_id: FamilyId, payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: hearth_util::now(),
            family_id,
            payload,
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self.payload {
            EventPayload::PurchasePending { .. } => "purchase_pending",
            EventPayload::ApprovalResolved { .. } => "approval_resolved",
            EventPayload::ApprovalExpired { .. } => "approval_expired",
            EventPayload::SessionStarted { .. } => "session_started",
            EventPayload::SessionEnded { .. } => "session_ended",
            EventPayload::EmergencyStopExecuted { .. } => "emergency_stop_executed",
            EventPayload::Shutdown => "shutdown",
        }
    }
}

/// Status-changing events fanned out to a family's subscribers. Each carries
/// the child and entity identifiers a subscriber needs to re-fetch state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A purchase needs a guardian decision
    PurchasePending {
        approval_id: ApprovalId,
        child_id: ChildId,
        platform: Platform,
        game_title: String,
        item_name: String,
        amount: Amount,
        currency: String,
    },

    /// A guardian approved or denied a purchase
    ApprovalResolved {
        approval_id: ApprovalId,
        child_id: ChildId,
        status: ApprovalStatus,
        resolved_by: UserId,
        reason: Option<String>,
    },

    /// A pending approval timed out
    ApprovalExpired {
        approval_id: ApprovalId,
        child_id: ChildId,
    },

    /// A gaming session started
    SessionStarted {
        session_id: SessionId,
        child_id: ChildId,
        platform: Platform,
        game_title: String,
        started_at: DateTime<Local>,
    },

    /// A gaming session ended
    SessionEnded {
        session_id: SessionId,
        child_id: ChildId,
        platform: Platform,
        reason: SessionEndReason,
        duration: Duration,
    },

    /// A guardian terminated all of a child's sessions
    EmergencyStopExecuted {
        child_id: ChildId,
        initiator_id: UserId,
        reason: String,
        terminated_sessions: Vec<SessionId>,
    },

    /// Service is shutting down
    Shutdown,
}

impl EventPayload {
    /// Child the event concerns, if any
    pub fn child_id(&self) -> Option<&ChildId> {
        match self {
            EventPayload::PurchasePending { child_id, .. }
            | EventPayload::ApprovalResolved { child_id, .. }
            | EventPayload::ApprovalExpired { child_id, .. }
            | EventPayload::SessionStarted { child_id, .. }
            | EventPayload::SessionEnded { child_id, .. }
            | EventPayload::EmergencyStopExecuted { child_id, .. } => Some(child_id),
            EventPayload::Shutdown => None,
        }
    }
}
