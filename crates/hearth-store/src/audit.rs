//! Audit event types

use chrono::{DateTime, Local};
use hearth_api::{ApprovalStatus, Platform, SessionEndReason};
use hearth_util::{Amount, ApprovalId, ChildId, FamilyId, PurchaseId, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Configuration loaded
    ConfigLoaded { family_count: usize, child_count: usize },

    /// Session opened
    SessionStarted {
        session_id: SessionId,
        child_id: ChildId,
        platform: Platform,
        game_title: String,
    },

    /// Session closed
    SessionEnded {
        session_id: SessionId,
        child_id: ChildId,
        reason: SessionEndReason,
        duration: Duration,
    },

    /// Purchase approved by policy without guardian involvement
    PurchaseAutoApproved {
        purchase_id: PurchaseId,
        child_id: ChildId,
        amount: Amount,
        currency: String,
    },

    /// Purchase parked for a guardian decision
    ApprovalRequested {
        approval_id: ApprovalId,
        child_id: ChildId,
        amount: Amount,
        currency: String,
    },

    /// Guardian decided a pending approval
    ApprovalResolved {
        approval_id: ApprovalId,
        status: ApprovalStatus,
        resolved_by: UserId,
    },

    /// Pending approval timed out
    ApprovalExpired { approval_id: ApprovalId },

    /// Emergency stop executed
    EmergencyStop {
        child_id: ChildId,
        initiator_id: UserId,
        reason: String,
        terminated_sessions: usize,
    },

    /// Subscriber joined a family group
    SubscriberJoined {
        connection_id: String,
        family_id: FamilyId,
        user_id: UserId,
    },

    /// Subscriber join refused
    SubscriberRefused {
        connection_id: String,
        family_id: FamilyId,
        user_id: Option<UserId>,
    },

    /// Client connected
    ClientConnected {
        connection_id: String,
        role: String,
        uid: Option<u32>,
    },

    /// Client disconnected
    ClientDisconnected { connection_id: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: hearth_util::now(),
            event,
        }
    }
}
