//! Store trait definitions

use chrono::{DateTime, Local};
use hearth_api::{ApprovalStatus, GameSession, Platform, PurchaseApproval};
use hearth_util::{Amount, ApprovalId, ChildId, PurchaseId, SessionId, UserId};
use std::collections::HashMap;

use crate::{AuditEvent, StoreResult};

/// Main store trait. The single source of truth for sessions, approvals and
/// the spend ledger.
pub trait Store: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Sessions

    /// Persist a newly opened session
    fn insert_session(&self, session: &GameSession) -> StoreResult<()>;

    /// Close a session if it is still active. Returns `false` if it was
    /// already closed or does not exist.
    fn close_session(&self, id: &SessionId, ended_at: DateTime<Local>) -> StoreResult<bool>;

    /// All sessions of a child with no end time
    fn active_sessions(&self, child_id: &ChildId) -> StoreResult<Vec<GameSession>>;

    /// The active session of a child on one platform, if any
    fn active_session_on(
        &self,
        child_id: &ChildId,
        platform: Platform,
    ) -> StoreResult<Option<GameSession>>;

    /// Sessions of a child that started at or after `since`, oldest first
    fn sessions_started_since(
        &self,
        child_id: &ChildId,
        since: DateTime<Local>,
    ) -> StoreResult<Vec<GameSession>>;

    // Approvals

    /// Persist a new approval (normally `Pending`)
    fn insert_approval(&self, approval: &PurchaseApproval) -> StoreResult<()>;

    /// Look up an approval
    fn get_approval(&self, id: &ApprovalId) -> StoreResult<Option<PurchaseApproval>>;

    /// Conditionally move an approval out of `Pending`. Returns `true` only
    /// for the caller whose update observed `Pending`.
    fn transition_approval(
        &self,
        id: &ApprovalId,
        transition: &ApprovalTransition,
    ) -> StoreResult<bool>;

    /// Pending approvals of a child ordered by `requested_at`
    fn pending_approvals(&self, child_id: &ChildId) -> StoreResult<Vec<PurchaseApproval>>;

    /// Pending approvals requested strictly before `cutoff`, oldest first
    fn pending_approvals_before(
        &self,
        cutoff: DateTime<Local>,
    ) -> StoreResult<Vec<PurchaseApproval>>;

    // Spend ledger

    /// Record an auto-approved purchase
    fn record_purchase(&self, entry: &LedgerEntry) -> StoreResult<()>;

    /// Sum of auto-approved purchases and approved approvals (by resolution
    /// time) in `[from, to)`, counting only amounts in `currency`
    fn approved_spend_between(
        &self,
        child_id: &ChildId,
        currency: &str,
        from: DateTime<Local>,
        to: DateTime<Local>,
    ) -> StoreResult<Amount>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// The write applied by a successful approval transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalTransition {
    pub status: ApprovalStatus,
    pub resolved_at: DateTime<Local>,
    pub resolved_by: Option<UserId>,
    pub reason: Option<String>,
}

impl ApprovalTransition {
    pub fn expired(at: DateTime<Local>) -> Self {
        Self {
            status: ApprovalStatus::Expired,
            resolved_at: at,
            resolved_by: None,
            reason: Some("approval window elapsed".into()),
        }
    }
}

/// An auto-approved purchase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: PurchaseId,
    pub child_id: ChildId,
    pub platform: Platform,
    pub game_title: String,
    pub item_name: String,
    pub amount: Amount,
    pub currency: String,
    pub metadata: HashMap<String, String>,
    pub approved_at: DateTime<Local>,
}
