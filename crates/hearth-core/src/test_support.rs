//! Shared fixtures for unit tests

use chrono::{DateTime, Local};
use hearth_api::{Event, GameSession, Platform, PurchaseApproval, PurchaseAttempt};
use hearth_store::{
    ApprovalTransition, AuditEvent, LedgerEntry, SqliteStore, Store, StoreError, StoreResult,
};
use hearth_util::{Amount, ApprovalId, ChildId, ConnectionId, FamilyId, SessionId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::{
    ApprovalCoordinator, EmergencyControlService, OversightService, PurchaseInterceptor,
    RequestContext, SessionTracker,
};

/// Two families. Rivera: guardians ana and ben, children maya (needs
/// approval, 20.00/day, 5.00 threshold) and leo (no approval, 30 min/day).
/// Chen: guardian wei, child lin.
pub const CONFIG: &str = r#"
    config_version = 1

    [service]
    status_cache_ttl_seconds = 30
    approval_ttl_seconds = 86400

    [[families]]
    id = "rivera"
    [[families.members]]
    id = "ana"
    role = "guardian"
    [[families.members]]
    id = "ben"
    role = "guardian"
    [[families.members]]
    id = "maya"
    display_name = "Maya"
    role = "child"
    [families.members.policy]
    max_daily_screen_time_minutes = 120
    daily_spending_limit = 20.00
    monthly_spending_limit = 50.00
    auto_approval_threshold = 5.00
    require_approval_for_purchases = true
    [[families.members]]
    id = "leo"
    display_name = "Leo"
    role = "child"
    [families.members.policy]
    max_daily_screen_time_minutes = 30
    require_approval_for_purchases = false

    [[families]]
    id = "chen"
    [[families.members]]
    id = "wei"
    role = "guardian"
    [[families.members]]
    id = "lin"
    role = "child"
"#;

pub struct Fixture {
    pub service: OversightService,
    pub store: Arc<dyn Store>,
    pub sessions: Arc<SessionTracker>,
    pub purchases: Arc<PurchaseInterceptor>,
    pub approvals: Arc<ApprovalCoordinator>,
    pub emergency: Arc<EmergencyControlService>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_store(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    pub fn with_store(store: Arc<dyn Store>) -> Self {
        let config = hearth_config::parse_config(CONFIG).unwrap();
        let service = OversightService::new(&config, store.clone());
        Self {
            sessions: service.sessions().clone(),
            purchases: service.purchases().clone(),
            approvals: service.approvals().clone(),
            emergency: service.emergency().clone(),
            store,
            service,
        }
    }

    pub fn ctx(&self, actor: &str) -> RequestContext {
        RequestContext::new(1, Some(UserId::new(actor)), Duration::from_secs(5))
    }

    pub async fn subscribe(&self, actor: &str, family: &str) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.service
            .subscribe(&self.ctx(actor), ConnectionId::new(), &FamilyId::new(family), tx)
            .await
            .unwrap();
        rx
    }
}

pub fn attempt(child: &str, cents: i64) -> PurchaseAttempt {
    PurchaseAttempt {
        child_id: ChildId::new(child),
        platform: Platform::Steam,
        game_title: "Hollow Knight".into(),
        item_name: "Soundtrack".into(),
        amount: Amount::from_minor(cents),
        currency: "usd".into(),
        metadata: HashMap::new(),
    }
}

/// SQLite store whose writes can be made to fail on demand
pub struct FlakyStore {
    inner: SqliteStore,
    failures: AtomicU32,
    insert_failures: AtomicU32,
    close_failures: AtomicU32,
    close_skips: AtomicU32,
    corrupt_transitions: AtomicU32,
    transition_calls: AtomicU32,
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl FlakyStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(0),
            insert_failures: AtomicU32::new(0),
            close_failures: AtomicU32::new(0),
            close_skips: AtomicU32::new(0),
            corrupt_transitions: AtomicU32::new(0),
            transition_calls: AtomicU32::new(0),
        }
    }

    pub fn fail_next_transitions(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Make the next transition read back a row that cannot be decoded
    pub fn corrupt_next_transition(&self) {
        self.corrupt_transitions.store(1, Ordering::SeqCst);
    }

    pub fn fail_next_session_inserts(&self, n: u32) {
        self.insert_failures.store(n, Ordering::SeqCst);
    }

    /// Let `skip` closes through, then fail the next `n`
    pub fn fail_session_closes_after(&self, skip: u32, n: u32) {
        self.close_skips.store(skip, Ordering::SeqCst);
        self.close_failures.store(n, Ordering::SeqCst);
    }

    pub fn transition_calls(&self) -> u32 {
        self.transition_calls.load(Ordering::SeqCst)
    }
}

impl Store for FlakyStore {
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()> {
        self.inner.append_audit(event)
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        self.inner.get_recent_audits(limit)
    }

    fn insert_session(&self, session: &GameSession) -> StoreResult<()> {
        if take_failure(&self.insert_failures) {
            return Err(StoreError::Database("disk I/O error".into()));
        }
        self.inner.insert_session(session)
    }

    fn close_session(&self, id: &SessionId, ended_at: DateTime<Local>) -> StoreResult<bool> {
        if !take_failure(&self.close_skips) && take_failure(&self.close_failures) {
            return Err(StoreError::Database("disk I/O error".into()));
        }
        self.inner.close_session(id, ended_at)
    }

    fn active_sessions(&self, child_id: &ChildId) -> StoreResult<Vec<GameSession>> {
        self.inner.active_sessions(child_id)
    }

    fn active_session_on(
        &self,
        child_id: &ChildId,
        platform: Platform,
    ) -> StoreResult<Option<GameSession>> {
        self.inner.active_session_on(child_id, platform)
    }

    fn sessions_started_since(
        &self,
        child_id: &ChildId,
        since: DateTime<Local>,
    ) -> StoreResult<Vec<GameSession>> {
        self.inner.sessions_started_since(child_id, since)
    }

    fn insert_approval(&self, approval: &PurchaseApproval) -> StoreResult<()> {
        self.inner.insert_approval(approval)
    }

    fn get_approval(&self, id: &ApprovalId) -> StoreResult<Option<PurchaseApproval>> {
        self.inner.get_approval(id)
    }

    fn transition_approval(
        &self,
        id: &ApprovalId,
        transition: &ApprovalTransition,
    ) -> StoreResult<bool> {
        self.transition_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.corrupt_transitions) {
            return Err(StoreError::Corrupt("bad status: pending?".into()));
        }
        if take_failure(&self.failures) {
            return Err(StoreError::Database("database is locked".into()));
        }
        self.inner.transition_approval(id, transition)
    }

    fn pending_approvals(&self, child_id: &ChildId) -> StoreResult<Vec<PurchaseApproval>> {
        self.inner.pending_approvals(child_id)
    }

    fn pending_approvals_before(
        &self,
        cutoff: DateTime<Local>,
    ) -> StoreResult<Vec<PurchaseApproval>> {
        self.inner.pending_approvals_before(cutoff)
    }

    fn record_purchase(&self, entry: &LedgerEntry) -> StoreResult<()> {
        self.inner.record_purchase(entry)
    }

    fn approved_spend_between(
        &self,
        child_id: &ChildId,
        currency: &str,
        from: DateTime<Local>,
        to: DateTime<Local>,
    ) -> StoreResult<Amount> {
        self.inner.approved_spend_between(child_id, currency, from, to)
    }

    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }
}
