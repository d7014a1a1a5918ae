//! Pending approval lifecycle: guardian resolution and expiry

use chrono::{DateTime, Local};
use hearth_api::{Decision, Event, EventPayload, PurchaseApproval};
use hearth_store::{ApprovalTransition, AuditEvent, AuditEventType, Store};
use hearth_util::{ApprovalId, ChildId, HearthError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

use crate::{
    AuthorityScope, Authorizer, ChildLocks, FamilyDirectory, LiveStatusCache,
    NotificationBroadcaster, RequestContext,
};

/// Bounded exponential backoff for transient store failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: hearth_config::DEFAULT_STORE_RETRY_ATTEMPTS,
            base_backoff: hearth_config::DEFAULT_STORE_RETRY_BACKOFF,
        }
    }
}

/// Owns the Pending -> {Approved, Denied, Expired} transition.
///
/// Every transition is a conditional store update from `Pending`, so the
/// first decision wins regardless of which guardian or sweep submitted it.
pub struct ApprovalCoordinator {
    store: Arc<dyn Store>,
    directory: Arc<FamilyDirectory>,
    authorizer: Arc<dyn Authorizer>,
    cache: Arc<LiveStatusCache>,
    broadcaster: Arc<NotificationBroadcaster>,
    locks: Arc<ChildLocks>,
    retry: RetryPolicy,
    ttl: Duration,
}

impl ApprovalCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        directory: Arc<FamilyDirectory>,
        authorizer: Arc<dyn Authorizer>,
        cache: Arc<LiveStatusCache>,
        broadcaster: Arc<NotificationBroadcaster>,
        locks: Arc<ChildLocks>,
        retry: RetryPolicy,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            directory,
            authorizer,
            cache,
            broadcaster,
            locks,
            retry,
            ttl,
        }
    }

    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        approval_id: &ApprovalId,
        decision: Decision,
        reason: Option<String>,
    ) -> Result<PurchaseApproval> {
        let resolver = ctx.actor()?.clone();
        let approval = self.get(approval_id)?;
        let child_id = approval.child_id.clone();

        let allowed = self
            .authorizer
            .has_guardian_authority(&resolver, AuthorityScope::Child(&child_id))
            .await?;
        if !allowed {
            warn!(
                parent: &ctx.span,
                approval_id = %approval_id,
                user_id = %resolver,
                "Resolution refused: no guardian authority"
            );
            return Err(HearthError::unauthorized(format!(
                "{} is not a guardian of child {}",
                resolver, child_id
            )));
        }

        let _guard = self
            .locks
            .acquire(ctx, &child_id)
            .instrument(ctx.span.clone())
            .await?;

        let transition = ApprovalTransition {
            status: decision.target_status(),
            resolved_at: hearth_util::now(),
            resolved_by: Some(resolver.clone()),
            reason,
        };
        if !self.transition(approval_id, &transition).await? {
            let current = self.get(approval_id)?;
            debug!(
                parent: &ctx.span,
                approval_id = %approval_id,
                status = current.status.as_str(),
                "Resolution lost the race"
            );
            return Err(HearthError::conflict(format!(
                "approval {} is already {}",
                approval_id,
                current.status.as_str()
            )));
        }
        self.cache.invalidate(&child_id);

        let resolved = apply(approval, &transition);
        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::ApprovalResolved {
            approval_id: resolved.id,
            status: resolved.status,
            resolved_by: resolver.clone(),
        }));
        if let Some(family_id) = self.directory.family_of(&child_id) {
            self.broadcaster.broadcast(Event::new(
                family_id.clone(),
                EventPayload::ApprovalResolved {
                    approval_id: resolved.id,
                    child_id: child_id.clone(),
                    status: resolved.status,
                    resolved_by: resolver.clone(),
                    reason: resolved.reason.clone(),
                },
            ));
        }

        info!(
            parent: &ctx.span,
            approval_id = %approval_id,
            child_id = %child_id,
            status = resolved.status.as_str(),
            resolved_by = %resolver,
            "Approval resolved"
        );
        Ok(resolved)
    }

    /// Expire Pending approvals requested more than the TTL before `now`.
    /// Returns the approvals this sweep expired; ones resolved concurrently
    /// are skipped.
    pub async fn expire_stale(
        &self,
        ctx: &RequestContext,
        now: DateTime<Local>,
    ) -> Result<Vec<ApprovalId>> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| HearthError::internal(format!("approval TTL out of range: {}", e)))?;
        let stale = self.store.pending_approvals_before(now - ttl)?;

        let mut expired = Vec::new();
        for approval in stale {
            match self.expire_one(ctx, &approval, now).await {
                Ok(true) => expired.push(approval.id),
                Ok(false) => {
                    debug!(approval_id = %approval.id, "Already resolved before expiry");
                }
                Err(e @ HearthError::DeadlineExceeded(_)) => return Err(e),
                Err(e) => {
                    warn!(approval_id = %approval.id, error = %e, "Failed to expire approval");
                }
            }
        }

        if !expired.is_empty() {
            info!(parent: &ctx.span, count = expired.len(), "Expired stale approvals");
        }
        Ok(expired)
    }

    async fn expire_one(
        &self,
        ctx: &RequestContext,
        approval: &PurchaseApproval,
        now: DateTime<Local>,
    ) -> Result<bool> {
        let _guard = self.locks.acquire(ctx, &approval.child_id).await?;

        if !self.transition(&approval.id, &ApprovalTransition::expired(now)).await? {
            return Ok(false);
        }
        self.cache.invalidate(&approval.child_id);

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::ApprovalExpired {
            approval_id: approval.id,
        }));
        if let Some(family_id) = self.directory.family_of(&approval.child_id) {
            self.broadcaster.broadcast(Event::new(
                family_id.clone(),
                EventPayload::ApprovalExpired {
                    approval_id: approval.id,
                    child_id: approval.child_id.clone(),
                },
            ));
        }
        Ok(true)
    }

    /// Pending approvals for a child, oldest first
    pub fn pending_for(&self, child_id: &ChildId) -> Result<Vec<PurchaseApproval>> {
        Ok(self.store.pending_approvals(child_id)?)
    }

    pub fn get(&self, approval_id: &ApprovalId) -> Result<PurchaseApproval> {
        self.store
            .get_approval(approval_id)?
            .ok_or_else(|| HearthError::not_found(format!("approval {}", approval_id)))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Conditional update with bounded retry on transient store failures
    async fn transition(
        &self,
        approval_id: &ApprovalId,
        transition: &ApprovalTransition,
    ) -> Result<bool> {
        let mut attempt = 1;
        loop {
            let err = match self.store.transition_approval(approval_id, transition) {
                Ok(applied) => return Ok(applied),
                Err(e) => HearthError::from(e),
            };
            if !err.is_transient() || attempt >= self.retry.attempts {
                return Err(err);
            }
            let delay = self.retry.backoff(attempt);
            warn!(
                approval_id = %approval_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Approval update failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn apply(mut approval: PurchaseApproval, transition: &ApprovalTransition) -> PurchaseApproval {
    approval.status = transition.status;
    approval.resolved_at = Some(transition.resolved_at);
    approval.resolved_by = transition.resolved_by.clone();
    approval.reason = transition.reason.clone();
    approval
}
