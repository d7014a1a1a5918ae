//! Purchase interception and spend-limit policy

use chrono::{DateTime, Local};
use hearth_api::{
    ApprovalStatus, Event, EventPayload, InterceptOutcome, PurchaseApproval, PurchaseAttempt,
    SpendSummary,
};
use hearth_config::ChildPolicy;
use hearth_store::{AuditEvent, AuditEventType, LedgerEntry, Store};
use hearth_util::{Amount, ApprovalId, ChildId, HearthError, PurchaseId, Result};
use std::sync::Arc;
use tracing::{info, Instrument};

use crate::{ChildLocks, ChildProfile, FamilyDirectory, LiveStatusCache, NotificationBroadcaster, RequestContext};

/// What policy says about a purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseDecision {
    AutoApprove,
    RequireApproval,
}

/// Auto-approve iff approval is not required, or the purchase fits both the
/// per-purchase threshold and what is left of today's limit. Both bounds are
/// inclusive.
pub fn evaluate_purchase(policy: &ChildPolicy, today_spend: Amount, amount: Amount) -> PurchaseDecision {
    if !policy.require_approval_for_purchases {
        return PurchaseDecision::AutoApprove;
    }
    let within_daily = today_spend.saturating_add(amount) <= policy.daily_spending_limit;
    let within_threshold = amount <= policy.auto_approval_threshold;
    if within_daily && within_threshold {
        PurchaseDecision::AutoApprove
    } else {
        PurchaseDecision::RequireApproval
    }
}

/// Reject malformed attempts before any lookup. Returns the normalized
/// (upper-case) currency code.
pub fn validate_attempt(attempt: &PurchaseAttempt) -> Result<String> {
    if !attempt.amount.is_positive() {
        return Err(HearthError::validation(format!(
            "amount must be positive, got {}",
            attempt.amount
        )));
    }
    if attempt.item_name.trim().is_empty() {
        return Err(HearthError::validation("item name cannot be empty"));
    }
    let currency = attempt.currency.trim();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(HearthError::validation(format!(
            "invalid currency code '{}'",
            attempt.currency
        )));
    }
    Ok(currency.to_ascii_uppercase())
}

/// Turns platform purchase attempts into ledger entries or pending approvals
pub struct PurchaseInterceptor {
    store: Arc<dyn Store>,
    directory: Arc<FamilyDirectory>,
    cache: Arc<LiveStatusCache>,
    broadcaster: Arc<NotificationBroadcaster>,
    locks: Arc<ChildLocks>,
}

impl PurchaseInterceptor {
    pub fn new(
        store: Arc<dyn Store>,
        directory: Arc<FamilyDirectory>,
        cache: Arc<LiveStatusCache>,
        broadcaster: Arc<NotificationBroadcaster>,
        locks: Arc<ChildLocks>,
    ) -> Self {
        Self {
            store,
            directory,
            cache,
            broadcaster,
            locks,
        }
    }

    pub async fn intercept(
        &self,
        ctx: &RequestContext,
        attempt: PurchaseAttempt,
    ) -> Result<InterceptOutcome> {
        let currency = validate_attempt(&attempt)?;
        let profile = self.profile(&attempt.child_id)?;
        if currency != profile.policy.currency {
            return Err(HearthError::validation(format!(
                "purchase is in {} but {}'s limits are in {}",
                currency, attempt.child_id, profile.policy.currency
            )));
        }

        // Decision and ledger write share the critical section so concurrent
        // purchases cannot both fit under the same remaining limit
        let _guard = self
            .locks
            .acquire(ctx, &attempt.child_id)
            .instrument(ctx.span.clone())
            .await?;

        let now = hearth_util::now();
        let today_spend = self.spend_between(
            profile,
            hearth_util::start_of_day(&now),
            hearth_util::start_of_next_day(&now),
        )?;

        match evaluate_purchase(&profile.policy, today_spend, attempt.amount) {
            PurchaseDecision::AutoApprove => {
                let purchase_id = self.record_auto_approval(attempt, currency, now)?;
                Ok(InterceptOutcome::AutoApproved { purchase_id })
            }
            PurchaseDecision::RequireApproval => {
                let approval_id = self.request_approval(ctx, profile, attempt, currency, now)?;
                Ok(InterceptOutcome::PendingApproval { approval_id })
            }
        }
    }

    /// Today's and this month's approved spend against the child's limits
    pub fn spend_summary(&self, child_id: &ChildId, now: DateTime<Local>) -> Result<SpendSummary> {
        let profile = self.profile(child_id)?;
        let today = self.spend_between(
            profile,
            hearth_util::start_of_day(&now),
            hearth_util::start_of_next_day(&now),
        )?;
        let this_month = self.spend_between(
            profile,
            hearth_util::start_of_month(&now),
            hearth_util::start_of_next_month(&now),
        )?;

        Ok(SpendSummary {
            child_id: child_id.clone(),
            today,
            this_month,
            daily_limit: profile.policy.daily_spending_limit,
            monthly_limit: profile.policy.monthly_spending_limit,
            auto_approval_threshold: profile.policy.auto_approval_threshold,
            currency: profile.policy.currency.clone(),
        })
    }

    /// Approved spend in the child's policy currency
    fn spend_between(
        &self,
        profile: &ChildProfile,
        from: DateTime<Local>,
        to: DateTime<Local>,
    ) -> Result<Amount> {
        Ok(self.store.approved_spend_between(
            &profile.child_id,
            &profile.policy.currency,
            from,
            to,
        )?)
    }

    fn record_auto_approval(
        &self,
        attempt: PurchaseAttempt,
        currency: String,
        now: DateTime<Local>,
    ) -> Result<PurchaseId> {
        let entry = LedgerEntry {
            id: PurchaseId::new(),
            child_id: attempt.child_id,
            platform: attempt.platform,
            game_title: attempt.game_title,
            item_name: attempt.item_name,
            amount: attempt.amount,
            currency,
            metadata: attempt.metadata,
            approved_at: now,
        };
        self.store.record_purchase(&entry)?;

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::PurchaseAutoApproved {
            purchase_id: entry.id,
            child_id: entry.child_id.clone(),
            amount: entry.amount,
            currency: entry.currency.clone(),
        }));
        info!(
            purchase_id = %entry.id,
            child_id = %entry.child_id,
            amount = %entry.amount,
            currency = %entry.currency,
            "Purchase auto-approved"
        );
        Ok(entry.id)
    }

    fn request_approval(
        &self,
        ctx: &RequestContext,
        profile: &ChildProfile,
        attempt: PurchaseAttempt,
        currency: String,
        now: DateTime<Local>,
    ) -> Result<ApprovalId> {
        let approval = PurchaseApproval {
            id: ApprovalId::new(),
            child_id: attempt.child_id,
            platform: attempt.platform,
            game_title: attempt.game_title,
            item_name: attempt.item_name,
            amount: attempt.amount,
            currency,
            status: ApprovalStatus::Pending,
            requested_at: now,
            resolved_at: None,
            resolved_by: None,
            reason: None,
        };
        self.store.insert_approval(&approval)?;
        self.cache.invalidate(&approval.child_id);

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::ApprovalRequested {
            approval_id: approval.id,
            child_id: approval.child_id.clone(),
            amount: approval.amount,
            currency: approval.currency.clone(),
        }));
        self.broadcaster.broadcast(Event::new(
            profile.family_id.clone(),
            EventPayload::PurchasePending {
                approval_id: approval.id,
                child_id: approval.child_id.clone(),
                platform: approval.platform,
                game_title: approval.game_title.clone(),
                item_name: approval.item_name.clone(),
                amount: approval.amount,
                currency: approval.currency.clone(),
            },
        ));

        info!(
            parent: &ctx.span,
            approval_id = %approval.id,
            child_id = %approval.child_id,
            amount = %approval.amount,
            "Purchase pending guardian approval"
        );
        Ok(approval.id)
    }

    fn profile(&self, child_id: &ChildId) -> Result<&ChildProfile> {
        self.directory
            .child(child_id)
            .ok_or_else(|| HearthError::not_found(format!("child {}", child_id)))
    }
}
