//! Oversight service facade composing the engine components

use chrono::{DateTime, Local};
use hearth_api::{
    ChildLiveStatus, Decision, EmergencyStopReport, GameSession, HealthStatus, InterceptOutcome,
    Platform, PurchaseApproval, PurchaseAttempt, SpendSummary,
};
use hearth_config::{OversightConfig, ServiceConfig};
use hearth_store::{AuditEvent, AuditEventType, Store};
use hearth_util::{ApprovalId, ChildId, ConnectionId, FamilyId, HearthError, Result, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::{
    ApprovalCoordinator, AuthorityScope, Authorizer, ChildLocks, ChildProfile,
    EmergencyControlService, EventSink, FamilyDirectory, LiveStatusCache,
    NotificationBroadcaster, PurchaseInterceptor, RequestContext, RetryPolicy, SessionTracker,
};

/// The real-time oversight engine.
///
/// Owns one instance of each component and routes every operation through the
/// authority checks the component itself does not perform (reads).
pub struct OversightService {
    service: ServiceConfig,
    store: Arc<dyn Store>,
    directory: Arc<FamilyDirectory>,
    authorizer: Arc<dyn Authorizer>,
    cache: Arc<LiveStatusCache>,
    broadcaster: Arc<NotificationBroadcaster>,
    sessions: Arc<SessionTracker>,
    purchases: Arc<PurchaseInterceptor>,
    approvals: Arc<ApprovalCoordinator>,
    emergency: Arc<EmergencyControlService>,
}

impl OversightService {
    /// Build the engine with the config-backed directory as authorizer
    pub fn new(config: &OversightConfig, store: Arc<dyn Store>) -> Self {
        let directory = Arc::new(FamilyDirectory::from_config(config));
        Self::with_authorizer(config, store, directory.clone(), directory)
    }

    pub fn with_authorizer(
        config: &OversightConfig,
        store: Arc<dyn Store>,
        directory: Arc<FamilyDirectory>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        let service = config.service.clone();
        let locks = Arc::new(ChildLocks::new());
        let cache = Arc::new(LiveStatusCache::new(service.status_cache_ttl));
        let broadcaster = Arc::new(NotificationBroadcaster::new(authorizer.clone()));

        let sessions = Arc::new(SessionTracker::new(
            store.clone(),
            directory.clone(),
            cache.clone(),
            broadcaster.clone(),
            locks.clone(),
        ));
        let purchases = Arc::new(PurchaseInterceptor::new(
            store.clone(),
            directory.clone(),
            cache.clone(),
            broadcaster.clone(),
            locks.clone(),
        ));
        let approvals = Arc::new(ApprovalCoordinator::new(
            store.clone(),
            directory.clone(),
            authorizer.clone(),
            cache.clone(),
            broadcaster.clone(),
            locks,
            RetryPolicy {
                attempts: service.store_retry_attempts,
                base_backoff: service.store_retry_backoff,
            },
            service.approval_ttl,
        ));
        let emergency = Arc::new(EmergencyControlService::new(
            store.clone(),
            directory.clone(),
            authorizer.clone(),
            sessions.clone(),
            broadcaster.clone(),
        ));

        let _ = store.append_audit(AuditEvent::new(AuditEventType::ConfigLoaded {
            family_count: config.families.len(),
            child_count: config.child_count(),
        }));
        info!(
            families = config.families.len(),
            children = config.child_count(),
            cache_ttl_secs = service.status_cache_ttl.as_secs(),
            approval_ttl_secs = service.approval_ttl.as_secs(),
            "Oversight engine initialized"
        );

        Self {
            service,
            store,
            directory,
            authorizer,
            cache,
            broadcaster,
            sessions,
            purchases,
            approvals,
            emergency,
        }
    }

    /// Request context with the client's timeout or the configured default
    pub fn context(
        &self,
        request_id: u64,
        actor: Option<UserId>,
        timeout_ms: Option<u64>,
    ) -> RequestContext {
        let timeout = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.service.request_timeout);
        RequestContext::new(request_id, actor, timeout)
    }

    pub fn service_config(&self) -> &ServiceConfig {
        &self.service
    }

    // Platform adapter events

    pub async fn session_started(
        &self,
        ctx: &RequestContext,
        child_id: &ChildId,
        platform: Platform,
        game_title: &str,
        at: DateTime<Local>,
    ) -> Result<GameSession> {
        self.sessions
            .start_session(ctx, child_id, platform, game_title, at)
            .await
    }

    pub async fn session_ended(
        &self,
        ctx: &RequestContext,
        child_id: &ChildId,
        platform: Platform,
        at: DateTime<Local>,
    ) -> Result<Option<GameSession>> {
        self.sessions.end_session(ctx, child_id, platform, at).await
    }

    pub async fn intercept_purchase(
        &self,
        ctx: &RequestContext,
        attempt: PurchaseAttempt,
    ) -> Result<InterceptOutcome> {
        self.purchases.intercept(ctx, attempt).await
    }

    // Guardian actions

    pub async fn resolve_approval(
        &self,
        ctx: &RequestContext,
        approval_id: &ApprovalId,
        decision: Decision,
        reason: Option<String>,
    ) -> Result<PurchaseApproval> {
        self.approvals.resolve(ctx, approval_id, decision, reason).await
    }

    pub async fn emergency_stop(
        &self,
        ctx: &RequestContext,
        child_id: &ChildId,
        reason: &str,
    ) -> Result<EmergencyStopReport> {
        self.emergency.stop(ctx, child_id, reason).await
    }

    /// Live status of every child in a family, in config order
    pub async fn live_status(
        &self,
        ctx: &RequestContext,
        family_id: &FamilyId,
    ) -> Result<Vec<ChildLiveStatus>> {
        self.require_authority(ctx, AuthorityScope::Family(family_id))
            .await?;
        let children = self
            .directory
            .children_of(family_id)
            .ok_or_else(|| HearthError::not_found(format!("family {}", family_id)))?;

        let mut statuses = Vec::with_capacity(children.len());
        for profile in children {
            statuses.push(self.child_status(profile).await?);
        }
        Ok(statuses)
    }

    pub async fn pending_approvals(
        &self,
        ctx: &RequestContext,
        child_id: &ChildId,
    ) -> Result<Vec<PurchaseApproval>> {
        self.require_authority(ctx, AuthorityScope::Child(child_id))
            .await?;
        self.known_child(child_id)?;
        self.approvals.pending_for(child_id)
    }

    pub async fn spend_summary(
        &self,
        ctx: &RequestContext,
        child_id: &ChildId,
    ) -> Result<SpendSummary> {
        self.require_authority(ctx, AuthorityScope::Child(child_id))
            .await?;
        self.known_child(child_id)?;
        self.purchases.spend_summary(child_id, hearth_util::now())
    }

    pub async fn subscribe(
        &self,
        ctx: &RequestContext,
        connection_id: ConnectionId,
        family_id: &FamilyId,
        sink: EventSink,
    ) -> Result<()> {
        // An unknown family gets the same refusal as someone else's family
        let joined = if self.directory.has_family(family_id) {
            self.broadcaster
                .join(ctx, connection_id, family_id, sink)
                .await
        } else {
            Err(ctx.actor().map_or_else(
                |e| e,
                |user_id| {
                    HearthError::unauthorized(format!(
                        "{} is not a guardian of family {}",
                        user_id, family_id
                    ))
                },
            ))
        };

        let user_id = ctx.actor.clone();
        let event = match (&joined, user_id) {
            (Ok(()), Some(user_id)) => AuditEventType::SubscriberJoined {
                connection_id: connection_id.to_string(),
                family_id: family_id.clone(),
                user_id,
            },
            (_, user_id) => AuditEventType::SubscriberRefused {
                connection_id: connection_id.to_string(),
                family_id: family_id.clone(),
                user_id,
            },
        };
        let _ = self.store.append_audit(AuditEvent::new(event));
        joined
    }

    /// Remove a connection from every family group
    pub fn unsubscribe(&self, connection_id: &ConnectionId) -> usize {
        self.broadcaster.leave(connection_id)
    }

    // Maintenance

    pub async fn expire_stale(&self, ctx: &RequestContext) -> Result<Vec<ApprovalId>> {
        self.approvals.expire_stale(ctx, hearth_util::now()).await
    }

    pub fn health(&self) -> HealthStatus {
        let store_ok = self.store.is_healthy();
        HealthStatus {
            live: true,
            ready: store_ok,
            store_ok,
            subscriber_count: self.broadcaster.subscriber_count(),
        }
    }

    /// Notify subscribers and record the stop
    pub fn shutdown(&self) {
        self.broadcaster.broadcast_shutdown();
        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStopped));
    }

    // Component access

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn directory(&self) -> &Arc<FamilyDirectory> {
        &self.directory
    }

    pub fn cache(&self) -> &Arc<LiveStatusCache> {
        &self.cache
    }

    pub fn broadcaster(&self) -> &Arc<NotificationBroadcaster> {
        &self.broadcaster
    }

    pub fn sessions(&self) -> &Arc<SessionTracker> {
        &self.sessions
    }

    pub fn purchases(&self) -> &Arc<PurchaseInterceptor> {
        &self.purchases
    }

    pub fn approvals(&self) -> &Arc<ApprovalCoordinator> {
        &self.approvals
    }

    pub fn emergency(&self) -> &Arc<EmergencyControlService> {
        &self.emergency
    }

    async fn child_status(&self, profile: &ChildProfile) -> Result<ChildLiveStatus> {
        let sessions = self.sessions.clone();
        let approvals = self.approvals.clone();
        self.cache
            .get_or_compute(&profile.child_id, || async move {
                build_live_status(profile, &sessions, &approvals, hearth_util::now())
            })
            .await
    }

    fn known_child(&self, child_id: &ChildId) -> Result<()> {
        self.directory
            .child(child_id)
            .map(|_| ())
            .ok_or_else(|| HearthError::not_found(format!("child {}", child_id)))
    }

    async fn require_authority(&self, ctx: &RequestContext, scope: AuthorityScope<'_>) -> Result<()> {
        let user_id = ctx.actor()?;
        if self.authorizer.has_guardian_authority(user_id, scope).await? {
            Ok(())
        } else {
            Err(HearthError::unauthorized(format!(
                "{} has no guardian authority here",
                user_id
            )))
        }
    }
}

fn build_live_status(
    profile: &ChildProfile,
    sessions: &SessionTracker,
    approvals: &ApprovalCoordinator,
    now: DateTime<Local>,
) -> Result<ChildLiveStatus> {
    let active = sessions.active_sessions(&profile.child_id)?;
    let current = active.iter().max_by_key(|s| s.started_at);
    let used = sessions.today_screen_time(&profile.child_id, now)?;

    Ok(ChildLiveStatus {
        child_id: profile.child_id.clone(),
        display_name: profile.display_name.clone(),
        is_gaming: current.is_some(),
        current_game: current.map(|s| s.game_title.clone()),
        current_platform: current.map(|s| s.platform),
        session_duration: current.map(|s| s.duration_at(now)).unwrap_or_default(),
        remaining_screen_time: profile.policy.max_daily_screen_time.saturating_sub(used),
        pending_approvals: approvals.pending_for(&profile.child_id)?,
        active_sessions: active,
        computed_at: now,
    })
}
