//! Guardian-initiated emergency stop

use hearth_api::{EmergencyStopReport, Event, EventPayload, SessionEndReason};
use hearth_store::{AuditEvent, AuditEventType, Store};
use hearth_util::{ChildId, HearthError, Result, UserId};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::session::session_ended_event;
use crate::{
    AuthorityScope, Authorizer, FamilyDirectory, NotificationBroadcaster, RequestContext,
    SessionTracker,
};

/// Terminates every active session of a child on a guardian's order.
///
/// Runs on the dispatcher's priority lane. Failures are logged at error level
/// and returned as-is.
pub struct EmergencyControlService {
    store: Arc<dyn Store>,
    directory: Arc<FamilyDirectory>,
    authorizer: Arc<dyn Authorizer>,
    sessions: Arc<SessionTracker>,
    broadcaster: Arc<NotificationBroadcaster>,
}

impl EmergencyControlService {
    pub fn new(
        store: Arc<dyn Store>,
        directory: Arc<FamilyDirectory>,
        authorizer: Arc<dyn Authorizer>,
        sessions: Arc<SessionTracker>,
        broadcaster: Arc<NotificationBroadcaster>,
    ) -> Self {
        Self {
            store,
            directory,
            authorizer,
            sessions,
            broadcaster,
        }
    }

    pub async fn stop(
        &self,
        ctx: &RequestContext,
        child_id: &ChildId,
        reason: &str,
    ) -> Result<EmergencyStopReport> {
        let result = self.execute(ctx, child_id, reason).await;
        if let Err(e) = &result {
            error!(
                parent: &ctx.span,
                child_id = %child_id,
                initiator = ctx.actor.as_ref().map(|a| a.as_str()).unwrap_or("-"),
                error = %e,
                "Emergency stop failed"
            );
        }
        result
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        child_id: &ChildId,
        reason: &str,
    ) -> Result<EmergencyStopReport> {
        let initiator: UserId = ctx.actor()?.clone();
        let allowed = self
            .authorizer
            .has_guardian_authority(&initiator, AuthorityScope::Child(child_id))
            .await?;
        if !allowed {
            return Err(HearthError::unauthorized(format!(
                "{} is not a guardian of child {}",
                initiator, child_id
            )));
        }
        let profile = self
            .directory
            .child(child_id)
            .ok_or_else(|| HearthError::not_found(format!("child {}", child_id)))?;

        let executed_at = hearth_util::now();
        // Invalidates the child's live status before returning
        let termination = self.sessions.terminate_all(ctx, child_id, executed_at).await?;
        let terminated = termination.ended;

        for session in &terminated {
            self.broadcaster.broadcast(session_ended_event(
                profile,
                session,
                SessionEndReason::EmergencyStop,
                session.duration_at(executed_at),
            ));
        }
        if let Some(failure) = termination.failure {
            warn!(
                parent: &ctx.span,
                child_id = %child_id,
                terminated = terminated.len(),
                "Emergency stop closed only some sessions"
            );
            return Err(failure);
        }
        self.broadcaster.broadcast(Event::new(
            profile.family_id.clone(),
            EventPayload::EmergencyStopExecuted {
                child_id: child_id.clone(),
                initiator_id: initiator.clone(),
                reason: reason.to_string(),
                terminated_sessions: terminated.iter().map(|s| s.id).collect(),
            },
        ));

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::EmergencyStop {
            child_id: child_id.clone(),
            initiator_id: initiator.clone(),
            reason: reason.to_string(),
            terminated_sessions: terminated.len(),
        }));
        info!(
            parent: &ctx.span,
            child_id = %child_id,
            initiator = %initiator,
            terminated = terminated.len(),
            reason,
            "Emergency stop executed"
        );

        Ok(EmergencyStopReport {
            child_id: child_id.clone(),
            initiator_id: initiator,
            reason: reason.to_string(),
            terminated,
            executed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Fixture, FlakyStore};
    use hearth_api::Platform;
    use hearth_store::SqliteStore;

    #[tokio::test]
    async fn stop_ends_every_session_and_announces_it() {
        let fx = Fixture::new();
        let maya = ChildId::new("maya");
        let now = hearth_util::now();
        for platform in [Platform::Steam, Platform::PlayStation] {
            fx.sessions
                .start_session(&fx.ctx("svc"), &maya, platform, "Game", now)
                .await
                .unwrap();
        }
        let mut rx = fx.subscribe("ben", "rivera").await;

        let report = fx
            .emergency
            .stop(&fx.ctx("ana"), &maya, "bedtime")
            .await
            .unwrap();
        assert_eq!(report.terminated.len(), 2);
        assert!(fx.sessions.active_sessions(&maya).unwrap().is_empty());

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 3);
        assert!(events[..2].iter().all(|e| matches!(
            e.payload,
            EventPayload::SessionEnded { reason: SessionEndReason::EmergencyStop, .. }
        )));
        match &events[2].payload {
            EventPayload::EmergencyStopExecuted {
                initiator_id,
                reason,
                terminated_sessions,
                ..
            } => {
                assert_eq!(initiator_id, &UserId::new("ana"));
                assert_eq!(reason, "bedtime");
                assert_eq!(terminated_sessions.len(), 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn stop_with_nothing_running_still_succeeds() {
        let fx = Fixture::new();
        let report = fx
            .emergency
            .stop(&fx.ctx("ana"), &ChildId::new("leo"), "check")
            .await
            .unwrap();
        assert!(report.terminated.is_empty());
    }

    #[tokio::test]
    async fn non_guardian_cannot_stop() {
        let fx = Fixture::new();
        let maya = ChildId::new("maya");
        fx.sessions
            .start_session(&fx.ctx("svc"), &maya, Platform::Steam, "Game", hearth_util::now())
            .await
            .unwrap();

        let err = fx.emergency.stop(&fx.ctx("wei"), &maya, "nope").await.unwrap_err();
        assert!(matches!(err, HearthError::Unauthorized(_)));
        assert_eq!(fx.sessions.active_sessions(&maya).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_stop_still_announces_what_it_closed() {
        let flaky = Arc::new(FlakyStore::new(SqliteStore::in_memory().unwrap()));
        let fx = Fixture::with_store(flaky.clone());
        let maya = ChildId::new("maya");
        let now = hearth_util::now();
        for platform in [Platform::Steam, Platform::Xbox] {
            fx.sessions
                .start_session(&fx.ctx("svc"), &maya, platform, "Game", now)
                .await
                .unwrap();
        }
        let mut rx = fx.subscribe("ben", "rivera").await;

        flaky.fail_session_closes_after(1, 1);
        let err = fx
            .emergency
            .stop(&fx.ctx("ana"), &maya, "bedtime")
            .await
            .unwrap_err();
        assert!(matches!(err, HearthError::Upstream(_)));
        assert_eq!(fx.sessions.active_sessions(&maya).unwrap().len(), 1);

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].payload,
            EventPayload::SessionEnded { reason: SessionEndReason::EmergencyStop, .. }
        ));
    }
}
