//! Gaming session tracking and screen-time accounting

use chrono::{DateTime, Local};
use hearth_api::{Event, EventPayload, GameSession, Platform, SessionEndReason};
use hearth_store::{AuditEvent, AuditEventType, Store};
use hearth_util::{ChildId, HearthError, Result, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, Instrument};

use crate::{ChildLocks, ChildProfile, FamilyDirectory, LiveStatusCache, NotificationBroadcaster, RequestContext};

/// Outcome of [`SessionTracker::terminate_all`]
#[derive(Debug, Default)]
pub struct Termination {
    pub ended: Vec<GameSession>,
    pub failure: Option<HearthError>,
}

/// Records session starts and ends reported by platform adapters.
///
/// At most one session per (child, platform) is active; a start on a platform
/// that already has an active session closes the old one at the new event's
/// time. Sessions on different platforms may overlap.
pub struct SessionTracker {
    store: Arc<dyn Store>,
    directory: Arc<FamilyDirectory>,
    cache: Arc<LiveStatusCache>,
    broadcaster: Arc<NotificationBroadcaster>,
    locks: Arc<ChildLocks>,
}

impl SessionTracker {
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

    pub async fn start_session(
        &self,
        ctx: &RequestContext,
        child_id: &ChildId,
        platform: Platform,
        game_title: &str,
        at: DateTime<Local>,
    ) -> Result<GameSession> {
        let game_title = game_title.trim();
        if game_title.is_empty() {
            return Err(HearthError::validation("game title cannot be empty"));
        }
        let profile = self.profile(child_id)?;

        let _guard = self.locks.acquire(ctx, child_id).instrument(ctx.span.clone()).await?;

        // The replaced session stays closed even if the insert below fails
        let replaced = match self.store.active_session_on(child_id, platform)? {
            Some(mut prior) => {
                self.store.close_session(&prior.id, at)?;
                prior.ended_at = Some(at);
                self.cache.invalidate(child_id);
                self.announce_end(profile, &prior, SessionEndReason::Replaced, at);
                Some(prior)
            }
            None => None,
        };

        let session = GameSession {
            id: SessionId::new(),
            child_id: child_id.clone(),
            platform,
            game_title: game_title.to_string(),
            started_at: at,
            ended_at: None,
        };
        let inserted = self.store.insert_session(&session);
        self.cache.invalidate(child_id);
        inserted?;

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::SessionStarted {
            session_id: session.id,
            child_id: child_id.clone(),
            platform,
            game_title: session.game_title.clone(),
        }));
        self.broadcaster.broadcast(Event::new(
            profile.family_id.clone(),
            EventPayload::SessionStarted {
                session_id: session.id,
                child_id: child_id.clone(),
                platform,
                game_title: session.game_title.clone(),
                started_at: at,
            },
        ));

        info!(
            parent: &ctx.span,
            session_id = %session.id,
            child_id = %child_id,
            platform = %platform,
            game = %session.game_title,
            replaced = replaced.is_some(),
            "Session started"
        );
        Ok(session)
    }

    /// Close the active session on a platform. Returns `None` when there was
    /// nothing to close.
    pub async fn end_session(
        &self,
        ctx: &RequestContext,
        child_id: &ChildId,
        platform: Platform,
        at: DateTime<Local>,
    ) -> Result<Option<GameSession>> {
        let profile = self.profile(child_id)?;
        let _guard = self.locks.acquire(ctx, child_id).instrument(ctx.span.clone()).await?;

        let Some(mut session) = self.store.active_session_on(child_id, platform)? else {
            debug!(parent: &ctx.span, child_id = %child_id, platform = %platform, "No active session to end");
            return Ok(None);
        };

        if !self.store.close_session(&session.id, at)? {
            return Ok(None);
        }
        session.ended_at = Some(at);
        self.cache.invalidate(child_id);
        self.announce_end(profile, &session, SessionEndReason::PlatformEnded, at);

        info!(
            parent: &ctx.span,
            session_id = %session.id,
            child_id = %child_id,
            platform = %platform,
            "Session ended"
        );
        Ok(Some(session))
    }

    /// End every active session of a child. Invalidates the child's status but
    /// broadcasts nothing; the caller announces why they ended.
    ///
    /// A store failure part way through stops the loop. Sessions closed
    /// before it are still reported alongside the failure.
    pub async fn terminate_all(
        &self,
        ctx: &RequestContext,
        child_id: &ChildId,
        at: DateTime<Local>,
    ) -> Result<Termination> {
        let _guard = self.locks.acquire(ctx, child_id).instrument(ctx.span.clone()).await?;

        let mut termination = Termination::default();
        for mut session in self.store.active_sessions(child_id)? {
            match self.store.close_session(&session.id, at) {
                Ok(true) => {
                    session.ended_at = Some(at);
                    termination.ended.push(session);
                }
                Ok(false) => {}
                Err(e) => {
                    termination.failure = Some(e.into());
                    break;
                }
            }
        }
        self.cache.invalidate(child_id);

        for session in &termination.ended {
            let _ = self.store.append_audit(AuditEvent::new(AuditEventType::SessionEnded {
                session_id: session.id,
                child_id: child_id.clone(),
                reason: SessionEndReason::EmergencyStop,
                duration: session.duration_at(at),
            }));
        }
        Ok(termination)
    }

    pub fn active_sessions(&self, child_id: &ChildId) -> Result<Vec<GameSession>> {
        Ok(self.store.active_sessions(child_id)?)
    }

    /// Play time of sessions that started today, with active ones clipped to `now`
    pub fn today_screen_time(&self, child_id: &ChildId, now: DateTime<Local>) -> Result<Duration> {
        let since = hearth_util::start_of_day(&now);
        let sessions = self.store.sessions_started_since(child_id, since)?;
        Ok(sessions.iter().map(|s| s.duration_at(now)).sum())
    }

    /// `max(0, daily limit - today's play time)`
    pub fn remaining_screen_time(
        &self,
        child_id: &ChildId,
        now: DateTime<Local>,
    ) -> Result<Duration> {
        let profile = self.profile(child_id)?;
        let used = self.today_screen_time(child_id, now)?;
        Ok(profile.policy.max_daily_screen_time.saturating_sub(used))
    }

    fn profile(&self, child_id: &ChildId) -> Result<&ChildProfile> {
        self.directory
            .child(child_id)
            .ok_or_else(|| HearthError::not_found(format!("child {}", child_id)))
    }

    fn announce_end(
        &self,
        profile: &ChildProfile,
        session: &GameSession,
        reason: SessionEndReason,
        at: DateTime<Local>,
    ) {
        let duration = session.duration_at(at);
        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::SessionEnded {
            session_id: session.id,
            child_id: session.child_id.clone(),
            reason,
            duration,
        }));
        self.broadcaster.broadcast(session_ended_event(profile, session, reason, duration));
    }
}

pub(crate) fn session_ended_event(
    profile: &ChildProfile,
    session: &GameSession,
    reason: SessionEndReason,
    duration: Duration,
) -> Event {
    Event::new(
        profile.family_id.clone(),
        EventPayload::SessionEnded {
            session_id: session.id,
            child_id: session.child_id.clone(),
            platform: session.platform,
            reason,
            duration,
        },
    )
}
