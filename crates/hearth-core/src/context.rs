//! Request-scoped context passed explicitly through every operation

use hearth_util::{HearthError, Result, UserId};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info_span, Span};

/// Identity, deadline and tracing span of one inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: u64,
    pub actor: Option<UserId>,
    pub deadline: Instant,
    pub span: Span,
}

impl RequestContext {
    pub fn new(request_id: u64, actor: Option<UserId>, timeout: Duration) -> Self {
        let span = info_span!(
            "request",
            request_id,
            actor = actor.as_ref().map(|a| a.as_str()).unwrap_or("-")
        );
        Self {
            request_id,
            actor,
            deadline: Instant::now() + timeout,
            span,
        }
    }

    /// Context for work the service starts on its own (expiry sweep)
    pub fn system(timeout: Duration) -> Self {
        let span = info_span!("maintenance");
        Self {
            request_id: 0,
            actor: None,
            deadline: Instant::now() + timeout,
            span,
        }
    }

    /// The authenticated user, or `Unauthorized` for anonymous requests
    pub fn actor(&self) -> Result<&UserId> {
        self.actor
            .as_ref()
            .ok_or_else(|| HearthError::unauthorized("request carries no authenticated user"))
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_context_has_no_actor() {
        let ctx = RequestContext::new(1, None, Duration::from_secs(1));
        assert!(matches!(ctx.actor(), Err(HearthError::Unauthorized(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expires() {
        let ctx = RequestContext::new(1, Some(UserId::new("ana")), Duration::from_millis(50));
        assert!(!ctx.is_expired());
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }
}
