//! Command handling for one request

use hearth_api::{
    ClientInfo, Command, ErrorCode, ErrorInfo, Request, Response, ResponsePayload, API_VERSION,
};
use hearth_core::{EventSink, OversightService, RequestContext};
use hearth_util::{HearthError, Result};
use tracing::{debug, Instrument};

/// A request taken off the socket. Its deadline starts running on receipt,
/// so time spent queued behind busy workers counts against it.
pub struct PendingRequest {
    ctx: RequestContext,
    command: Command,
}

impl PendingRequest {
    /// Check the protocol version and start the request's deadline
    pub fn admit(
        service: &OversightService,
        request: Request,
    ) -> std::result::Result<Self, Response> {
        if request.api_version != API_VERSION {
            return Err(Response::error(
                request.request_id,
                ErrorInfo::new(
                    ErrorCode::InvalidRequest,
                    format!(
                        "unsupported api version {} (expected {})",
                        request.api_version, API_VERSION
                    ),
                ),
            ));
        }
        Ok(Self {
            ctx: service.context(request.request_id, request.actor, request.timeout_ms),
            command: request.command,
        })
    }

    /// Run against the engine and build the response.
    ///
    /// `sink` is the connection's event channel; only `Subscribe` uses it.
    pub async fn run(
        self,
        service: &OversightService,
        client: &ClientInfo,
        sink: Option<EventSink>,
    ) -> Response {
        let Self { ctx, command } = self;
        let request_id = ctx.request_id;

        let result = if ctx.is_expired() {
            Err(HearthError::deadline("dispatch"))
        } else {
            let span = ctx.span.clone();
            execute(service, client, sink, &ctx, command)
                .instrument(span)
                .await
        };

        match result {
            Ok(payload) => Response::success(request_id, payload),
            Err(e) => {
                debug!(request_id, connection_id = %client.connection_id, error = %e, "Request failed");
                Response::error(request_id, ErrorInfo::from(&e))
            }
        }
    }
}

/// Admit and run one request immediately
pub async fn handle_request(
    service: &OversightService,
    client: &ClientInfo,
    sink: Option<EventSink>,
    request: Request,
) -> Response {
    match PendingRequest::admit(service, request) {
        Ok(pending) => pending.run(service, client, sink).await,
        Err(response) => response,
    }
}

async fn execute(
    service: &OversightService,
    client: &ClientInfo,
    sink: Option<EventSink>,
    ctx: &RequestContext,
    command: Command,
) -> Result<ResponsePayload> {
    match command {
        Command::ReportSessionStarted {
            child_id,
            platform,
            game_title,
            at,
        } => {
            require(client.role.can_report_platform_events(), "report platform events")?;
            let at = at.unwrap_or_else(hearth_util::now);
            let session = service
                .session_started(ctx, &child_id, platform, &game_title, at)
                .await?;
            Ok(ResponsePayload::SessionStarted(session))
        }

        Command::ReportSessionEnded {
            child_id,
            platform,
            at,
        } => {
            require(client.role.can_report_platform_events(), "report platform events")?;
            let at = at.unwrap_or_else(hearth_util::now);
            let session = service.session_ended(ctx, &child_id, platform, at).await?;
            Ok(ResponsePayload::SessionEnded { session })
        }

        Command::InterceptPurchase { attempt } => {
            require(client.role.can_report_platform_events(), "report platform events")?;
            let outcome = service.intercept_purchase(ctx, attempt).await?;
            Ok(ResponsePayload::Purchase(outcome))
        }

        Command::ResolveApproval {
            approval_id,
            decision,
            reason,
        } => {
            let approval = service
                .resolve_approval(ctx, &approval_id, decision, reason)
                .await?;
            Ok(ResponsePayload::ApprovalResolved(approval))
        }

        Command::GetLiveStatus { family_id } => {
            let children = service.live_status(ctx, &family_id).await?;
            Ok(ResponsePayload::LiveStatus { children })
        }

        Command::ListPendingApprovals { child_id } => {
            let approvals = service.pending_approvals(ctx, &child_id).await?;
            Ok(ResponsePayload::PendingApprovals { approvals })
        }

        Command::GetSpendSummary { child_id } => {
            let summary = service.spend_summary(ctx, &child_id).await?;
            Ok(ResponsePayload::SpendSummary(summary))
        }

        Command::EmergencyStop { child_id, reason } => {
            let report = service.emergency_stop(ctx, &child_id, &reason).await?;
            Ok(ResponsePayload::EmergencyStopped(report))
        }

        Command::Subscribe { family_id } => {
            let sink = sink.ok_or_else(|| HearthError::internal("connection has no event channel"))?;
            service
                .subscribe(ctx, client.connection_id, &family_id, sink)
                .await?;
            Ok(ResponsePayload::Subscribed {
                connection_id: client.connection_id,
                family_id,
            })
        }

        Command::Unsubscribe => {
            service.unsubscribe(&client.connection_id);
            Ok(ResponsePayload::Unsubscribed)
        }

        Command::ExpireStaleApprovals => {
            require(client.role.can_run_maintenance(), "run maintenance")?;
            let approval_ids = service.expire_stale(ctx).await?;
            Ok(ResponsePayload::ApprovalsExpired { approval_ids })
        }

        Command::GetHealth => Ok(ResponsePayload::Health(service.health())),

        Command::Ping => Ok(ResponsePayload::Pong),
    }
}

fn require(allowed: bool, action: &str) -> Result<()> {
    if allowed {
        Ok(())
    } else {
        Err(HearthError::unauthorized(format!("client role may not {}", action)))
    }
}
