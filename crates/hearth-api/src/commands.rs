//! Command types for the hearthd protocol

use chrono::{DateTime, Local};
use hearth_util::{ApprovalId, ChildId, ConnectionId, FamilyId, HearthError, UserId};
use serde::{Deserialize, Serialize};

use crate::{
    ChildLiveStatus, ClientRole, Decision, EmergencyStopReport, GameSession, HealthStatus,
    InterceptOutcome, Platform, PurchaseApproval, PurchaseAttempt, SpendSummary, API_VERSION,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Authenticated user on whose behalf the command runs
    #[serde(default)]
    pub actor: Option<UserId>,
    /// Client-side deadline; the service default applies when absent
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            actor: None,
            timeout_ms: None,
            command,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<UserId>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&HearthError> for ErrorInfo {
    fn from(err: &HearthError) -> Self {
        let code = match err {
            HearthError::Validation(_) => ErrorCode::ValidationFailed,
            HearthError::NotFound(_) => ErrorCode::NotFound,
            HearthError::Unauthorized(_) => ErrorCode::Unauthorized,
            HearthError::Conflict(_) => ErrorCode::Conflict,
            HearthError::Upstream(_) => ErrorCode::UpstreamError,
            HearthError::DeadlineExceeded(_) => ErrorCode::DeadlineExceeded,
            HearthError::RateLimited => ErrorCode::RateLimited,
            HearthError::Internal(_) => ErrorCode::InternalError,
        };
        Self::new(code, err.to_string())
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    ValidationFailed,
    NotFound,
    Unauthorized,
    Conflict,
    UpstreamError,
    DeadlineExceeded,
    RateLimited,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // Platform adapter events

    /// A game session started on a platform
    ReportSessionStarted {
        child_id: ChildId,
        platform: Platform,
        game_title: String,
        /// Event time; defaults to receipt time
        #[serde(default)]
        at: Option<DateTime<Local>>,
    },

    /// A game session ended on a platform
    ReportSessionEnded {
        child_id: ChildId,
        platform: Platform,
        #[serde(default)]
        at: Option<DateTime<Local>>,
    },

    /// A child attempted a purchase
    InterceptPurchase { attempt: PurchaseAttempt },

    // Guardian actions

    /// Approve or deny a pending purchase
    ResolveApproval {
        approval_id: ApprovalId,
        decision: Decision,
        #[serde(default)]
        reason: Option<String>,
    },

    /// Live status of every child in a family
    GetLiveStatus { family_id: FamilyId },

    /// Pending approvals for one child, oldest first
    ListPendingApprovals { child_id: ChildId },

    /// Approved spend against limits
    GetSpendSummary { child_id: ChildId },

    /// Terminate every active session of a child
    EmergencyStop { child_id: ChildId, reason: String },

    /// Join the family's event group on this connection
    Subscribe { family_id: FamilyId },

    /// Leave every family group on this connection
    Unsubscribe,

    // Maintenance

    /// Run the approval expiry sweep now
    ExpireStaleApprovals,

    /// Get health status
    GetHealth,

    /// Ping for keepalive
    Ping,
}

impl Command {
    /// Whether this command is dispatched on the priority lane
    pub fn is_urgent(&self) -> bool {
        matches!(self, Command::EmergencyStop { .. })
    }
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    SessionStarted(GameSession),
    SessionEnded { session: Option<GameSession> },
    Purchase(InterceptOutcome),
    ApprovalResolved(PurchaseApproval),
    LiveStatus { children: Vec<ChildLiveStatus> },
    PendingApprovals { approvals: Vec<PurchaseApproval> },
    SpendSummary(SpendSummary),
    EmergencyStopped(EmergencyStopReport),
    Subscribed {
        connection_id: ConnectionId,
        family_id: FamilyId,
    },
    Unsubscribed,
    ApprovalsExpired { approval_ids: Vec<ApprovalId> },
    Health(HealthStatus),
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub connection_id: ConnectionId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}
