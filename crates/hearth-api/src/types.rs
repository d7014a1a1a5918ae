//! Shared domain types for the hearthd API

use chrono::{DateTime, Local};
use hearth_util::{Amount, ApprovalId, ChildId, PurchaseId, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Gaming platform a session or purchase originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Steam,
    Xbox,
    PlayStation,
    Nintendo,
    Mobile,
    Pc,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Steam => "steam",
            Platform::Xbox => "xbox",
            Platform::PlayStation => "playstation",
            Platform::Nintendo => "nintendo",
            Platform::Mobile => "mobile",
            Platform::Pc => "pc",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "steam" => Ok(Platform::Steam),
            "xbox" => Ok(Platform::Xbox),
            "playstation" | "psn" => Ok(Platform::PlayStation),
            "nintendo" | "switch" => Ok(Platform::Nintendo),
            "mobile" => Ok(Platform::Mobile),
            "pc" => Ok(Platform::Pc),
            other => Err(format!("unknown platform '{}'", other)),
        }
    }
}

/// A gaming session. `ended_at == None` means the session is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSession {
    pub id: SessionId,
    pub child_id: ChildId,
    pub platform: Platform,
    pub game_title: String,
    pub started_at: DateTime<Local>,
    pub ended_at: Option<DateTime<Local>>,
}

impl GameSession {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Elapsed play time, with an active session clipped to `now`.
    pub fn duration_at(&self, now: DateTime<Local>) -> Duration {
        let end = match self.ended_at {
            Some(end) if end < now => end,
            _ => now,
        };
        hearth_util::elapsed_between(&self.started_at, &end)
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// Platform reported the session ended
    PlatformEnded,
    /// A new session on the same platform replaced it
    Replaced,
    /// A guardian issued an emergency stop
    EmergencyStop,
}

/// Lifecycle state of a purchase approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Denied => "denied",
            ApprovalStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "denied" => Some(ApprovalStatus::Denied),
            "expired" => Some(ApprovalStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

/// A guardian's decision on a pending approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Deny,
}

impl Decision {
    pub fn target_status(&self) -> ApprovalStatus {
        match self {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Deny => ApprovalStatus::Denied,
        }
    }
}

/// A purchase attempt reported by a platform adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseAttempt {
    pub child_id: ChildId,
    pub platform: Platform,
    pub game_title: String,
    pub item_name: String,
    pub amount: Amount,
    pub currency: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A purchase that needed (or still needs) a guardian decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseApproval {
    pub id: ApprovalId,
    pub child_id: ChildId,
    pub platform: Platform,
    pub game_title: String,
    pub item_name: String,
    pub amount: Amount,
    pub currency: String,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Local>,
    pub resolved_at: Option<DateTime<Local>>,
    pub resolved_by: Option<UserId>,
    pub reason: Option<String>,
}

/// Result of intercepting a purchase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InterceptOutcome {
    AutoApproved { purchase_id: PurchaseId },
    PendingApproval { approval_id: ApprovalId },
}

/// Aggregated live view of one child
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildLiveStatus {
    pub child_id: ChildId,
    pub display_name: String,
    pub is_gaming: bool,
    pub current_game: Option<String>,
    pub current_platform: Option<Platform>,
    /// Elapsed time of the most recently started active session
    pub session_duration: Duration,
    pub remaining_screen_time: Duration,
    pub active_sessions: Vec<GameSession>,
    /// Ordered by `requested_at`
    pub pending_approvals: Vec<PurchaseApproval>,
    pub computed_at: DateTime<Local>,
}

/// Approved spend for a child against its limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendSummary {
    pub child_id: ChildId,
    pub today: Amount,
    pub this_month: Amount,
    pub daily_limit: Amount,
    pub monthly_limit: Amount,
    pub auto_approval_threshold: Amount,
    /// Currency of every amount above
    pub currency: String,
}

/// Outcome of an emergency stop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyStopReport {
    pub child_id: ChildId,
    pub initiator_id: UserId,
    pub reason: String,
    pub terminated: Vec<GameSession>,
    pub executed_at: DateTime<Local>,
}

/// Role of a connected transport client, derived from peer credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Trusted local service (platform adapter bridge); may report platform events
    Service,
    /// Family app client; guardian authority is still checked per request
    Member,
}

impl ClientRole {
    pub fn can_report_platform_events(&self) -> bool {
        matches!(self, ClientRole::Service)
    }

    pub fn can_run_maintenance(&self) -> bool {
        matches!(self, ClientRole::Service)
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub store_ok: bool,
    pub subscriber_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_round_trips_through_str() {
        for p in [Platform::Steam, Platform::PlayStation, Platform::Pc] {
            assert_eq!(p.as_str().parse::<Platform>(), Ok(p));
        }
        assert_eq!("Steam".parse::<Platform>(), Ok(Platform::Steam));
        assert!("atari".parse::<Platform>().is_err());
    }

    #[test]
    fn platform_serializes_lowercase() {
        let json = serde_json::to_string(&Platform::PlayStation).unwrap();
        assert_eq!(json, "\"playstation\"");
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!ApprovalStatus::Pending.is_terminal());
        assert!(ApprovalStatus::Approved.is_terminal());
        assert!(ApprovalStatus::Denied.is_terminal());
        assert!(ApprovalStatus::Expired.is_terminal());
    }

    #[test]
    fn active_session_duration_is_clipped_to_now() {
        let start = hearth_util::now();
        let session = GameSession {
            id: SessionId::new(),
            child_id: ChildId::new("maya"),
            platform: Platform::Steam,
            game_title: "Celeste".into(),
            started_at: start,
            ended_at: None,
        };
        let now = start + chrono::Duration::minutes(10);
        assert_eq!(session.duration_at(now), Duration::from_secs(600));
    }

    #[test]
    fn intercept_outcome_is_tagged() {
        let outcome = InterceptOutcome::PendingApproval {
            approval_id: ApprovalId::new(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"outcome\":\"pending_approval\""));
    }
}
