//! Validated configuration structures

use crate::schema::{RawChildPolicy, RawConfig, RawFamily, RawMember, RawServiceConfig};
use hearth_util::{data_dir_without_env, socket_path_without_env, Amount, ChildId, FamilyId, UserId};
use std::path::PathBuf;
use std::time::Duration;

/// Validated configuration ready for use by the core
#[derive(Debug, Clone)]
pub struct OversightConfig {
    pub service: ServiceConfig,
    pub families: Vec<Family>,
}

impl OversightConfig {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            families: raw.families.into_iter().map(Family::from_raw).collect(),
        }
    }

    /// Get family by ID
    pub fn get_family(&self, id: &FamilyId) -> Option<&Family> {
        self.families.iter().find(|f| &f.id == id)
    }

    pub fn child_count(&self) -> usize {
        self.families
            .iter()
            .flat_map(|f| &f.members)
            .filter(|m| m.is_child())
            .count()
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub workers: usize,
    pub status_cache_ttl: Duration,
    pub approval_ttl: Duration,
    pub expiry_sweep_interval: Duration,
    pub request_timeout: Duration,
    pub store_retry_attempts: u32,
    pub store_retry_backoff: Duration,
    pub service_uids: Vec<u32>,
}

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_STATUS_CACHE_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_APPROVAL_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_STORE_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_STORE_RETRY_BACKOFF: Duration = Duration::from_millis(50);

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        let defaults = Self::default();
        Self {
            socket_path: raw.socket_path.unwrap_or(defaults.socket_path),
            data_dir: raw.data_dir.unwrap_or(defaults.data_dir),
            workers: raw.workers.unwrap_or(defaults.workers),
            status_cache_ttl: raw
                .status_cache_ttl_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.status_cache_ttl),
            approval_ttl: raw
                .approval_ttl_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.approval_ttl),
            expiry_sweep_interval: raw
                .expiry_sweep_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.expiry_sweep_interval),
            request_timeout: raw
                .request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            store_retry_attempts: raw
                .store_retry_attempts
                .unwrap_or(defaults.store_retry_attempts),
            store_retry_backoff: raw
                .store_retry_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_retry_backoff),
            service_uids: raw.service_uids,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: socket_path_without_env(),
            data_dir: data_dir_without_env(),
            workers: DEFAULT_WORKERS,
            status_cache_ttl: DEFAULT_STATUS_CACHE_TTL,
            approval_ttl: DEFAULT_APPROVAL_TTL,
            expiry_sweep_interval: DEFAULT_EXPIRY_SWEEP_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            store_retry_attempts: DEFAULT_STORE_RETRY_ATTEMPTS,
            store_retry_backoff: DEFAULT_STORE_RETRY_BACKOFF,
            service_uids: Vec::new(),
        }
    }
}

/// A family and its members
#[derive(Debug, Clone)]
pub struct Family {
    pub id: FamilyId,
    pub name: String,
    pub members: Vec<FamilyMember>,
}

impl Family {
    fn from_raw(raw: RawFamily) -> Self {
        let id = FamilyId::new(raw.id);
        let members = raw
            .members
            .into_iter()
            .map(|m| FamilyMember::from_raw(m, &id))
            .collect();
        Self {
            name: raw.name.unwrap_or_else(|| id.to_string()),
            id,
            members,
        }
    }

    pub fn guardians(&self) -> impl Iterator<Item = &FamilyMember> {
        self.members.iter().filter(|m| m.is_guardian())
    }

    pub fn children(&self) -> impl Iterator<Item = &FamilyMember> {
        self.members.iter().filter(|m| m.is_child())
    }
}

/// A member of a family. Capabilities are decided by matching on `role`.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyMember {
    pub id: UserId,
    pub family_id: FamilyId,
    pub display_name: String,
    pub role: MemberRole,
}

/// Role of a family member
#[derive(Debug, Clone, PartialEq)]
pub enum MemberRole {
    Guardian,
    Child { policy: ChildPolicy },
}

impl FamilyMember {
    fn from_raw(raw: RawMember, family_id: &FamilyId) -> Self {
        let role = match raw.role.to_ascii_lowercase().as_str() {
            "child" => MemberRole::Child {
                policy: ChildPolicy::from_raw(raw.policy.unwrap_or_default()),
            },
            // Anything else was rejected by validation
            _ => MemberRole::Guardian,
        };
        Self {
            display_name: raw.display_name.unwrap_or_else(|| raw.id.clone()),
            id: UserId::new(raw.id),
            family_id: family_id.clone(),
            role,
        }
    }

    pub fn is_guardian(&self) -> bool {
        matches!(self.role, MemberRole::Guardian)
    }

    pub fn is_child(&self) -> bool {
        matches!(self.role, MemberRole::Child { .. })
    }

    /// The child identity of this member, if it is a child
    pub fn child_id(&self) -> Option<ChildId> {
        match self.role {
            MemberRole::Child { .. } => Some(ChildId::new(self.id.as_str())),
            MemberRole::Guardian => None,
        }
    }

    pub fn child_policy(&self) -> Option<&ChildPolicy> {
        match &self.role {
            MemberRole::Child { policy } => Some(policy),
            MemberRole::Guardian => None,
        }
    }
}

/// Spend and screen-time policy for a child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildPolicy {
    pub max_daily_screen_time: Duration,
    pub daily_spending_limit: Amount,
    pub monthly_spending_limit: Amount,
    pub auto_approval_threshold: Amount,
    pub require_approval_for_purchases: bool,
    /// Upper-case currency code of the limits; purchases in other currencies
    /// are refused
    pub currency: String,
}

pub const DEFAULT_MAX_DAILY_SCREEN_TIME_MINUTES: u64 = 120;
pub const DEFAULT_CURRENCY: &str = "USD";

impl ChildPolicy {
    fn from_raw(raw: RawChildPolicy) -> Self {
        let defaults = Self::default();
        // Amounts were range-checked by validation
        let amount = |v: Option<f64>, fallback: Amount| {
            v.and_then(Amount::from_major).unwrap_or(fallback)
        };
        Self {
            max_daily_screen_time: raw
                .max_daily_screen_time_minutes
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.max_daily_screen_time),
            daily_spending_limit: amount(raw.daily_spending_limit, defaults.daily_spending_limit),
            monthly_spending_limit: amount(
                raw.monthly_spending_limit,
                defaults.monthly_spending_limit,
            ),
            auto_approval_threshold: amount(
                raw.auto_approval_threshold,
                defaults.auto_approval_threshold,
            ),
            require_approval_for_purchases: raw
                .require_approval_for_purchases
                .unwrap_or(defaults.require_approval_for_purchases),
            currency: raw
                .currency
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or(defaults.currency),
        }
    }
}

impl Default for ChildPolicy {
    /// Conservative: every purchase needs a guardian.
    fn default() -> Self {
        Self {
            max_daily_screen_time: Duration::from_secs(DEFAULT_MAX_DAILY_SCREEN_TIME_MINUTES * 60),
            daily_spending_limit: Amount::ZERO,
            monthly_spending_limit: Amount::ZERO,
            auto_approval_threshold: Amount::ZERO,
            require_approval_for_purchases: true,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}
