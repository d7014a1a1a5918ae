//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Global service settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Families overseen by this instance
    #[serde(default)]
    pub families: Vec<RawFamily>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path (default: $XDG_RUNTIME_DIR/hearthd/hearthd.sock)
    pub socket_path: Option<PathBuf>,

    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Number of general request workers
    pub workers: Option<usize>,

    /// Live status cache TTL in seconds
    pub status_cache_ttl_seconds: Option<u64>,

    /// Age after which a pending approval expires, in seconds
    pub approval_ttl_seconds: Option<u64>,

    /// How often the expiry sweep runs, in seconds
    pub expiry_sweep_interval_seconds: Option<u64>,

    /// Default per-request deadline in milliseconds
    pub request_timeout_ms: Option<u64>,

    /// Attempts for a conditional store update before giving up
    pub store_retry_attempts: Option<u32>,

    /// Base backoff between store retries in milliseconds (doubles per attempt)
    pub store_retry_backoff_ms: Option<u64>,

    /// Peer UIDs treated as trusted platform adapter bridges (in addition to
    /// root and the service's own UID)
    #[serde(default)]
    pub service_uids: Vec<u32>,
}

/// Raw family definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawFamily {
    /// Unique stable ID
    pub id: String,

    /// Display name
    pub name: Option<String>,

    #[serde(default)]
    pub members: Vec<RawMember>,
}

/// Raw family member
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawMember {
    /// Unique user ID (also the child ID for children)
    pub id: String,

    pub display_name: Option<String>,

    /// "guardian" or "child"
    pub role: String,

    /// Spend/time policy; only valid for children
    pub policy: Option<RawChildPolicy>,
}

/// Raw child policy. Amounts are decimal major units (e.g. `20.00`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawChildPolicy {
    pub max_daily_screen_time_minutes: Option<u64>,
    pub daily_spending_limit: Option<f64>,
    pub monthly_spending_limit: Option<f64>,
    pub auto_approval_threshold: Option<f64>,
    pub require_approval_for_purchases: Option<bool>,
    /// ISO 4217 code the amounts above are expressed in
    pub currency: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_family_with_members() {
        let toml_str = r#"
            config_version = 1

            [[families]]
            id = "rivera"
            name = "Rivera"

            [[families.members]]
            id = "ana"
            role = "guardian"

            [[families.members]]
            id = "maya"
            role = "child"

            [families.members.policy]
            max_daily_screen_time_minutes = 90
            daily_spending_limit = 20.00
            auto_approval_threshold = 5.00
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.families.len(), 1);
        let members = &config.families[0].members;
        assert_eq!(members.len(), 2);
        assert!(members[0].policy.is_none());
        let policy = members[1].policy.as_ref().unwrap();
        assert_eq!(policy.daily_spending_limit, Some(20.0));
        assert_eq!(policy.monthly_spending_limit, None);
    }

    #[test]
    fn parse_service_section() {
        let toml_str = r#"
            config_version = 1

            [service]
            workers = 8
            status_cache_ttl_seconds = 15
            service_uids = [1001]
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.service.workers, Some(8));
        assert_eq!(config.service.status_cache_ttl_seconds, Some(15));
        assert_eq!(config.service.service_uids, vec![1001]);
        assert!(config.families.is_empty());
    }
}
