//! Configuration validation

use crate::schema::{RawChildPolicy, RawConfig, RawFamily, RawMember};
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Family '{family_id}': {message}")]
    FamilyError { family_id: String, message: String },

    #[error("Member '{member_id}': {message}")]
    MemberError { member_id: String, message: String },

    #[error("Duplicate family ID: {0}")]
    DuplicateFamilyId(String),

    #[error("Duplicate member ID: {0}")]
    DuplicateMemberId(String),

    #[error("Service config error: {0}")]
    ServiceError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    errors.extend(validate_service(config));

    let mut seen_families = HashSet::new();
    for family in &config.families {
        if !seen_families.insert(&family.id) {
            errors.push(ValidationError::DuplicateFamilyId(family.id.clone()));
        }
    }

    // Member IDs double as user and child IDs, so they are unique across families
    let mut seen_members = HashSet::new();
    for member in config.families.iter().flat_map(|f| &f.members) {
        if !seen_members.insert(&member.id) {
            errors.push(ValidationError::DuplicateMemberId(member.id.clone()));
        }
    }

    for family in &config.families {
        errors.extend(validate_family(family));
    }

    errors
}

fn validate_service(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let service = &config.service;

    if service.workers == Some(0) {
        errors.push(ValidationError::ServiceError("workers must be at least 1".into()));
    }
    if service.status_cache_ttl_seconds == Some(0) {
        errors.push(ValidationError::ServiceError(
            "status_cache_ttl_seconds must be positive".into(),
        ));
    }
    if service.approval_ttl_seconds == Some(0) {
        errors.push(ValidationError::ServiceError(
            "approval_ttl_seconds must be positive".into(),
        ));
    }
    if service.expiry_sweep_interval_seconds == Some(0) {
        errors.push(ValidationError::ServiceError(
            "expiry_sweep_interval_seconds must be positive".into(),
        ));
    }
    if service.request_timeout_ms == Some(0) {
        errors.push(ValidationError::ServiceError(
            "request_timeout_ms must be positive".into(),
        ));
    }
    if service.store_retry_attempts == Some(0) {
        errors.push(ValidationError::ServiceError(
            "store_retry_attempts must be at least 1".into(),
        ));
    }

    errors
}

fn validate_family(family: &RawFamily) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if family.id.trim().is_empty() {
        errors.push(ValidationError::FamilyError {
            family_id: family.id.clone(),
            message: "id cannot be empty".into(),
        });
    }

    let has_guardian = family
        .members
        .iter()
        .any(|m| m.role.eq_ignore_ascii_case("guardian"));
    if !has_guardian {
        errors.push(ValidationError::FamilyError {
            family_id: family.id.clone(),
            message: "at least one guardian is required".into(),
        });
    }

    for member in &family.members {
        errors.extend(validate_member(member));
    }

    errors
}

fn validate_member(member: &RawMember) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let err = |message: String| ValidationError::MemberError {
        member_id: member.id.clone(),
        message,
    };

    if member.id.trim().is_empty() {
        errors.push(err("id cannot be empty".into()));
    }

    match member.role.to_ascii_lowercase().as_str() {
        "guardian" => {
            if member.policy.is_some() {
                errors.push(err("guardians cannot carry a child policy".into()));
            }
        }
        "child" => {
            if let Some(policy) = &member.policy {
                errors.extend(validate_child_policy(policy).into_iter().map(err));
            }
        }
        other => errors.push(err(format!(
            "unknown role '{}' (expected 'guardian' or 'child')",
            other
        ))),
    }

    errors
}

fn validate_child_policy(policy: &RawChildPolicy) -> Vec<String> {
    let mut messages = Vec::new();

    let amounts = [
        ("daily_spending_limit", policy.daily_spending_limit),
        ("monthly_spending_limit", policy.monthly_spending_limit),
        ("auto_approval_threshold", policy.auto_approval_threshold),
    ];
    for (name, value) in amounts {
        if let Some(v) = value
            && (!v.is_finite() || v < 0.0)
        {
            messages.push(format!("{} must be a non-negative amount, got {}", name, v));
        }
    }

    if let (Some(daily), Some(monthly)) =
        (policy.daily_spending_limit, policy.monthly_spending_limit)
        && daily > monthly
    {
        messages.push(format!(
            "daily_spending_limit {:.2} exceeds monthly_spending_limit {:.2}",
            daily, monthly
        ));
    }

    if let Some(currency) = &policy.currency
        && (currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()))
    {
        messages.push(format!("currency '{}' is not a three-letter code", currency));
    }

    // Zero is a legitimate "no gaming" budget
    if let Some(minutes) = policy.max_daily_screen_time_minutes
        && minutes > 24 * 60
    {
        messages.push(format!(
            "max_daily_screen_time_minutes {} exceeds one day",
            minutes
        ));
    }

    messages
}
