//! Immutable security audit events.
//!
//! Every validation failure, lockout transition, state transition, token
//! event and provider error produces one of these. Payloads are built from
//! already-masked data; raw card numbers and CVVs never reach this module.

use crate::domain::payment::{PaymentId, PaymentStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    ValidationFailed,
    AttemptLimitExceeded,
    StateTransition,
    TokenIssued,
    TokenConsumed,
    ProviderError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub kind: AuditEventKind,
    pub payload: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        kind: AuditEventKind,
        session_id: impl Into<String>,
        user_id: Option<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: now,
            session_id: session_id.into(),
            user_id,
            kind,
            payload,
        }
    }

    pub fn validation_failed(
        session_id: &str,
        user_id: Option<String>,
        fields: &[&str],
        detail: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            AuditEventKind::ValidationFailed,
            session_id,
            user_id,
            serde_json::json!({ "fields": fields, "detail": detail }),
            now,
        )
    }

    pub fn attempt_limit_exceeded(
        session_id: &str,
        user_id: Option<String>,
        failures: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            AuditEventKind::AttemptLimitExceeded,
            session_id,
            user_id,
            serde_json::json!({ "failures": failures }),
            now,
        )
    }

    pub fn state_transition(
        session_id: &str,
        payment_id: PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            AuditEventKind::StateTransition,
            session_id,
            None,
            serde_json::json!({
                "payment_id": payment_id.to_string(),
                "from": from.to_string(),
                "to": to.to_string(),
            }),
            now,
        )
    }

    pub fn token_issued(session_id: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self::new(
            AuditEventKind::TokenIssued,
            session_id,
            None,
            serde_json::json!({ "expires_at": expires_at.to_rfc3339() }),
            now,
        )
    }

    pub fn token_consumed(session_id: &str, payment_amount: i64, now: DateTime<Utc>) -> Self {
        Self::new(
            AuditEventKind::TokenConsumed,
            session_id,
            None,
            serde_json::json!({ "amount": payment_amount }),
            now,
        )
    }

    pub fn provider_error(
        session_id: &str,
        payment_id: PaymentId,
        detail: &str,
        timed_out: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            AuditEventKind::ProviderError,
            session_id,
            None,
            serde_json::json!({
                "payment_id": payment_id.to_string(),
                "detail": detail,
                "timed_out": timed_out,
            }),
            now,
        )
    }
}
