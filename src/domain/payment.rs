use crate::domain::currency::Currency;
use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Metadata keys the engine writes into [`Payment::metadata`].
pub mod keys {
    pub const PROVIDER_TRANSACTION_ID: &str = "provider_transaction_id";
    pub const CARD_BRAND: &str = "card_brand";
    pub const CARD_LAST4: &str = "card_last4";
    pub const CANCELLED_AT: &str = "cancelled_at";
    pub const REFUND_IN_FLIGHT: &str = "refund_in_flight";
    pub const REFUND_REASON: &str = "refund_reason";
    pub const PROVIDER_REFUND_ID: &str = "provider_refund_id";
    pub const APPROVAL_URL: &str = "approval_url";
    pub const REFUNDED_AMOUNT: &str = "refunded_amount";
    pub const WEBHOOK_EVENTS: &str = "webhook_events";
    pub const FAILURE_DETAIL: &str = "failure_detail";
}

/// Opaque payment identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentId(Uuid);

impl PaymentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for PaymentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A positive payment amount in integer minor units (cents for USD, whole
/// pesos for CLP). The canonical representation everywhere inside the core;
/// provider wire formats are derived from it by the currency normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    pub fn new(minor_units: i64) -> Result<Self, PaymentError> {
        if minor_units > 0 {
            Ok(Self(minor_units))
        } else {
            Err(PaymentError::invalid_field(
                "amount",
                "amount must be a positive number of minor units",
            ))
        }
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = PaymentError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Stripe,
    Paypal,
    Webpay,
    MercadoPago,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stripe => "stripe",
            Self::Paypal => "paypal",
            Self::Webpay => "webpay",
            Self::MercadoPago => "mercado_pago",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        };
        f.write_str(name)
    }
}

impl PaymentStatus {
    /// The closed lifecycle: PENDING -> PROCESSING -> {COMPLETED, FAILED},
    /// PENDING|PROCESSING -> CANCELLED, COMPLETED -> REFUNDED.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
                | (Completed, Refunded)
        )
    }

    /// True when no transition out of this state is legal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Refunded)
    }
}

/// A payment tracked through the lifecycle engine.
///
/// Owned by the engine; callers only ever see clones. `version` is the
/// optimistic-concurrency token checked by [`PaymentStore::update`]
/// compare-and-swap writes.
///
/// [`PaymentStore::update`]: crate::domain::ports::PaymentStore::update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub amount: Amount,
    pub currency: Currency,
    pub provider: Provider,
    pub status: PaymentStatus,
    pub session_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Payment {
    pub fn new(
        amount: Amount,
        currency: Currency,
        provider: Provider,
        session_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            amount,
            currency,
            provider,
            status: PaymentStatus::Pending,
            session_id: session_id.into(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Applies a status transition, bumping `updated_at` and `version`.
    pub fn transition(
        &mut self,
        next: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        if !self.status.can_transition_to(next) {
            return Err(PaymentError::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch(now);
        Ok(())
    }

    /// Bumps the version and `updated_at` for a metadata-only write.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }

    pub fn set_meta(&mut self, key: &str, value: serde_json::Value) {
        self.metadata.insert(key.to_string(), value);
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_must_be_positive() {
        assert!(Amount::new(1).is_ok());
        assert!(matches!(
            Amount::new(0),
            Err(PaymentError::Validation(_))
        ));
        assert!(matches!(
            Amount::new(-500),
            Err(PaymentError::Validation(_))
        ));
    }

    #[test]
    fn test_legal_transitions() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(Completed.can_transition_to(Refunded));
    }

    #[test]
    fn test_illegal_transitions() {
        use PaymentStatus::*;
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Refunded.can_transition_to(Refunded));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Cancelled.can_transition_to(Processing));
    }

    #[test]
    fn test_transition_bumps_version() {
        let now = Utc::now();
        let mut payment = Payment::new(
            Amount::new(1000).unwrap(),
            Currency::usd(),
            Provider::Stripe,
            "session-1",
            now,
        );
        assert_eq!(payment.version, 0);
        payment.transition(PaymentStatus::Processing, now).unwrap();
        assert_eq!(payment.version, 1);
        assert_eq!(payment.status, PaymentStatus::Processing);

        let err = payment.transition(PaymentStatus::Pending, now).unwrap_err();
        assert!(matches!(
            err,
            PaymentError::InvalidStateTransition {
                from: PaymentStatus::Processing,
                to: PaymentStatus::Pending,
            }
        ));
    }

    #[test]
    fn test_provider_serde_names() {
        assert_eq!(
            serde_json::to_string(&Provider::MercadoPago).unwrap(),
            r#""mercado_pago""#
        );
        assert_eq!(
            serde_json::from_str::<Provider>(r#""webpay""#).unwrap(),
            Provider::Webpay
        );
    }
}
