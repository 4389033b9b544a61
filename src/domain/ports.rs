//! Ports: the storage contracts the engine persists through, and the
//! provider contract every payment-network adapter implements.
//!
//! Storage is deliberately minimal — get/put plus compare-and-swap — so a
//! real backend can be substituted without touching the engine. The provider
//! contract is a capability triple (processor/validator/notifier) selected
//! through the registry by provider identifier, not by subclassing.

use crate::domain::audit::AuditEvent;
use crate::domain::card::CardDetails;
use crate::domain::currency::{AmountStyle, Currency, WireAmount};
use crate::domain::payment::{Amount, Payment, PaymentId, Provider};
use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type TokenStoreRef = Arc<dyn TokenStore>;
pub type CounterStoreRef = Arc<dyn CounterStore>;
pub type AuditSinkRef = Arc<dyn AuditSink>;
pub type ProcessorRef = Arc<dyn Processor>;
pub type RequestValidatorRef = Arc<dyn RequestValidator>;
pub type NotifierRef = Arc<dyn Notifier>;
pub type ProviderFactoryRef = Arc<dyn ProviderFactory>;

/// Key-value storage for payments with optimistic concurrency.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Stores a new payment. The id must not already exist.
    async fn insert(&self, payment: Payment) -> Result<()>;

    async fn get(&self, id: &PaymentId) -> Result<Option<Payment>>;

    /// Compare-and-swap write: succeeds only if the stored version still
    /// equals `expected_version`. Returns `false` when another writer won.
    async fn update(&self, payment: Payment, expected_version: u64) -> Result<bool>;

    async fn all(&self) -> Result<Vec<Payment>>;
}

/// A confirmation token binding {session, amount, currency} for its TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationToken {
    pub token: String,
    pub session_id: String,
    pub amount: Amount,
    pub currency: Currency,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub consumed: bool,
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn put(&self, token: ConfirmationToken) -> Result<()>;

    async fn get(&self, token: &str) -> Result<Option<ConfirmationToken>>;

    /// Atomically marks the token consumed. Returns `false` if it was
    /// already consumed (or missing); at most one concurrent caller sees
    /// `true` for a given token.
    async fn consume(&self, token: &str) -> Result<bool>;
}

/// Failed-attempt state for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptCounter {
    pub failures: u32,
    pub window_start: DateTime<Utc>,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<AttemptCounter>>;

    /// Compare-and-swap keyed on the previously observed state (`None` for
    /// absent). Returns `false` when the stored state has changed since.
    async fn compare_and_swap(
        &self,
        session_id: &str,
        expected: Option<&AttemptCounter>,
        new: AttemptCounter,
    ) -> Result<bool>;

    async fn clear(&self, session_id: &str) -> Result<()>;
}

/// Append-only sink for security audit events. The core never reads,
/// mutates or deletes what it appends.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<()>;
}

/// Provider-specific request fields; which of them are required is decided
/// by each provider's validator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderFields {
    pub customer_id: Option<String>,
    pub return_url: Option<String>,
    pub cancel_url: Option<String>,
    pub description: Option<String>,
}

/// Inbound payment intent, the shape external callers submit.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequest {
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub amount: Amount,
    pub currency: Currency,
    pub provider: Provider,
    #[serde(default)]
    pub card: Option<CardDetails>,
    pub confirmation_token: String,
    #[serde(flatten)]
    pub fields: ProviderFields,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// What a processor receives: canonical identifiers plus the wire amount
/// already normalized for this provider. Adapters must not convert amounts.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub payment_id: PaymentId,
    pub session_id: String,
    pub amount: WireAmount,
    pub currency: Currency,
    pub fields: ProviderFields,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeOutcome {
    pub provider_transaction_id: String,
    /// Redirect-style providers return where the payer approves the charge.
    pub approval_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundOutcome {
    pub provider_refund_id: String,
}

/// Settles charges and refunds against one payment network.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn charge(
        &self,
        request: &ChargeRequest,
    ) -> std::result::Result<ChargeOutcome, ProviderError>;

    /// `amount` of `None` refunds the full original charge.
    async fn refund(
        &self,
        transaction_id: &str,
        amount: Option<&WireAmount>,
        currency: &Currency,
    ) -> std::result::Result<RefundOutcome, ProviderError>;
}

/// Checks the provider-specific required fields of an inbound request.
/// Pure field inspection; network validation belongs to the processor.
pub trait RequestValidator: Send + Sync {
    fn validate(&self, request: &PaymentRequest)
    -> std::result::Result<(), BTreeMap<String, String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    Completed,
    Failed,
    Refunded,
}

/// A provider callback the notifier recognized and mapped onto a payment.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    /// Provider-assigned delivery id, the idempotency key for replays.
    pub event_id: String,
    pub payment_id: PaymentId,
    pub kind: WebhookKind,
}

/// Translates provider webhook payloads. `Ok(None)` means the payload is
/// well-formed but not an event this system acts on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn handle_webhook(
        &self,
        payload: &serde_json::Value,
    ) -> std::result::Result<Option<WebhookEvent>, ProviderError>;
}

/// One registered payment provider: its adapter triple plus the wire-format
/// declarations the engine needs before calling it.
pub trait ProviderFactory: Send + Sync {
    fn provider(&self) -> Provider;

    /// How this provider expects amounts on the wire.
    fn amount_style(&self) -> AmountStyle;

    /// Whether requests for this provider must carry card security data.
    fn requires_card_capture(&self) -> bool;

    fn create_processor(&self) -> ProcessorRef;
    fn create_validator(&self) -> RequestValidatorRef;
    fn create_notifier(&self) -> NotifierRef;
}
