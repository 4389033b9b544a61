#![allow(dead_code)] // each test binary uses a different subset of helpers

use payflow::application::engine::PaymentEngine;
use payflow::config::EngineConfig;
use payflow::domain::currency::Currency;
use payflow::domain::payment::{Amount, Provider};
use payflow::domain::ports::PaymentRequest;
use payflow::infrastructure::in_memory::{
    InMemoryAuditSink, InMemoryCounterStore, InMemoryPaymentStore, InMemoryTokenStore,
};
use payflow::infrastructure::providers::sandbox_registry;
use std::sync::Arc;

/// Engine wired to in-memory stores and the sandbox providers, with the
/// shared handles the assertions need.
pub struct Harness {
    pub engine: PaymentEngine,
    pub audit: InMemoryAuditSink,
    pub payments: Arc<InMemoryPaymentStore>,
}

pub fn harness() -> Harness {
    harness_with_config(test_config())
}

pub fn harness_with_config(config: EngineConfig) -> Harness {
    let audit = InMemoryAuditSink::new();
    let payments = Arc::new(InMemoryPaymentStore::new());
    let engine = PaymentEngine::new(
        payments.clone(),
        Arc::new(InMemoryTokenStore::new()),
        Arc::new(InMemoryCounterStore::new()),
        Arc::new(audit.clone()),
        Arc::new(sandbox_registry()),
        config,
    );
    Harness {
        engine,
        audit,
        payments,
    }
}

/// Short provider timeout so timeout-path tests finish quickly.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        provider_timeout_ms: 200,
        ..EngineConfig::default()
    }
}

/// A valid Stripe request for the given session; the confirmation token is
/// left empty for the caller to fill in.
pub fn stripe_request(session_id: &str, amount_minor: i64) -> PaymentRequest {
    serde_json::from_value(serde_json::json!({
        "session_id": session_id,
        "user_id": "user-7",
        "amount": amount_minor,
        "currency": "USD",
        "provider": "stripe",
        "confirmation_token": "",
        "customer_id": "cus_42",
        "card": {
            "number": "4111111111111111",
            "cvv": "123",
            "expiry_month": 12,
            "expiry_year": 2030
        }
    }))
    .unwrap()
}

pub fn paypal_request(session_id: &str, amount_minor: i64, currency: &str) -> PaymentRequest {
    serde_json::from_value(serde_json::json!({
        "session_id": session_id,
        "amount": amount_minor,
        "currency": currency,
        "provider": "paypal",
        "confirmation_token": "",
        "cancel_url": "https://shop.example/cancel"
    }))
    .unwrap()
}

/// Issues a confirmation token for the request and attaches it, the way a
/// client would after the confirmation round-trip.
pub async fn confirm(harness: &Harness, request: &mut PaymentRequest) {
    let token = harness
        .engine
        .issue_confirmation(&request.session_id, request.amount, request.currency.clone())
        .await
        .unwrap();
    request.confirmation_token = token.token;
}

pub fn amount(minor: i64) -> Amount {
    Amount::new(minor).unwrap()
}

pub fn usd() -> Currency {
    Currency::usd()
}

#[allow(dead_code)]
pub fn unsupported_provider() -> Provider {
    Provider::MercadoPago
}
