//! Sandbox provider adapters.
//!
//! Deterministic, in-process implementations of the provider contract for
//! Stripe, PayPal and Webpay. No network: charge outcomes are steered by
//! the request metadata key `simulate` (`"declined"` or `"timeout"`), so the
//! batch driver and the integration tests can exercise every engine path.
//! Real adapters live outside this crate and implement the same traits.

use crate::application::registry::ProviderRegistry;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod paypal;
pub mod stripe;
pub mod webpay;

/// Registry preloaded with the three sandbox triples. MercadoPago is left
/// unregistered on purpose; requests for it exercise the unsupported path.
pub fn sandbox_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(stripe::StripeFactory::sandbox()));
    registry.register(Arc::new(paypal::PaypalFactory::sandbox()));
    registry.register(Arc::new(webpay::WebpayFactory::sandbox()));
    registry
}

pub(crate) enum SimulatedOutcome {
    Approve,
    Decline,
    Hang,
}

pub(crate) fn simulated_outcome(metadata: &BTreeMap<String, Value>) -> SimulatedOutcome {
    match metadata.get("simulate").and_then(Value::as_str) {
        Some("declined") => SimulatedOutcome::Decline,
        Some("timeout") => SimulatedOutcome::Hang,
        _ => SimulatedOutcome::Approve,
    }
}

/// Parks the call well past any configured provider timeout.
pub(crate) async fn hang() {
    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
}
