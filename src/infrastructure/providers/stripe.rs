//! Sandbox Stripe adapter triple.
//!
//! Stripe charges cards directly (card capture required) and takes integer
//! minor-unit amounts for every currency, zero-decimal ones included.

use super::{SimulatedOutcome, hang, simulated_outcome};
use crate::domain::currency::{AmountStyle, Currency, WireAmount};
use crate::domain::payment::{PaymentId, Provider};
use crate::domain::ports::{
    ChargeOutcome, ChargeRequest, Notifier, NotifierRef, PaymentRequest, Processor, ProcessorRef,
    ProviderFactory, RefundOutcome, RequestValidator, RequestValidatorRef, WebhookEvent,
    WebhookKind,
};
use crate::error::ProviderError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct StripeFactory {
    processor: ProcessorRef,
    validator: RequestValidatorRef,
    notifier: NotifierRef,
}

impl StripeFactory {
    pub fn sandbox() -> Self {
        Self {
            processor: Arc::new(StripeProcessor),
            validator: Arc::new(StripeValidator),
            notifier: Arc::new(StripeNotifier),
        }
    }
}

impl ProviderFactory for StripeFactory {
    fn provider(&self) -> Provider {
        Provider::Stripe
    }

    fn amount_style(&self) -> AmountStyle {
        AmountStyle::MinorUnits
    }

    fn requires_card_capture(&self) -> bool {
        true
    }

    fn create_processor(&self) -> ProcessorRef {
        self.processor.clone()
    }

    fn create_validator(&self) -> RequestValidatorRef {
        self.validator.clone()
    }

    fn create_notifier(&self) -> NotifierRef {
        self.notifier.clone()
    }
}

pub struct StripeProcessor;

#[async_trait]
impl Processor for StripeProcessor {
    async fn charge(
        &self,
        request: &ChargeRequest,
    ) -> std::result::Result<ChargeOutcome, ProviderError> {
        match simulated_outcome(&request.metadata) {
            SimulatedOutcome::Decline => Err(ProviderError::Declined {
                code: "card_declined".to_string(),
                message: "the card was declined by the issuer".to_string(),
            }),
            SimulatedOutcome::Hang => {
                hang().await;
                unreachable!("sandbox hang outlives any configured timeout")
            }
            SimulatedOutcome::Approve => Ok(ChargeOutcome {
                provider_transaction_id: format!("pi_{}", request.payment_id),
                approval_url: None,
            }),
        }
    }

    async fn refund(
        &self,
        transaction_id: &str,
        _amount: Option<&WireAmount>,
        _currency: &Currency,
    ) -> std::result::Result<RefundOutcome, ProviderError> {
        Ok(RefundOutcome {
            provider_refund_id: format!("re_{transaction_id}"),
        })
    }
}

pub struct StripeValidator;

impl RequestValidator for StripeValidator {
    fn validate(
        &self,
        request: &PaymentRequest,
    ) -> std::result::Result<(), BTreeMap<String, String>> {
        let mut errors = BTreeMap::new();
        if request
            .fields
            .customer_id
            .as_deref()
            .is_none_or(str::is_empty)
        {
            errors.insert(
                "customer_id".to_string(),
                "Stripe payments require a customer reference".to_string(),
            );
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

pub struct StripeNotifier;

#[async_trait]
impl Notifier for StripeNotifier {
    async fn handle_webhook(
        &self,
        payload: &serde_json::Value,
    ) -> std::result::Result<Option<WebhookEvent>, ProviderError> {
        let event_id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidPayload("missing event id".to_string()))?;
        let kind = match payload.get("type").and_then(|v| v.as_str()) {
            Some("payment_intent.succeeded") => WebhookKind::Completed,
            Some("payment_intent.payment_failed") => WebhookKind::Failed,
            Some("charge.refunded") => WebhookKind::Refunded,
            _ => return Ok(None),
        };
        let payment_id: PaymentId = payload
            .pointer("/data/object/metadata/payment_id")
            .and_then(|v| v.as_str())
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| {
                ProviderError::InvalidPayload("missing payment id in event metadata".to_string())
            })?;
        Ok(Some(WebhookEvent {
            event_id: event_id.to_string(),
            payment_id,
            kind,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::Amount;
    use crate::domain::ports::ProviderFields;
    use serde_json::json;

    fn charge_request(metadata: BTreeMap<String, serde_json::Value>) -> ChargeRequest {
        ChargeRequest {
            payment_id: PaymentId::new(),
            session_id: "sess-1".to_string(),
            amount: crate::domain::currency::to_provider_units(
                Amount::new(1000).unwrap(),
                &Currency::usd(),
                AmountStyle::MinorUnits,
            ),
            currency: Currency::usd(),
            fields: ProviderFields::default(),
            metadata,
        }
    }

    #[tokio::test]
    async fn test_charge_approves_by_default() {
        let outcome = StripeProcessor
            .charge(&charge_request(BTreeMap::new()))
            .await
            .unwrap();
        assert!(outcome.provider_transaction_id.starts_with("pi_"));
        assert!(outcome.approval_url.is_none());
    }

    #[tokio::test]
    async fn test_charge_declines_on_request() {
        let metadata = BTreeMap::from([("simulate".to_string(), json!("declined"))]);
        let err = StripeProcessor
            .charge(&charge_request(metadata))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Declined { .. }));
    }

    #[test]
    fn test_validator_requires_customer_reference() {
        let request: PaymentRequest = serde_json::from_value(json!({
            "session_id": "sess-1",
            "amount": 1000,
            "currency": "USD",
            "provider": "stripe",
            "confirmation_token": "tok"
        }))
        .unwrap();
        let errors = StripeValidator.validate(&request).unwrap_err();
        assert!(errors.contains_key("customer_id"));
    }

    #[tokio::test]
    async fn test_notifier_maps_known_events() {
        let payment_id = PaymentId::new();
        let payload = json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": {"object": {"metadata": {"payment_id": payment_id.to_string()}}}
        });
        let event = StripeNotifier
            .handle_webhook(&payload)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, WebhookKind::Completed);
        assert_eq!(event.payment_id, payment_id);
        assert_eq!(event.event_id, "evt_1");
    }

    #[tokio::test]
    async fn test_notifier_ignores_unknown_event_types() {
        let payload = json!({"id": "evt_2", "type": "customer.created"});
        assert!(
            StripeNotifier
                .handle_webhook(&payload)
                .await
                .unwrap()
                .is_none()
        );
    }
}
