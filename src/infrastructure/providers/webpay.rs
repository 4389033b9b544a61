//! Sandbox Webpay (Transbank) adapter triple.
//!
//! Webpay is the Chilean card rail: a redirect flow keyed by a transaction
//! token, amounts as decimal strings (CLP, its home currency, has no
//! decimals at all).

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

pub struct WebpayFactory {
    processor: ProcessorRef,
    validator: RequestValidatorRef,
    notifier: NotifierRef,
}

impl WebpayFactory {
    pub fn sandbox() -> Self {
        Self {
            processor: Arc::new(WebpayProcessor),
            validator: Arc::new(WebpayValidator),
            notifier: Arc::new(WebpayNotifier),
        }
    }
}

impl ProviderFactory for WebpayFactory {
    fn provider(&self) -> Provider {
        Provider::Webpay
    }

    fn amount_style(&self) -> AmountStyle {
        AmountStyle::DecimalString
    }

    fn requires_card_capture(&self) -> bool {
        false
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

pub struct WebpayProcessor;

#[async_trait]
impl Processor for WebpayProcessor {
    async fn charge(
        &self,
        request: &ChargeRequest,
    ) -> std::result::Result<ChargeOutcome, ProviderError> {
        match simulated_outcome(&request.metadata) {
            SimulatedOutcome::Decline => Err(ProviderError::Declined {
                code: "TSY".to_string(),
                message: "transaction rejected by the acquirer".to_string(),
            }),
            SimulatedOutcome::Hang => {
                hang().await;
                unreachable!("sandbox hang outlives any configured timeout")
            }
            SimulatedOutcome::Approve => {
                let token = format!("wp_{}", request.payment_id);
                Ok(ChargeOutcome {
                    approval_url: Some(format!(
                        "https://webpay3gint.transbank.cl/webpayserver/initTransaction?token_ws={token}"
                    )),
                    provider_transaction_id: token,
                })
            }
        }
    }

    async fn refund(
        &self,
        transaction_id: &str,
        _amount: Option<&WireAmount>,
        _currency: &Currency,
    ) -> std::result::Result<RefundOutcome, ProviderError> {
        Ok(RefundOutcome {
            provider_refund_id: format!("null_{transaction_id}"),
        })
    }
}

pub struct WebpayValidator;

impl RequestValidator for WebpayValidator {
    fn validate(
        &self,
        request: &PaymentRequest,
    ) -> std::result::Result<(), BTreeMap<String, String>> {
        let mut errors = BTreeMap::new();
        if request
            .fields
            .return_url
            .as_deref()
            .is_none_or(str::is_empty)
        {
            errors.insert(
                "return_url".to_string(),
                "Webpay payments require a return URL".to_string(),
            );
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

pub struct WebpayNotifier;

#[async_trait]
impl Notifier for WebpayNotifier {
    async fn handle_webhook(
        &self,
        payload: &serde_json::Value,
    ) -> std::result::Result<Option<WebhookEvent>, ProviderError> {
        let event_id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidPayload("missing event id".to_string()))?;
        let kind = match payload.get("status").and_then(|v| v.as_str()) {
            Some("AUTHORIZED") => WebhookKind::Completed,
            Some("FAILED") => WebhookKind::Failed,
            Some("NULLIFIED") => WebhookKind::Refunded,
            _ => return Ok(None),
        };
        let payment_id: PaymentId = payload
            .get("buy_order")
            .and_then(|v| v.as_str())
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| ProviderError::InvalidPayload("missing buy_order".to_string()))?;
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
    use serde_json::json;

    #[test]
    fn test_validator_requires_return_url() {
        let request: PaymentRequest = serde_json::from_value(json!({
            "session_id": "sess-1",
            "amount": 15000,
            "currency": "CLP",
            "provider": "webpay",
            "confirmation_token": "tok"
        }))
        .unwrap();
        let errors = WebpayValidator.validate(&request).unwrap_err();
        assert!(errors.contains_key("return_url"));
    }

    #[tokio::test]
    async fn test_notifier_maps_transbank_statuses() {
        let payment_id = PaymentId::new();
        let payload = json!({
            "id": "tbk-91",
            "status": "AUTHORIZED",
            "buy_order": payment_id.to_string()
        });
        let event = WebpayNotifier
            .handle_webhook(&payload)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, WebhookKind::Completed);

        let unknown = json!({"id": "tbk-92", "status": "PARTIAL", "buy_order": payment_id.to_string()});
        assert!(
            WebpayNotifier
                .handle_webhook(&unknown)
                .await
                .unwrap()
                .is_none()
        );
    }
}
