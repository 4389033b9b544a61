//! Sandbox PayPal adapter triple.
//!
//! PayPal is a redirect flow (no direct card capture) and takes decimal
//! string amounts: `"7.93"` for USD, whole-number strings for zero-decimal
//! currencies such as CLP.

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

pub struct PaypalFactory {
    processor: ProcessorRef,
    validator: RequestValidatorRef,
    notifier: NotifierRef,
}

impl PaypalFactory {
    pub fn sandbox() -> Self {
        Self {
            processor: Arc::new(PaypalProcessor),
            validator: Arc::new(PaypalValidator),
            notifier: Arc::new(PaypalNotifier),
        }
    }
}

impl ProviderFactory for PaypalFactory {
    fn provider(&self) -> Provider {
        Provider::Paypal
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

pub struct PaypalProcessor;

#[async_trait]
impl Processor for PaypalProcessor {
    async fn charge(
        &self,
        request: &ChargeRequest,
    ) -> std::result::Result<ChargeOutcome, ProviderError> {
        match simulated_outcome(&request.metadata) {
            SimulatedOutcome::Decline => Err(ProviderError::Declined {
                code: "INSTRUMENT_DECLINED".to_string(),
                message: "the funding instrument was declined".to_string(),
            }),
            SimulatedOutcome::Hang => {
                hang().await;
                unreachable!("sandbox hang outlives any configured timeout")
            }
            SimulatedOutcome::Approve => {
                let order_id = format!("PAYID-{}", request.payment_id);
                Ok(ChargeOutcome {
                    approval_url: Some(format!(
                        "https://www.sandbox.paypal.com/checkoutnow?token={order_id}"
                    )),
                    provider_transaction_id: order_id,
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
            provider_refund_id: format!("REF-{transaction_id}"),
        })
    }
}

pub struct PaypalValidator;

impl RequestValidator for PaypalValidator {
    fn validate(
        &self,
        request: &PaymentRequest,
    ) -> std::result::Result<(), BTreeMap<String, String>> {
        let mut errors = BTreeMap::new();
        if request
            .fields
            .cancel_url
            .as_deref()
            .is_none_or(str::is_empty)
        {
            errors.insert(
                "cancel_url".to_string(),
                "PayPal payments require a cancel URL".to_string(),
            );
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

pub struct PaypalNotifier;

#[async_trait]
impl Notifier for PaypalNotifier {
    async fn handle_webhook(
        &self,
        payload: &serde_json::Value,
    ) -> std::result::Result<Option<WebhookEvent>, ProviderError> {
        let event_id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidPayload("missing event id".to_string()))?;
        let kind = match payload.get("event_type").and_then(|v| v.as_str()) {
            Some("PAYMENT.CAPTURE.COMPLETED") => WebhookKind::Completed,
            Some("PAYMENT.CAPTURE.DENIED") => WebhookKind::Failed,
            Some("PAYMENT.CAPTURE.REFUNDED") => WebhookKind::Refunded,
            _ => return Ok(None),
        };
        let payment_id: PaymentId = payload
            .pointer("/resource/custom_id")
            .and_then(|v| v.as_str())
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| {
                ProviderError::InvalidPayload("missing custom_id in resource".to_string())
            })?;
        Ok(Some(WebhookEvent {
            event_id: event_id.to_string(),
            payment_id,
            kind,
        }))
    }
}
