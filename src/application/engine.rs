//! The payment lifecycle engine.
//!
//! Orchestrates validation, the confirm-then-charge token protocol, the
//! attempt guard, provider dispatch and the state machine, emitting an audit
//! event on every path. Per-payment serialization is enforced with the
//! store's version compare-and-swap; no lock of any kind is held while a
//! provider call is in flight.

use crate::application::attempts::AttemptGuard;
use crate::application::registry::ProviderRegistry;
use crate::application::token::ConfirmationTokenService;
use crate::config::EngineConfig;
use crate::domain::audit::AuditEvent;
use crate::domain::currency::{self, Currency};
use crate::domain::payment::{Amount, Payment, PaymentId, PaymentStatus, Provider, keys};
use crate::domain::ports::{
    AuditSink, AuditSinkRef, ChargeOutcome, ChargeRequest, ConfirmationToken, CounterStoreRef,
    Notifier, PaymentRequest, PaymentStore, PaymentStoreRef, Processor, ProviderFactory,
    ProviderFactoryRef, RequestValidator, TokenStoreRef, WebhookKind,
};
use crate::error::{PaymentError, ProviderError, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the engine did with a delivered webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// The notifier did not recognize the payload; nothing to do.
    Unrecognized,
    /// The event id was seen before; replay detected, no state change.
    Duplicate,
    /// The event transitioned the payment to this status.
    Applied(PaymentStatus),
    /// Recognized, but the transition is illegal from the current status
    /// (out-of-order delivery); recorded and skipped.
    Skipped,
}

pub struct PaymentEngine {
    payments: PaymentStoreRef,
    audit: AuditSinkRef,
    registry: Arc<ProviderRegistry>,
    tokens: ConfirmationTokenService,
    attempts: AttemptGuard,
    config: EngineConfig,
}

impl PaymentEngine {
    pub fn new(
        payments: PaymentStoreRef,
        tokens: TokenStoreRef,
        counters: CounterStoreRef,
        audit: AuditSinkRef,
        registry: Arc<ProviderRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            tokens: ConfirmationTokenService::new(tokens, config.token_ttl()),
            attempts: AttemptGuard::new(counters, config.attempt_limit, config.attempt_window()),
            payments,
            audit,
            registry,
            config,
        }
    }

    /// First half of the confirm-then-charge protocol: binds the session,
    /// amount and currency to a fresh single-use token the client must echo
    /// back when it actually charges.
    pub async fn issue_confirmation(
        &self,
        session_id: &str,
        amount: Amount,
        currency: Currency,
    ) -> Result<ConfirmationToken> {
        let now = Utc::now();
        let token = self.tokens.issue(session_id, amount, currency, now).await?;
        self.audit
            .append(AuditEvent::token_issued(session_id, token.expires_at, now))
            .await?;
        debug!(session_id, "confirmation token issued");
        Ok(token)
    }

    /// Runs a payment intent through the full lifecycle.
    ///
    /// On processor failure the payment ends FAILED and the error is
    /// returned with its detail confined to the audit trail.
    pub async fn create_payment(&self, request: PaymentRequest) -> Result<Payment> {
        let now = Utc::now();

        if let Some(retry_after_secs) = self.attempts.locked_for(&request.session_id, now).await? {
            debug!(session_id = %request.session_id, "attempt blocked by lockout");
            return Err(PaymentError::AttemptLimitExceeded { retry_after_secs });
        }

        let factory = self.registry.get(request.provider)?.clone();

        if let Err(errors) = factory.create_validator().validate(&request) {
            let fields: Vec<&str> = errors.keys().map(String::as_str).collect();
            self.audit
                .append(AuditEvent::validation_failed(
                    &request.session_id,
                    request.user_id.clone(),
                    &fields,
                    "provider field validation failed",
                    now,
                ))
                .await?;
            return Err(PaymentError::Validation(errors));
        }

        let card_meta = self.validate_card(&factory, &request, now).await?;

        if let Err(err) = self
            .tokens
            .verify_and_consume(
                &request.confirmation_token,
                &request.session_id,
                request.amount,
                &request.currency,
                now,
            )
            .await
        {
            self.audit
                .append(AuditEvent::validation_failed(
                    &request.session_id,
                    request.user_id.clone(),
                    &["confirmation_token"],
                    err.code(),
                    now,
                ))
                .await?;
            self.note_failure(&request.session_id, request.user_id.clone(), now)
                .await?;
            return Err(err);
        }
        self.audit
            .append(AuditEvent::token_consumed(
                &request.session_id,
                request.amount.minor_units(),
                now,
            ))
            .await?;

        let mut payment = Payment::new(
            request.amount,
            request.currency.clone(),
            request.provider,
            &request.session_id,
            now,
        );
        payment.metadata = request.metadata.clone();
        if let Some((brand, last4)) = card_meta {
            payment.set_meta(keys::CARD_BRAND, json!(brand));
            payment.set_meta(keys::CARD_LAST4, json!(last4));
        }
        self.payments.insert(payment.clone()).await?;

        let expected = payment.version;
        payment.transition(PaymentStatus::Processing, now)?;
        if !self.payments.update(payment.clone(), expected).await? {
            return Err(PaymentError::Storage(
                "concurrent write on a freshly created payment".to_string(),
            ));
        }
        self.audit
            .append(AuditEvent::state_transition(
                &payment.session_id,
                payment.id,
                PaymentStatus::Pending,
                PaymentStatus::Processing,
                now,
            ))
            .await?;

        // The charge itself runs with no lock held; only the outcome write
        // below re-enters the compare-and-swap.
        let charge = ChargeRequest {
            payment_id: payment.id,
            session_id: payment.session_id.clone(),
            amount: currency::to_provider_units(
                payment.amount,
                &payment.currency,
                factory.amount_style(),
            ),
            currency: payment.currency.clone(),
            fields: request.fields.clone(),
            metadata: request.metadata.clone(),
        };
        let processor = factory.create_processor();
        let outcome = match tokio::time::timeout(
            self.config.provider_timeout(),
            processor.charge(&charge),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                timeout_ms: self.config.provider_timeout_ms,
            }),
        };

        self.record_charge_outcome(payment.id, &request, outcome)
            .await
    }

    /// Refunds a completed payment, fully or partially.
    pub async fn refund(
        &self,
        payment_id: PaymentId,
        amount: Option<Amount>,
        reason: Option<String>,
    ) -> Result<Payment> {
        let now = Utc::now();

        // Claim the refund before touching the provider: the in-flight
        // marker makes a concurrent second refund lose deterministically.
        let claimed = loop {
            let stored = self.load(payment_id).await?;
            if stored.status != PaymentStatus::Completed
                || stored.metadata.contains_key(keys::REFUND_IN_FLIGHT)
            {
                self.audit_rejected_transition(&stored, PaymentStatus::Refunded, now)
                    .await?;
                return Err(PaymentError::InvalidStateTransition {
                    from: stored.status,
                    to: PaymentStatus::Refunded,
                });
            }
            if let Some(requested) = amount
                && requested > stored.amount
            {
                return Err(PaymentError::invalid_field(
                    "amount",
                    "refund amount exceeds the original payment amount",
                ));
            }
            let mut claim = stored.clone();
            let expected = claim.version;
            claim.set_meta(keys::REFUND_IN_FLIGHT, json!(true));
            claim.touch(now);
            if self.payments.update(claim.clone(), expected).await? {
                break claim;
            }
        };

        let refund_amount = amount.unwrap_or(claimed.amount);
        let factory = self.registry.get(claimed.provider)?.clone();
        let transaction_id = claimed
            .meta_str(keys::PROVIDER_TRANSACTION_ID)
            .ok_or_else(|| {
                PaymentError::Storage("completed payment lacks a provider transaction id".into())
            })?
            .to_string();
        // Partial refunds send the amount on the wire; a full refund lets
        // the provider default to the original charge.
        let wire = (refund_amount != claimed.amount).then(|| {
            currency::to_provider_units(refund_amount, &claimed.currency, factory.amount_style())
        });

        let processor = factory.create_processor();
        let outcome = match tokio::time::timeout(
            self.config.provider_timeout(),
            processor.refund(&transaction_id, wire.as_ref(), &claimed.currency),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                timeout_ms: self.config.provider_timeout_ms,
            }),
        };

        let now = Utc::now();
        match outcome {
            Ok(refunded) => loop {
                let stored = self.load(payment_id).await?;
                let mut next = stored.clone();
                let expected = next.version;
                next.transition(PaymentStatus::Refunded, now)?;
                next.metadata.remove(keys::REFUND_IN_FLIGHT);
                next.set_meta(keys::REFUNDED_AMOUNT, json!(refund_amount.minor_units()));
                next.set_meta(keys::PROVIDER_REFUND_ID, json!(refunded.provider_refund_id));
                if let Some(reason) = &reason {
                    next.set_meta(keys::REFUND_REASON, json!(reason));
                }
                if self.payments.update(next.clone(), expected).await? {
                    self.audit
                        .append(AuditEvent::state_transition(
                            &next.session_id,
                            next.id,
                            PaymentStatus::Completed,
                            PaymentStatus::Refunded,
                            now,
                        ))
                        .await?;
                    info!(payment_id = %next.id, amount = refund_amount.minor_units(), "payment refunded");
                    return Ok(next);
                }
            },
            Err(err) => {
                loop {
                    let stored = self.load(payment_id).await?;
                    let mut next = stored.clone();
                    let expected = next.version;
                    next.metadata.remove(keys::REFUND_IN_FLIGHT);
                    next.touch(now);
                    if self.payments.update(next, expected).await? {
                        break;
                    }
                }
                self.audit
                    .append(AuditEvent::provider_error(
                        &claimed.session_id,
                        payment_id,
                        &err.to_string(),
                        matches!(err, ProviderError::Timeout { .. }),
                        now,
                    ))
                    .await?;
                warn!(payment_id = %payment_id, "refund failed at the provider");
                Err(err.into())
            }
        }
    }

    /// Cancels a payment that has not reached a terminal state.
    pub async fn cancel(&self, payment_id: PaymentId) -> Result<Payment> {
        let now = Utc::now();
        loop {
            let stored = self.load(payment_id).await?;
            let from = stored.status;
            let mut next = stored.clone();
            let expected = next.version;
            if let Err(err) = next.transition(PaymentStatus::Cancelled, now) {
                self.audit_rejected_transition(&stored, PaymentStatus::Cancelled, now)
                    .await?;
                return Err(err);
            }
            next.set_meta(keys::CANCELLED_AT, json!(now.to_rfc3339()));
            if self.payments.update(next.clone(), expected).await? {
                self.audit
                    .append(AuditEvent::state_transition(
                        &next.session_id,
                        next.id,
                        from,
                        PaymentStatus::Cancelled,
                        now,
                    ))
                    .await?;
                info!(payment_id = %next.id, "payment cancelled");
                return Ok(next);
            }
        }
    }

    /// Read-only view of a payment.
    pub async fn get_status(&self, payment_id: PaymentId) -> Result<Payment> {
        self.load(payment_id).await
    }

    /// Routes a provider callback through the matching notifier and applies
    /// it idempotently: replays and out-of-order deliveries never apply a
    /// transition twice.
    pub async fn handle_webhook(
        &self,
        provider: Provider,
        payload: &serde_json::Value,
    ) -> Result<WebhookDisposition> {
        let factory = self.registry.get(provider)?.clone();
        let Some(event) = factory.create_notifier().handle_webhook(payload).await? else {
            debug!(%provider, "webhook payload not recognized");
            return Ok(WebhookDisposition::Unrecognized);
        };

        let target = match event.kind {
            WebhookKind::Completed => PaymentStatus::Completed,
            WebhookKind::Failed => PaymentStatus::Failed,
            WebhookKind::Refunded => PaymentStatus::Refunded,
        };

        let now = Utc::now();
        loop {
            let stored = self.load(event.payment_id).await?;
            if webhook_already_seen(&stored, &event.event_id) {
                debug!(event_id = %event.event_id, "duplicate webhook delivery");
                return Ok(WebhookDisposition::Duplicate);
            }

            let mut next = stored.clone();
            let expected = next.version;
            record_webhook_id(&mut next, &event.event_id);

            if stored.status.can_transition_to(target) {
                next.transition(target, now)?;
                if !self.payments.update(next.clone(), expected).await? {
                    continue;
                }
                self.audit
                    .append(AuditEvent::state_transition(
                        &next.session_id,
                        next.id,
                        stored.status,
                        target,
                        now,
                    ))
                    .await?;
                if target == PaymentStatus::Completed {
                    self.attempts.record_success(&next.session_id).await?;
                }
                info!(payment_id = %next.id, status = %target, "webhook applied");
                return Ok(WebhookDisposition::Applied(target));
            }

            // Out of order (or already in the target state): remember the
            // event id so a replay is detected, but leave the status alone.
            next.touch(now);
            if !self.payments.update(next, expected).await? {
                continue;
            }
            debug!(event_id = %event.event_id, from = %stored.status, to = %target,
                   "webhook transition skipped");
            return Ok(WebhookDisposition::Skipped);
        }
    }

    async fn load(&self, payment_id: PaymentId) -> Result<Payment> {
        self.payments
            .get(&payment_id)
            .await?
            .ok_or(PaymentError::NotFound(payment_id))
    }

    /// Card validation for providers that capture card data directly.
    /// Returns the masked (brand, last4) pair to keep; the full card data
    /// drops (and zeroizes) with the request.
    async fn validate_card(
        &self,
        factory: &ProviderFactoryRef,
        request: &PaymentRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<(String, String)>> {
        if !factory.requires_card_capture() {
            return Ok(None);
        }
        let Some(card) = request.card.as_ref() else {
            self.audit
                .append(AuditEvent::validation_failed(
                    &request.session_id,
                    request.user_id.clone(),
                    &["card"],
                    "card security data is required for this provider",
                    now,
                ))
                .await?;
            self.note_failure(&request.session_id, request.user_id.clone(), now)
                .await?;
            return Err(PaymentError::invalid_field(
                "card",
                "card security data is required for this provider",
            ));
        };

        let report = card.validate(now.date_naive());
        if !report.is_valid() {
            let fields: Vec<&str> = report.errors.keys().map(String::as_str).collect();
            self.audit
                .append(AuditEvent::validation_failed(
                    &request.session_id,
                    request.user_id.clone(),
                    &fields,
                    "card validation failed",
                    now,
                ))
                .await?;
            self.note_failure(&request.session_id, request.user_id.clone(), now)
                .await?;
            return Err(PaymentError::Validation(report.errors));
        }
        Ok(Some((report.brand.to_string(), card.masked_last4())))
    }

    /// Counts a failed attempt and audits the lockout transition exactly
    /// once, when this failure is the one that crossed the limit.
    async fn note_failure(
        &self,
        session_id: &str,
        user_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let outcome = self.attempts.record_failure(session_id, now).await?;
        if outcome.just_locked {
            self.audit
                .append(AuditEvent::attempt_limit_exceeded(
                    session_id,
                    user_id,
                    self.attempts.limit(),
                    now,
                ))
                .await?;
        }
        Ok(())
    }

    async fn audit_rejected_transition(
        &self,
        payment: &Payment,
        to: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.audit
            .append(AuditEvent::new(
                crate::domain::audit::AuditEventKind::StateTransition,
                payment.session_id.clone(),
                None,
                json!({
                    "payment_id": payment.id.to_string(),
                    "from": payment.status.to_string(),
                    "to": to.to_string(),
                    "rejected": true,
                }),
                now,
            ))
            .await
    }

    /// Writes the charge outcome back under the version CAS. A payment that
    /// was cancelled while the charge was in flight keeps its CANCELLED
    /// status; the settlement is recorded in metadata and audited.
    async fn record_charge_outcome(
        &self,
        payment_id: PaymentId,
        request: &PaymentRequest,
        outcome: std::result::Result<ChargeOutcome, ProviderError>,
    ) -> Result<Payment> {
        let now = Utc::now();
        loop {
            let stored = self.load(payment_id).await?;

            if stored.status != PaymentStatus::Processing {
                if let Ok(charge) = &outcome
                    && stored.status == PaymentStatus::Cancelled
                {
                    let mut next = stored.clone();
                    let expected = next.version;
                    next.set_meta(
                        keys::PROVIDER_TRANSACTION_ID,
                        json!(charge.provider_transaction_id),
                    );
                    next.touch(now);
                    if !self.payments.update(next.clone(), expected).await? {
                        continue;
                    }
                    warn!(payment_id = %payment_id, "charge settled after cancellation");
                    self.audit
                        .append(AuditEvent::provider_error(
                            &next.session_id,
                            payment_id,
                            "charge settled after cancellation",
                            false,
                            now,
                        ))
                        .await?;
                    return Ok(next);
                }
                return match outcome {
                    Ok(_) => Ok(stored),
                    Err(err) => Err(err.into()),
                };
            }

            let mut next = stored.clone();
            let expected = next.version;
            match &outcome {
                Ok(charge) => {
                    next.transition(PaymentStatus::Completed, now)?;
                    next.set_meta(
                        keys::PROVIDER_TRANSACTION_ID,
                        json!(charge.provider_transaction_id),
                    );
                    if let Some(url) = &charge.approval_url {
                        next.set_meta(keys::APPROVAL_URL, json!(url));
                    }
                }
                Err(err) => {
                    next.transition(PaymentStatus::Failed, now)?;
                    next.set_meta(keys::FAILURE_DETAIL, json!(err.to_string()));
                }
            }
            if !self.payments.update(next.clone(), expected).await? {
                continue;
            }

            return match outcome {
                Ok(_) => {
                    self.audit
                        .append(AuditEvent::state_transition(
                            &next.session_id,
                            next.id,
                            PaymentStatus::Processing,
                            PaymentStatus::Completed,
                            now,
                        ))
                        .await?;
                    self.attempts.record_success(&next.session_id).await?;
                    info!(payment_id = %next.id, provider = %next.provider, "payment completed");
                    Ok(next)
                }
                Err(err) => {
                    self.audit
                        .append(AuditEvent::provider_error(
                            &next.session_id,
                            next.id,
                            &err.to_string(),
                            matches!(err, ProviderError::Timeout { .. }),
                            now,
                        ))
                        .await?;
                    self.audit
                        .append(AuditEvent::state_transition(
                            &next.session_id,
                            next.id,
                            PaymentStatus::Processing,
                            PaymentStatus::Failed,
                            now,
                        ))
                        .await?;
                    self.note_failure(&next.session_id, request.user_id.clone(), now)
                        .await?;
                    warn!(payment_id = %next.id, provider = %next.provider, "payment failed");
                    Err(err.into())
                }
            };
        }
    }
}

fn webhook_already_seen(payment: &Payment, event_id: &str) -> bool {
    payment
        .metadata
        .get(keys::WEBHOOK_EVENTS)
        .and_then(|v| v.as_array())
        .is_some_and(|ids| ids.iter().any(|id| id.as_str() == Some(event_id)))
}

fn record_webhook_id(payment: &mut Payment, event_id: &str) {
    let entry = payment
        .metadata
        .entry(keys::WEBHOOK_EVENTS.to_string())
        .or_insert_with(|| json!([]));
    if let Some(ids) = entry.as_array_mut() {
        ids.push(json!(event_id));
    }
}
