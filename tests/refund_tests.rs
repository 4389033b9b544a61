mod common;

use chrono::Utc;
use common::{amount, confirm, harness, stripe_request, usd};
use payflow::domain::audit::AuditEventKind;
use payflow::domain::payment::{Payment, PaymentStatus, Provider, keys};
use payflow::domain::ports::PaymentStore;
use payflow::error::PaymentError;

async fn completed_payment(h: &common::Harness) -> Payment {
    let mut request = stripe_request("sess-1", 2000);
    confirm(h, &mut request).await;
    h.engine.create_payment(request).await.unwrap()
}

#[tokio::test]
async fn test_full_refund() {
    let h = harness();
    let payment = completed_payment(&h).await;

    let refunded = h
        .engine
        .refund(payment.id, None, Some("buyer remorse".to_string()))
        .await
        .unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    // The original amount is untouched; the refund lives in metadata.
    assert_eq!(refunded.amount.minor_units(), 2000);
    assert_eq!(
        refunded.metadata[keys::REFUNDED_AMOUNT],
        serde_json::json!(2000)
    );
    assert_eq!(refunded.meta_str(keys::REFUND_REASON), Some("buyer remorse"));
    assert!(
        refunded
            .meta_str(keys::PROVIDER_REFUND_ID)
            .unwrap()
            .starts_with("re_")
    );
    assert!(!refunded.metadata.contains_key(keys::REFUND_IN_FLIGHT));
}

#[tokio::test]
async fn test_partial_refund() {
    let h = harness();
    let payment = completed_payment(&h).await;

    let refunded = h
        .engine
        .refund(payment.id, Some(amount(500)), None)
        .await
        .unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_eq!(refunded.amount.minor_units(), 2000);
    assert_eq!(
        refunded.metadata[keys::REFUNDED_AMOUNT],
        serde_json::json!(500)
    );
}

#[tokio::test]
async fn test_refund_cannot_exceed_original() {
    let h = harness();
    let payment = completed_payment(&h).await;

    let err = h
        .engine
        .refund(payment.id, Some(amount(2001)), None)
        .await
        .unwrap_err();
    let PaymentError::Validation(errors) = err else {
        panic!("expected validation error");
    };
    assert!(errors.contains_key("amount"));

    // Nothing changed.
    let stored = h.engine.get_status(payment.id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
    assert!(!stored.metadata.contains_key(keys::REFUND_IN_FLIGHT));
}

#[tokio::test]
async fn test_double_refund_fails() {
    let h = harness();
    let payment = completed_payment(&h).await;

    h.engine.refund(payment.id, None, None).await.unwrap();
    let err = h.engine.refund(payment.id, None, None).await.unwrap_err();
    assert!(matches!(
        err,
        PaymentError::InvalidStateTransition {
            from: PaymentStatus::Refunded,
            to: PaymentStatus::Refunded,
        }
    ));
}

#[tokio::test]
async fn test_refund_requires_completed_state() {
    let h = harness();
    let mut request = stripe_request("sess-1", 1000);
    request
        .metadata
        .insert("simulate".to_string(), serde_json::json!("declined"));
    confirm(&h, &mut request).await;
    h.engine.create_payment(request).await.unwrap_err();

    let failed = &h.payments.all().await.unwrap()[0];
    let err = h.engine.refund(failed.id, None, None).await.unwrap_err();
    assert!(matches!(
        err,
        PaymentError::InvalidStateTransition {
            from: PaymentStatus::Failed,
            to: PaymentStatus::Refunded,
        }
    ));
}

#[tokio::test]
async fn test_refund_audits_the_transition() {
    let h = harness();
    let payment = completed_payment(&h).await;
    h.engine.refund(payment.id, None, None).await.unwrap();

    let events = h.audit.events().await;
    let last = events
        .iter()
        .rev()
        .find(|e| e.kind == AuditEventKind::StateTransition)
        .unwrap();
    assert_eq!(last.payload["from"], "completed");
    assert_eq!(last.payload["to"], "refunded");
}

#[tokio::test]
async fn test_cancel_pending_payment() {
    let h = harness();
    // A payment parked in PENDING, as if the process died before dispatch.
    let pending = Payment::new(amount(700), usd(), Provider::Stripe, "sess-9", Utc::now());
    h.payments.insert(pending.clone()).await.unwrap();

    let cancelled = h.engine.cancel(pending.id).await.unwrap();
    assert_eq!(cancelled.status, PaymentStatus::Cancelled);
    assert!(cancelled.meta_str(keys::CANCELLED_AT).is_some());

    // Cancelling twice is an illegal transition.
    let err = h.engine.cancel(pending.id).await.unwrap_err();
    assert!(matches!(
        err,
        PaymentError::InvalidStateTransition {
            from: PaymentStatus::Cancelled,
            to: PaymentStatus::Cancelled,
        }
    ));
}
