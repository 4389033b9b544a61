//! Thread-safe in-memory implementations of every storage port.
//!
//! Each store wraps `Arc<RwLock<...>>` for shared concurrent access; the
//! compare-and-swap operations do their check and write under one write
//! lock, which is what makes them atomic. Ideal for tests, the batch driver
//! and small deployments where persistence is not required.

use crate::domain::audit::AuditEvent;
use crate::domain::payment::{Payment, PaymentId};
use crate::domain::ports::{
    AttemptCounter, AuditSink, ConfirmationToken, CounterStore, PaymentStore, TokenStore,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<PaymentId, Payment>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.id) {
            return Err(PaymentError::Storage(format!(
                "payment {} already exists",
                payment.id
            )));
        }
        payments.insert(payment.id, payment);
        Ok(())
    }

    async fn get(&self, id: &PaymentId) -> Result<Option<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments.get(id).cloned())
    }

    async fn update(&self, payment: Payment, expected_version: u64) -> Result<bool> {
        let mut payments = self.payments.write().await;
        match payments.get(&payment.id) {
            Some(stored) if stored.version == expected_version => {
                payments.insert(payment.id, payment);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(PaymentError::Storage(format!(
                "payment {} vanished during update",
                payment.id
            ))),
        }
    }

    async fn all(&self) -> Result<Vec<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments.values().cloned().collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryTokenStore {
    tokens: Arc<RwLock<HashMap<String, ConfirmationToken>>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn put(&self, token: ConfirmationToken) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        tokens.insert(token.token.clone(), token);
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<ConfirmationToken>> {
        let tokens = self.tokens.read().await;
        Ok(tokens.get(token).cloned())
    }

    async fn consume(&self, token: &str) -> Result<bool> {
        let mut tokens = self.tokens.write().await;
        match tokens.get_mut(token) {
            Some(record) if !record.consumed => {
                record.consumed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default, Clone)]
pub struct InMemoryCounterStore {
    counters: Arc<RwLock<HashMap<String, AttemptCounter>>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, session_id: &str) -> Result<Option<AttemptCounter>> {
        let counters = self.counters.read().await;
        Ok(counters.get(session_id).cloned())
    }

    async fn compare_and_swap(
        &self,
        session_id: &str,
        expected: Option<&AttemptCounter>,
        new: AttemptCounter,
    ) -> Result<bool> {
        let mut counters = self.counters.write().await;
        if counters.get(session_id) == expected {
            counters.insert(session_id.to_string(), new);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        let mut counters = self.counters.write().await;
        counters.remove(session_id);
        Ok(())
    }
}

/// Append-only audit sink backed by a `Vec`. The `events()` accessor exists
/// for tests and the batch driver's summary; the core itself never reads
/// back what it appended.
#[derive(Default, Clone)]
pub struct InMemoryAuditSink {
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, event: AuditEvent) -> Result<()> {
        let mut events = self.events.write().await;
        events.push(event);
        Ok(())
    }
}
