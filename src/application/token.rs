//! Confirmation tokens: short-lived, single-use credentials binding a
//! {session, amount, currency} triple between the client confirmation step
//! and the server-side charge, so the amount cannot be tampered with in
//! between.

use crate::domain::currency::Currency;
use crate::domain::payment::Amount;
use crate::domain::ports::{ConfirmationToken, TokenStore, TokenStoreRef};
use crate::error::{Result, TokenError};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;

pub struct ConfirmationTokenService {
    store: TokenStoreRef,
    ttl: Duration,
}

impl ConfirmationTokenService {
    pub fn new(store: TokenStoreRef, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Issues a fresh token bound to the session, amount and currency.
    pub async fn issue(
        &self,
        session_id: &str,
        amount: Amount,
        currency: Currency,
        now: DateTime<Utc>,
    ) -> Result<ConfirmationToken> {
        let record = ConfirmationToken {
            token: generate_token(),
            session_id: session_id.to_string(),
            amount,
            currency,
            issued_at: now,
            expires_at: now + self.ttl,
            consumed: false,
        };
        self.store.put(record.clone()).await?;
        Ok(record)
    }

    /// Verifies the token against the charge request and consumes it.
    ///
    /// Consumption is a compare-and-swap on the stored flag, so of two
    /// concurrent verifications at most one returns `Ok`.
    pub async fn verify_and_consume(
        &self,
        token: &str,
        session_id: &str,
        amount: Amount,
        currency: &Currency,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(record) = self.store.get(token).await? else {
            return Err(TokenError::NotFound.into());
        };
        if now > record.expires_at {
            return Err(TokenError::Expired.into());
        }
        if record.amount != amount || record.currency != *currency || record.session_id != session_id
        {
            return Err(TokenError::AmountMismatch.into());
        }
        if !self.store.consume(token).await? {
            return Err(TokenError::AlreadyConsumed.into());
        }
        Ok(())
    }
}

/// 128 bits from the OS entropy source, hex-encoded. Opaque and unguessable.
fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    format!("{:032x}", u128::from_be_bytes(bytes))
}
