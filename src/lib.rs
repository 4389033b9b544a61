//! Payment-orchestration core: card validation, confirm-then-charge tokens,
//! attempt limiting, provider dispatch through a factory registry, and a
//! closed payment lifecycle with an append-only audit trail.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{PaymentError, Result};
