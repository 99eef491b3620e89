//! Resource Ledger
//!
//! Per-user balance of resource units. Every step reserves its cost before
//! its handler runs and gets it back when it fails.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use log::debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Atomically takes `amount` units from the user's balance.
    ///
    /// Returns `Ok(false)` without touching the balance when it is too low.
    /// A zero amount always succeeds.
    async fn reserve(&self, user_id: &str, amount: u64) -> Result<bool, LedgerError>;

    /// Atomically gives `amount` units back.
    async fn refund(&self, user_id: &str, amount: u64) -> Result<(), LedgerError>;

    async fn balance(&self, user_id: &str) -> Result<u64, LedgerError>;
}

/// Mutex-guarded in-memory balances.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    balances: Mutex<HashMap<String, u64>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a balance.
    pub fn with_balance(self, user_id: impl Into<String>, amount: u64) -> Self {
        self.set_balance(user_id, amount);
        self
    }

    pub fn set_balance(&self, user_id: impl Into<String>, amount: u64) {
        self.balances().insert(user_id.into(), amount);
    }

    fn balances(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.balances.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn reserve(&self, user_id: &str, amount: u64) -> Result<bool, LedgerError> {
        if amount == 0 {
            return Ok(true);
        }

        let mut balances = self.balances();
        let balance = balances.entry(user_id.to_string()).or_insert(0);
        if *balance < amount {
            debug!(
                "Reservation of {} units refused for {} (balance {})",
                amount, user_id, balance
            );
            return Ok(false);
        }

        *balance -= amount;
        Ok(true)
    }

    async fn refund(&self, user_id: &str, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        *self.balances().entry(user_id.to_string()).or_insert(0) += amount;
        Ok(())
    }

    async fn balance(&self, user_id: &str) -> Result<u64, LedgerError> {
        Ok(self.balances().get(user_id).copied().unwrap_or(0))
    }
}
