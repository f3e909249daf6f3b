use crate::error::{CoreError, Result};
use crate::ledger::LedgerInquiry;
use crate::types::{Drops, LedgerTransaction};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Ledger double backed by a map of account histories.
#[derive(Default)]
pub struct InMemoryLedger {
    history: Mutex<HashMap<String, Vec<LedgerTransaction>>>,
    pending_failures: Mutex<u32>,
    queries: Mutex<u64>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transaction to `account`'s history.
    pub fn push(&self, account: &str, tx: LedgerTransaction) {
        self.history
            .lock()
            .entry(account.to_string())
            .or_default()
            .push(tx);
    }

    /// Makes the next `n` inquiries fail with a network error.
    pub fn fail_next(&self, n: u32) {
        *self.pending_failures.lock() = n;
    }

    pub fn query_count(&self) -> u64 {
        *self.queries.lock()
    }

    /// A validated, successful native payment.
    pub fn payment(destination: &str, tag: Option<u32>, amount: Drops) -> LedgerTransaction {
        LedgerTransaction {
            hash: None,
            tx_type: "Payment".to_string(),
            destination: Some(destination.to_string()),
            destination_tag: tag,
            amount: Some(amount),
            validated: true,
            succeeded: true,
        }
    }
}

#[async_trait]
impl LedgerInquiry for InMemoryLedger {
    async fn account_transactions(
        &self,
        account: &str,
        limit: u32,
    ) -> Result<Vec<LedgerTransaction>> {
        *self.queries.lock() += 1;

        {
            let mut failures = self.pending_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(CoreError::network_connection("simulated ledger outage"));
            }
        }

        let history = self.history.lock();
        Ok(history
            .get(account)
            .map(|txs| txs.iter().rev().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }
}
