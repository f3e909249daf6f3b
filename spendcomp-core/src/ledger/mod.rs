pub mod memory;
pub mod xrpl;

pub use memory::InMemoryLedger;
pub use xrpl::{parse_account_tx, XrplClient};

use crate::error::Result;
use crate::types::LedgerTransaction;
use async_trait::async_trait;

/// Read-only view of an account's recent ledger history.
#[async_trait]
pub trait LedgerInquiry: Send + Sync {
    /// Most recent transactions touching `account`, newest first.
    async fn account_transactions(&self, account: &str, limit: u32)
        -> Result<Vec<LedgerTransaction>>;
}
