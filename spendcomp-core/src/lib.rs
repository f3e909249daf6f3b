//! Core library for XRPL spending competitions
//!
//! Holds the pieces with no competition semantics of their own: amounts and
//! ledger transaction views, the prize wallet pool, ledger inquiry and the
//! snapshot store.

pub mod error;
pub mod ledger;
pub mod storage;
pub mod types;
pub mod wallet;

pub use error::{CoreError, Result};
pub use ledger::{InMemoryLedger, LedgerInquiry, XrplClient};
pub use storage::{CompetitionStore, Storage, StoredCompetition};
pub use types::{ChatId, Drops, LedgerTransaction, UserId};
pub use wallet::{Credential, PrizeWalletConfig, WalletHandle, WalletPool};
